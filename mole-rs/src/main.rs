//! CLI entry point for mole-rs.

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mole_rs::data::Split;
use mole_rs::exp::{Exp, HeadMode, TestOptions};
use mole_rs::{ConfigOverrides, ExpConfig, ModelFamily, ModelKind, Result};

#[derive(Parser)]
#[command(name = "mole")]
#[command(about = "Mixture-of-linear-experts time-series forecasting experiments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        config: String,
    },
    /// Train, test and optionally predict for every iteration
    Train {
        /// Path to configuration file
        config: String,
        #[command(flatten)]
        overrides: OverrideArgs,
        /// Select the best expert head on the validation split before testing
        #[arg(long)]
        select_head: bool,
        /// Forecast past the end of the series after testing
        #[arg(long)]
        predict: bool,
    },
    /// Evaluate a saved checkpoint
    Test {
        /// Path to configuration file
        config: String,
        #[command(flatten)]
        overrides: OverrideArgs,
        /// Evaluate a single expert head
        #[arg(long, conflicts_with = "separate")]
        head: Option<usize>,
        /// Evaluate every expert head and report the best
        #[arg(long)]
        separate: bool,
        /// Split to evaluate (train, val, test)
        #[arg(long, default_value = "test")]
        flag: String,
        /// Iteration index of the checkpoint
        #[arg(long, default_value_t = 0)]
        iteration: usize,
    },
    /// Forecast past the end of the series with a saved checkpoint
    Predict {
        /// Path to configuration file
        config: String,
        #[command(flatten)]
        overrides: OverrideArgs,
        /// Iteration index of the checkpoint
        #[arg(long, default_value_t = 0)]
        iteration: usize,
    },
    /// Generate a sample configuration file
    Init {
        /// Output path for config file
        #[arg(default_value = "config.yaml")]
        output: String,
        /// Preset (etth1-mole-dlinear, etth1-mole-rlinear, weather-mole-rmlp, etth1-transformer)
        #[arg(long, default_value = "etth1-mole-dlinear")]
        preset: String,
    },
}

#[derive(Args, Debug, Default)]
struct OverrideArgs {
    /// Replace the model (e.g. MoLE_RLinear)
    #[arg(long)]
    model: Option<String>,
    /// Replace the input window length
    #[arg(long)]
    seq_len: Option<usize>,
    /// Replace the forecast horizon
    #[arg(long)]
    pred_len: Option<usize>,
    /// Replace the number of training epochs
    #[arg(long)]
    epochs: Option<usize>,
    /// Replace the learning rate
    #[arg(long)]
    learning_rate: Option<f64>,
    /// Replace the batch size
    #[arg(long)]
    batch_size: Option<usize>,
}

impl OverrideArgs {
    fn to_overrides(&self) -> Result<ConfigOverrides> {
        let model = self
            .model
            .as_deref()
            .map(str::parse::<ModelKind>)
            .transpose()?;
        Ok(ConfigOverrides {
            model,
            seq_len: self.seq_len,
            pred_len: self.pred_len,
            train_epochs: self.epochs,
            learning_rate: self.learning_rate,
            batch_size: self.batch_size,
        })
    }
}

fn load_config(path: &str, overrides: &OverrideArgs) -> Result<ExpConfig> {
    let mut config = ExpConfig::from_file(path)?;
    config.apply_overrides(&overrides.to_overrides()?);
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            tracing::info!("Validating configuration: {}", config);
            let config = ExpConfig::from_file(&config)?;
            config.validate()?;
            println!("✓ Configuration is valid");
            println!("  Model: {}", config.model);
            println!("  Data: {}/{}", config.data.root_path, config.data.data_path);
            println!(
                "  Windows: seq_len={} label_len={} pred_len={}",
                config.forecast.seq_len, config.forecast.label_len, config.forecast.pred_len
            );
            println!("  Setting: {}", config.setting(0));
        }
        Commands::Train {
            config,
            overrides,
            select_head,
            predict,
        } => {
            tracing::info!("Starting training with config: {}", config);
            let config = load_config(&config, &overrides)?;

            for ii in 0..config.itr {
                let setting = config.setting(ii);
                let mut exp = Exp::new(config.clone())?;

                tracing::info!(">>>>>>>start training : {}>>>>>>>>>>>>>>>>>>>>>>>>>>", setting);
                let report = exp.train(&setting)?;
                println!(
                    "✓ Trained {} (best epoch {}, vali loss {:.7})",
                    setting, report.best_epoch, report.best_val_loss
                );

                let head = if select_head && config.model.family() == ModelFamily::GatedLinear {
                    let k = exp.select_head(&setting)?;
                    println!("  Selected head: {k}");
                    HeadMode::Fixed(k)
                } else {
                    HeadMode::Mixture
                };

                tracing::info!(">>>>>>>testing : {}<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<", setting);
                let test = exp.test(
                    &setting,
                    &TestOptions {
                        flag: Split::Test,
                        load: false,
                        head,
                    },
                )?;
                println!("  {}", test.metrics);

                if predict {
                    tracing::info!(">>>>>>>predicting : {}<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<", setting);
                    let preds = exp.predict(&setting, true)?;
                    println!("  Prediction shape: {:?}", preds.dims());
                }
            }
        }
        Commands::Test {
            config,
            overrides,
            head,
            separate,
            flag,
            iteration,
        } => {
            let config = load_config(&config, &overrides)?;
            let setting = config.setting(iteration);
            let head = match (head, separate) {
                (Some(k), _) => HeadMode::Fixed(k),
                (None, true) => HeadMode::Separate,
                (None, false) => HeadMode::Mixture,
            };

            let mut exp = Exp::new(config)?;
            tracing::info!(">>>>>>>testing : {}<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<", setting);
            let report = exp.test(
                &setting,
                &TestOptions {
                    flag: flag.parse()?,
                    load: true,
                    head,
                },
            )?;
            println!("✓ {}", report.metrics);
            if let Some(k) = report.best_head {
                println!("  Best head: {k}");
            }
        }
        Commands::Predict {
            config,
            overrides,
            iteration,
        } => {
            let config = load_config(&config, &overrides)?;
            let setting = config.setting(iteration);

            let mut exp = Exp::new(config)?;
            tracing::info!(">>>>>>>predicting : {}<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<<", setting);
            let preds = exp.predict(&setting, true)?;
            println!("✓ Prediction {:?} saved for {}", preds.dims(), setting);
        }
        Commands::Init { output, preset } => {
            tracing::info!("Generating config for preset: {}", preset);
            let config = ExpConfig::from_preset(&preset)?;
            config.to_file(&output)?;
            println!("✓ Configuration written to: {output}");
        }
    }

    Ok(())
}
