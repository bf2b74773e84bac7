//! Vanilla encoder-decoder transformer baseline.
//!
//! Implements:
//! - Data embedding: circular token convolution (kernel 3), sinusoidal
//!   positions and timestamp features
//! - Full multi-head attention with an optional causal mask
//! - Post-norm encoder and decoder layers with a two-layer feed-forward block
//!
//! The decoder consumes `label_len` known steps followed by `pred_len`
//! zeros; the last `pred_len` decoder outputs are the forecast.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Dropout, Embedding, LayerNorm, Linear, VarBuilder};

use super::{family_mismatch, ForecastOutput, Forecaster, ForwardOptions, ModelInputs, ModelKind};
use crate::config::{Activation, Embed, ExpConfig};
use crate::error::Result;

type CResult<T> = candle_core::Result<T>;

/// Sinusoidal position table `[1, len, d_model]`.
pub fn positional_encoding(len: usize, d_model: usize, device: &Device) -> CResult<Tensor> {
    let mut table = vec![0f32; len * d_model];
    for pos in 0..len {
        for i in (0..d_model).step_by(2) {
            let angle = pos as f32 / 10000f32.powf(i as f32 / d_model as f32);
            table[pos * d_model + i] = angle.sin();
            if i + 1 < d_model {
                table[pos * d_model + i + 1] = angle.cos();
            }
        }
    }
    Tensor::from_vec(table, (1, len, d_model), device)
}

/// Causal mask `[1, 1, len, len]`: 0 on and below the diagonal, `-inf` above.
pub fn causal_mask(len: usize, device: &Device) -> CResult<Tensor> {
    let mask: Vec<f32> = (0..len)
        .flat_map(|i| (0..len).map(move |j| if j <= i { 0.0 } else { f32::NEG_INFINITY }))
        .collect();
    Tensor::from_vec(mask, (1, 1, len, len), device)
}

#[derive(Debug, Clone)]
enum TemporalEmbedding {
    TimeF(Linear),
    Fixed(Vec<Embedding>),
}

impl TemporalEmbedding {
    fn new(embed: Embed, mark_dim: usize, d_model: usize, vb: VarBuilder) -> CResult<Self> {
        match embed {
            Embed::TimeF => Ok(Self::TimeF(candle_nn::linear_no_bias(
                mark_dim,
                d_model,
                vb.pp("timef"),
            )?)),
            Embed::Fixed => {
                // month, day, weekday, hour, quarter-hour
                let sizes = [13, 32, 7, 24, 4];
                let tables = sizes
                    .iter()
                    .take(mark_dim)
                    .enumerate()
                    .map(|(i, &size)| candle_nn::embedding(size, d_model, vb.pp(i.to_string())))
                    .collect::<CResult<Vec<_>>>()?;
                Ok(Self::Fixed(tables))
            }
        }
    }

    fn forward(&self, x_mark: &Tensor) -> CResult<Tensor> {
        match self {
            Self::TimeF(linear) => linear.forward(x_mark),
            Self::Fixed(tables) => {
                let ids = x_mark.to_dtype(DType::U32)?;
                let mut acc: Option<Tensor> = None;
                for (i, table) in tables.iter().enumerate() {
                    let column = ids.narrow(2, i, 1)?.squeeze(2)?.contiguous()?;
                    let emb = table.forward(&column)?;
                    acc = Some(match acc {
                        Some(prev) => (prev + emb)?,
                        None => emb,
                    });
                }
                acc.ok_or_else(|| candle_core::Error::Msg("no timestamp features".into()))
            }
        }
    }
}

/// Value, position and timestamp embedding.
#[derive(Debug, Clone)]
pub struct DataEmbedding {
    token: Linear,
    temporal: TemporalEmbedding,
    dropout: Dropout,
    d_model: usize,
}

impl DataEmbedding {
    /// Create an embedding for `channels` values and `mark_dim` timestamp
    /// features.
    pub fn new(
        channels: usize,
        mark_dim: usize,
        d_model: usize,
        embed: Embed,
        dropout: f32,
        vb: VarBuilder,
    ) -> CResult<Self> {
        Ok(Self {
            token: candle_nn::linear_no_bias(3 * channels, d_model, vb.pp("token"))?,
            temporal: TemporalEmbedding::new(embed, mark_dim, d_model, vb.pp("temporal"))?,
            dropout: Dropout::new(dropout),
            d_model,
        })
    }

    /// `x [B, L, C]`, `x_mark [B, L, T]` to `[B, L, d_model]`.
    pub fn forward(&self, x: &Tensor, x_mark: &Tensor, train: bool) -> CResult<Tensor> {
        let (_, len, _) = x.dims3()?;
        // circular neighbours for the kernel-3 convolution
        let (prev, next) = if len > 1 {
            let prev = Tensor::cat(&[x.narrow(1, len - 1, 1)?, x.narrow(1, 0, len - 1)?], 1)?;
            let next = Tensor::cat(&[x.narrow(1, 1, len - 1)?, x.narrow(1, 0, 1)?], 1)?;
            (prev, next)
        } else {
            (x.clone(), x.clone())
        };
        let windows = Tensor::cat(&[&prev, x, &next], 2)?;

        let values = self.token.forward(&windows)?;
        let positions = positional_encoding(len, self.d_model, x.device())?;
        let marks = self.temporal.forward(x_mark)?;
        let out = values.broadcast_add(&positions)?.add(&marks)?;
        self.dropout.forward(&out, train)
    }
}

/// Scaled dot-product multi-head attention.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    dropout: Dropout,
    n_heads: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    /// Create attention over `d_model` features split into `n_heads`.
    pub fn new(d_model: usize, n_heads: usize, dropout: f32, vb: VarBuilder) -> CResult<Self> {
        let head_dim = d_model / n_heads;
        Ok(Self {
            q_proj: candle_nn::linear(d_model, d_model, vb.pp("query"))?,
            k_proj: candle_nn::linear(d_model, d_model, vb.pp("key"))?,
            v_proj: candle_nn::linear(d_model, d_model, vb.pp("value"))?,
            o_proj: candle_nn::linear(d_model, d_model, vb.pp("out"))?,
            dropout: Dropout::new(dropout),
            n_heads,
            head_dim,
        })
    }

    /// Attend from `query [B, Lq, d]` to `source [B, Lk, d]`.
    ///
    /// Returns the output and the attention weights `[B, H, Lq, Lk]`.
    pub fn forward(
        &self,
        query: &Tensor,
        source: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> CResult<(Tensor, Tensor)> {
        let (batch, q_len, _) = query.dims3()?;
        let (_, k_len, _) = source.dims3()?;

        let split = |t: Tensor, len: usize| -> CResult<Tensor> {
            t.reshape((batch, len, self.n_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split(self.q_proj.forward(query)?, q_len)?;
        let k = split(self.k_proj.forward(source)?, k_len)?;
        let v = split(self.v_proj.forward(source)?, k_len)?;

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? / scale)?;
        let scores = match mask {
            Some(m) => scores.broadcast_add(m)?,
            None => scores,
        };
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let out = self.dropout.forward(&weights, train)?.matmul(&v)?;

        let out = out
            .transpose(1, 2)?
            .reshape((batch, q_len, self.n_heads * self.head_dim))?;
        Ok((self.o_proj.forward(&out)?, weights))
    }
}

#[derive(Debug, Clone)]
struct FeedForward {
    up: Linear,
    down: Linear,
    activation: Activation,
    dropout: Dropout,
}

impl FeedForward {
    fn new(d_model: usize, d_ff: usize, activation: Activation, dropout: f32, vb: VarBuilder) -> CResult<Self> {
        Ok(Self {
            up: candle_nn::linear(d_model, d_ff, vb.pp("conv1"))?,
            down: candle_nn::linear(d_ff, d_model, vb.pp("conv2"))?,
            activation,
            dropout: Dropout::new(dropout),
        })
    }

    fn forward(&self, x: &Tensor, train: bool) -> CResult<Tensor> {
        let h = self.up.forward(x)?;
        let h = match self.activation {
            Activation::Gelu => h.gelu_erf()?,
            Activation::Relu => h.relu()?,
        };
        let h = self.dropout.forward(&h, train)?;
        self.dropout.forward(&self.down.forward(&h)?, train)
    }
}

#[derive(Debug, Clone)]
struct EncoderLayer {
    attention: MultiHeadAttention,
    ffn: FeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    dropout: Dropout,
}

impl EncoderLayer {
    fn new(cfg: &Dims, vb: VarBuilder) -> CResult<Self> {
        Ok(Self {
            attention: MultiHeadAttention::new(cfg.d_model, cfg.n_heads, cfg.dropout, vb.pp("attention"))?,
            ffn: FeedForward::new(cfg.d_model, cfg.d_ff, cfg.activation, cfg.dropout, vb.pp("ffn"))?,
            norm1: candle_nn::layer_norm(cfg.d_model, 1e-5, vb.pp("norm1"))?,
            norm2: candle_nn::layer_norm(cfg.d_model, 1e-5, vb.pp("norm2"))?,
            dropout: Dropout::new(cfg.dropout),
        })
    }

    fn forward(&self, x: &Tensor, train: bool) -> CResult<(Tensor, Tensor)> {
        let (attended, weights) = self.attention.forward(x, x, None, train)?;
        let x = self.norm1.forward(&(x + self.dropout.forward(&attended, train)?)?)?;
        let y = self.ffn.forward(&x, train)?;
        Ok((self.norm2.forward(&(x + y)?)?, weights))
    }
}

#[derive(Debug, Clone)]
struct DecoderLayer {
    self_attention: MultiHeadAttention,
    cross_attention: MultiHeadAttention,
    ffn: FeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    norm3: LayerNorm,
    dropout: Dropout,
}

impl DecoderLayer {
    fn new(cfg: &Dims, vb: VarBuilder) -> CResult<Self> {
        Ok(Self {
            self_attention: MultiHeadAttention::new(cfg.d_model, cfg.n_heads, cfg.dropout, vb.pp("self_attention"))?,
            cross_attention: MultiHeadAttention::new(cfg.d_model, cfg.n_heads, cfg.dropout, vb.pp("cross_attention"))?,
            ffn: FeedForward::new(cfg.d_model, cfg.d_ff, cfg.activation, cfg.dropout, vb.pp("ffn"))?,
            norm1: candle_nn::layer_norm(cfg.d_model, 1e-5, vb.pp("norm1"))?,
            norm2: candle_nn::layer_norm(cfg.d_model, 1e-5, vb.pp("norm2"))?,
            norm3: candle_nn::layer_norm(cfg.d_model, 1e-5, vb.pp("norm3"))?,
            dropout: Dropout::new(cfg.dropout),
        })
    }

    fn forward(&self, x: &Tensor, memory: &Tensor, mask: &Tensor, train: bool) -> CResult<Tensor> {
        let (attended, _) = self.self_attention.forward(x, x, Some(mask), train)?;
        let x = self.norm1.forward(&(x + self.dropout.forward(&attended, train)?)?)?;
        let (crossed, _) = self.cross_attention.forward(&x, memory, None, train)?;
        let x = self.norm2.forward(&(x + self.dropout.forward(&crossed, train)?)?)?;
        let y = self.ffn.forward(&x, train)?;
        self.norm3.forward(&(x + y)?)
    }
}

struct Dims {
    d_model: usize,
    n_heads: usize,
    d_ff: usize,
    dropout: f32,
    activation: Activation,
}

/// Encoder-decoder transformer forecaster.
pub struct TransformerForecaster {
    enc_embedding: DataEmbedding,
    dec_embedding: DataEmbedding,
    encoder: Vec<EncoderLayer>,
    encoder_norm: LayerNorm,
    decoder: Vec<DecoderLayer>,
    decoder_norm: LayerNorm,
    projection: Linear,
    pred_len: usize,
    output_attention: bool,
}

impl TransformerForecaster {
    /// Build from the `transformer` section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if parameter creation fails.
    pub fn new(config: &ExpConfig, mark_dim: usize, vb: VarBuilder) -> Result<Self> {
        let tr = &config.transformer;
        let f = &config.forecast;
        let dims = Dims {
            d_model: tr.d_model,
            n_heads: tr.n_heads,
            d_ff: tr.d_ff,
            dropout: tr.dropout,
            activation: tr.activation,
        };
        let embed = config.data.embed;

        let enc_embedding =
            DataEmbedding::new(f.enc_in, mark_dim, tr.d_model, embed, tr.dropout, vb.pp("enc_embedding"))?;
        let dec_embedding =
            DataEmbedding::new(f.dec_in, mark_dim, tr.d_model, embed, tr.dropout, vb.pp("dec_embedding"))?;
        let encoder = (0..tr.e_layers)
            .map(|i| EncoderLayer::new(&dims, vb.pp(format!("encoder.layers.{i}"))))
            .collect::<CResult<Vec<_>>>()?;
        let decoder = (0..tr.d_layers)
            .map(|i| DecoderLayer::new(&dims, vb.pp(format!("decoder.layers.{i}"))))
            .collect::<CResult<Vec<_>>>()?;

        Ok(Self {
            enc_embedding,
            dec_embedding,
            encoder,
            encoder_norm: candle_nn::layer_norm(tr.d_model, 1e-5, vb.pp("encoder.norm"))?,
            decoder,
            decoder_norm: candle_nn::layer_norm(tr.d_model, 1e-5, vb.pp("decoder.norm"))?,
            projection: candle_nn::linear(tr.d_model, f.c_out, vb.pp("decoder.projection"))?,
            pred_len: f.pred_len,
            output_attention: tr.output_attention,
        })
    }
}

impl Forecaster for TransformerForecaster {
    fn kind(&self) -> ModelKind {
        ModelKind::Transformer
    }

    fn forward(&self, inputs: &ModelInputs<'_>, options: &ForwardOptions) -> Result<ForecastOutput> {
        let ModelInputs::Attention {
            x,
            x_mark,
            dec_inp,
            y_mark,
        } = inputs
        else {
            return Err(family_mismatch(ModelKind::Transformer, inputs));
        };
        let train = options.train;

        let mut enc = self.enc_embedding.forward(x, x_mark, train)?;
        let mut attention = Vec::with_capacity(self.encoder.len());
        for layer in &self.encoder {
            let (out, weights) = layer.forward(&enc, train)?;
            enc = out;
            attention.push(weights);
        }
        let memory = self.encoder_norm.forward(&enc)?;

        let mut dec = self.dec_embedding.forward(dec_inp, y_mark, train)?;
        let mask = causal_mask(dec.dim(1)?, dec.device())?;
        for layer in &self.decoder {
            dec = layer.forward(&dec, &memory, &mask, train)?;
        }
        let dec = self.projection.forward(&self.decoder_norm.forward(&dec)?)?;

        let len = dec.dim(1)?;
        let prediction = dec.narrow(1, len - self.pred_len.min(len), self.pred_len.min(len))?;

        Ok(ForecastOutput {
            prediction,
            heads: None,
            gating: None,
            attention: self.output_attention.then_some(attention),
        })
    }
}
