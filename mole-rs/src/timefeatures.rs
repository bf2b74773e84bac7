//! Calendar features derived from timestamps.
//!
//! Two encodings are supported:
//! - [`Embed::TimeF`]: continuous features scaled to `[-0.5, 0.5]`, with the
//!   set of features chosen by the sampling frequency
//! - [`Embed::Fixed`]: raw integer calendar fields (month, day, weekday, hour
//!   and, for sub-hourly data, the quarter-hour index)

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Weekday};

use crate::config::Embed;
use crate::error::{MoleError, Result};

/// Base unit of a sampling frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqUnit {
    /// Secondly.
    Second,
    /// Minutely.
    Minute,
    /// Hourly.
    Hour,
    /// Daily.
    Day,
    /// Business days (Monday to Friday).
    BusinessDay,
    /// Weekly.
    Week,
}

/// Sampling frequency such as `h`, `15min` or `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frequency {
    /// Base unit.
    pub unit: FreqUnit,
    /// Number of units between consecutive rows.
    pub multiple: u32,
}

impl Frequency {
    /// Parse a frequency string.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Config`] for unsupported units.
    ///
    /// ```rust
    /// use mole_rs::timefeatures::{FreqUnit, Frequency};
    ///
    /// let freq = Frequency::parse("15min").unwrap();
    /// assert_eq!(freq.unit, FreqUnit::Minute);
    /// assert_eq!(freq.multiple, 15);
    /// ```
    pub fn parse(freq: &str) -> Result<Self> {
        let freq = freq.trim();
        let split = freq
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(freq.len());
        let (digits, unit) = freq.split_at(split);
        let multiple = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u32>()
                .map_err(|_| MoleError::config(format!("invalid frequency: {freq}")))?
        };
        if multiple == 0 {
            return Err(MoleError::config(format!("invalid frequency: {freq}")));
        }

        let unit = match unit.to_ascii_lowercase().as_str() {
            "s" | "sec" => FreqUnit::Second,
            "t" | "min" => FreqUnit::Minute,
            "h" => FreqUnit::Hour,
            "d" => FreqUnit::Day,
            "b" => FreqUnit::BusinessDay,
            "w" => FreqUnit::Week,
            _ => {
                return Err(MoleError::config(format!(
                    "unsupported frequency '{freq}' (expected s, t/min, h, d, b or w)"
                )))
            }
        };

        Ok(Self { unit, multiple })
    }

    /// Timestamp `steps` rows after `start`.
    pub fn advance(&self, start: NaiveDateTime, steps: usize) -> NaiveDateTime {
        let n = i64::from(self.multiple) * steps as i64;
        match self.unit {
            FreqUnit::Second => start + Duration::seconds(n),
            FreqUnit::Minute => start + Duration::minutes(n),
            FreqUnit::Hour => start + Duration::hours(n),
            FreqUnit::Day => start + Duration::days(n),
            FreqUnit::Week => start + Duration::weeks(n),
            FreqUnit::BusinessDay => {
                let mut current = start;
                let mut remaining = n;
                while remaining > 0 {
                    current += Duration::days(1);
                    if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
                        remaining -= 1;
                    }
                }
                current
            }
        }
    }

    /// `count` timestamps following `last`, excluding `last` itself.
    pub fn future_dates(&self, last: NaiveDateTime, count: usize) -> Vec<NaiveDateTime> {
        (1..=count).map(|step| self.advance(last, step)).collect()
    }
}

/// Number of feature columns produced for a frequency and encoding.
pub fn feature_count(freq: &Frequency, embed: Embed) -> usize {
    match embed {
        Embed::TimeF => match freq.unit {
            FreqUnit::Second => 6,
            FreqUnit::Minute => 5,
            FreqUnit::Hour => 4,
            FreqUnit::Day | FreqUnit::BusinessDay => 3,
            FreqUnit::Week => 2,
        },
        Embed::Fixed => match freq.unit {
            FreqUnit::Second | FreqUnit::Minute => 5,
            _ => 4,
        },
    }
}

/// Feature vector for one timestamp.
pub fn time_features(ts: &NaiveDateTime, freq: &Frequency, embed: Embed) -> Vec<f32> {
    match embed {
        Embed::TimeF => continuous_features(ts, freq),
        Embed::Fixed => {
            let mut fields = vec![
                ts.month() as f32,
                ts.day() as f32,
                ts.weekday().num_days_from_monday() as f32,
                ts.hour() as f32,
            ];
            if matches!(freq.unit, FreqUnit::Second | FreqUnit::Minute) {
                fields.push((ts.minute() / 15) as f32);
            }
            fields
        }
    }
}

fn continuous_features(ts: &NaiveDateTime, freq: &Frequency) -> Vec<f32> {
    let second = ts.second() as f32 / 59.0 - 0.5;
    let minute = ts.minute() as f32 / 59.0 - 0.5;
    let hour = ts.hour() as f32 / 23.0 - 0.5;
    let weekday = ts.weekday().num_days_from_monday() as f32 / 6.0 - 0.5;
    let day_of_month = (ts.day() as f32 - 1.0) / 30.0 - 0.5;
    let day_of_year = (ts.ordinal() as f32 - 1.0) / 365.0 - 0.5;
    let week_of_year = (ts.iso_week().week() as f32 - 1.0) / 52.0 - 0.5;

    match freq.unit {
        FreqUnit::Second => vec![second, minute, hour, weekday, day_of_month, day_of_year],
        FreqUnit::Minute => vec![minute, hour, weekday, day_of_month, day_of_year],
        FreqUnit::Hour => vec![hour, weekday, day_of_month, day_of_year],
        FreqUnit::Day | FreqUnit::BusinessDay => vec![weekday, day_of_month, day_of_year],
        FreqUnit::Week => vec![day_of_month, week_of_year],
    }
}

/// Parse a timestamp in one of the common CSV layouts.
///
/// # Errors
///
/// Returns [`MoleError::Data`] if no known layout matches.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: [&str; 5] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
    ];
    let raw = raw.trim();
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            if let Some(ts) = date.and_hms_opt(0, 0, 0) {
                return Ok(ts);
            }
        }
    }
    Err(MoleError::data(format!("unrecognized timestamp: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).unwrap()
    }

    #[test]
    fn test_parse_frequency() {
        assert_eq!(
            Frequency::parse("h").unwrap(),
            Frequency {
                unit: FreqUnit::Hour,
                multiple: 1
            }
        );
        assert_eq!(Frequency::parse("t").unwrap().unit, FreqUnit::Minute);
        assert_eq!(Frequency::parse("10min").unwrap().multiple, 10);
        assert_eq!(Frequency::parse("B").unwrap().unit, FreqUnit::BusinessDay);
        assert!(Frequency::parse("m").is_err());
        assert!(Frequency::parse("0h").is_err());
    }

    #[test]
    fn test_hourly_time_features() {
        let freq = Frequency::parse("h").unwrap();
        // 2016-07-01 is a Friday, day 183 of a leap year
        let feats = time_features(&ts("2016-07-01 23:00:00"), &freq, Embed::TimeF);

        assert_eq!(feats.len(), feature_count(&freq, Embed::TimeF));
        assert!((feats[0] - 0.5).abs() < 1e-6);
        assert!((feats[1] - (4.0 / 6.0 - 0.5)).abs() < 1e-6);
        assert!((feats[2] + 0.5).abs() < 1e-6);
        assert!((feats[3] - (182.0 / 365.0 - 0.5)).abs() < 1e-6);
    }

    #[test]
    fn test_fixed_features() {
        let minutely = Frequency::parse("15min").unwrap();
        let feats = time_features(&ts("2016-07-01 10:45"), &minutely, Embed::Fixed);
        assert_eq!(feats, vec![7.0, 1.0, 4.0, 10.0, 3.0]);

        let hourly = Frequency::parse("h").unwrap();
        assert_eq!(feature_count(&hourly, Embed::Fixed), 4);
    }

    #[test]
    fn test_future_dates() {
        let freq = Frequency::parse("15min").unwrap();
        let dates = freq.future_dates(ts("2018-06-26 23:45:00"), 2);
        assert_eq!(dates, vec![ts("2018-06-27 00:00:00"), ts("2018-06-27 00:15:00")]);
    }

    #[test]
    fn test_business_days_skip_weekends() {
        let freq = Frequency::parse("b").unwrap();
        // Friday -> Monday
        let next = freq.advance(ts("2016-07-01"), 1);
        assert_eq!(next, ts("2016-07-04"));
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        assert!(parse_timestamp("2016-07-01 00:00:00").is_ok());
        assert!(parse_timestamp("2016/07/01 00:10").is_ok());
        assert!(parse_timestamp("2016-07-01").is_ok());
        assert!(parse_timestamp("July 1st").is_err());
    }
}
