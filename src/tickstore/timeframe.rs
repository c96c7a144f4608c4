use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// OHLC bar timeframe
///
/// Buckets are aligned to the Unix epoch: `open_time = floor(ts / tf) * tf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Wire label and bucket width in seconds
    const fn parts(self) -> (&'static str, i64) {
        match self {
            Timeframe::M1 => ("1m", 60),
            Timeframe::M5 => ("5m", 5 * 60),
            Timeframe::M15 => ("15m", 15 * 60),
            Timeframe::M30 => ("30m", 30 * 60),
            Timeframe::H1 => ("1h", 3_600),
            Timeframe::H4 => ("4h", 4 * 3_600),
            Timeframe::D1 => ("1d", 86_400),
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.parts().0
    }

    pub fn duration_seconds(&self) -> i64 {
        self.parts().1
    }

    /// Start of the bucket containing `ts`
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.duration_seconds();
        let start = ts.timestamp().div_euclid(width) * width;
        Utc.timestamp_opt(start, 0).single().unwrap_or(ts)
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| format!("unknown timeframe '{}'", s))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_parse_back() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>(), Ok(tf));
        }
        assert_eq!("4h".parse::<Timeframe>(), Ok(Timeframe::H4));
        assert!("2m".parse::<Timeframe>().is_err());
        assert!("1M".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_serde_matches_labels() {
        assert_eq!(serde_json::to_string(&Timeframe::M15).unwrap(), "\"15m\"");
        let parsed: Timeframe = serde_json::from_str("\"1d\"").unwrap();
        assert_eq!(parsed, Timeframe::D1);
    }

    #[test]
    fn test_bucket_start() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 6, 13, 47, 29).unwrap();

        assert_eq!(
            Timeframe::M1.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 5, 6, 13, 47, 0).unwrap()
        );
        assert_eq!(
            Timeframe::M15.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 5, 6, 13, 45, 0).unwrap()
        );
        assert_eq!(
            Timeframe::H4.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
        );
        assert_eq!(
            Timeframe::D1.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_bucket_before_epoch() {
        let ts = Utc.timestamp_opt(-30, 0).unwrap();
        assert_eq!(Timeframe::M1.bucket_start(ts).timestamp(), -60);
    }
}
