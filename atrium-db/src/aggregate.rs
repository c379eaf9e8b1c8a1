//! Report rows produced by the [`Repository`](crate::Repository) aggregates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a time-series bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Granularity {
    /// The `date_trunc` field name for this bucket.
    pub fn bucket(self) -> &'static str {
        match self {
            Granularity::Hourly => "hour",
            Granularity::Daily => "day",
            Granularity::Weekly => "week",
            Granularity::Monthly => "month",
            Granularity::Quarterly => "quarter",
            Granularity::Yearly => "year",
        }
    }

    /// Bucket width for charting the span `from..to`.
    ///
    /// Up to 48 hours is hourly, 45 days daily, 120 days weekly, about two
    /// years monthly, about five years quarterly, and yearly beyond that.
    pub fn for_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        let span = to - from;
        if span <= Duration::hours(48) {
            Granularity::Hourly
        } else if span <= Duration::days(45) {
            Granularity::Daily
        } else if span <= Duration::days(120) {
            Granularity::Weekly
        } else if span <= Duration::days(24 * 30) {
            Granularity::Monthly
        } else if span <= Duration::days(60 * 30) {
            Granularity::Quarterly
        } else {
            Granularity::Yearly
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
            Granularity::Quarterly => "quarterly",
            Granularity::Yearly => "yearly",
        };
        f.write_str(name)
    }
}

/// One group of a grouped aggregate. `key` is the group column as text,
/// `None` for the NULL group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: Option<String>,
    pub value: f64,
}

/// One bucket of a time series, keyed by the bucket's start.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBucket {
    pub at: DateTime<Utc>,
    pub value: f64,
}
