use std::{collections::BTreeMap, sync::Arc};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Start of the UTC calendar day holding `timestamp`.
pub fn day_start(timestamp: i64) -> i64 {
    timestamp.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY
}

/// Every daily summary table of `table` starts with this prefix.
pub fn summary_prefix(table: &str) -> String {
    format!("{}_day_", table)
}

pub fn summary_table_name(table: &str, column: &str) -> String {
    format!("{}_day_{}", table, column)
}

pub fn summary_metadata_table(table: &str) -> String {
    format!("{}_day__metadata", table)
}

/// Key of the metadata row holding the newest timestamp folded into the summaries.
pub const LAST_UPDATE_KEY: &str = "lastUpdate";

/// Aggregates of one column over one day.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DayAggregate {
    pub min: Option<f64>,
    pub min_time: Option<i64>,
    pub max: Option<f64>,
    pub max_time: Option<i64>,
    pub sum: f64,
    pub count: i64,
    pub wsum: f64,
    pub sumtime: i64,
}

impl DayAggregate {
    pub fn add(&mut self, timestamp: i64, value: f64, weight: i64) {
        if self.min.map_or(true, |m| value < m) {
            self.min = Some(value);
            self.min_time = Some(timestamp);
        }
        if self.max.map_or(true, |m| value > m) {
            self.max = Some(value);
            self.max_time = Some(timestamp);
        }
        self.sum += value;
        self.count += 1;
        self.wsum += value * weight as f64;
        self.sumtime += weight;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn avg(&self) -> Option<f64> {
        if self.sumtime > 0 {
            Some(self.wsum / self.sumtime as f64)
        } else {
            None
        }
    }
}

/// All summarised columns for one day.
#[derive(Debug, Clone, PartialEq)]
pub struct DaySummary {
    pub day_start: i64,
    pub aggregates: BTreeMap<Arc<str>, DayAggregate>,
}

impl DaySummary {
    pub fn new(day_start: i64) -> Self {
        Self {
            day_start,
            aggregates: BTreeMap::new(),
        }
    }
}
