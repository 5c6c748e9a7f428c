// rf2_import/src/effective_time.rs

use once_cell::sync::Lazy;
use regex::Regex;

static EFFECTIVE_DATE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8}$").unwrap());

/// Parse an RF2 effectiveTime column value. Empty strings and anything not
/// shaped `YYYYMMDD` are unreleased content.
pub fn effective_time_from_column(effective_time: &str) -> Option<i32> {
    if effective_time.is_empty() || !EFFECTIVE_DATE_PATTERN.is_match(effective_time) {
        return None;
    }
    effective_time.parse::<i32>().ok()
}

/// RF2 encodes activity as "1"; anything else is inactive.
pub fn is_active(active: &str) -> bool {
    active == "1"
}

/// Observes every effectiveTime seen during an ingest and keeps the
/// maximum, reported back as the release version created.
#[derive(Debug, Default)]
pub struct MaxEffectiveTimeCollector {
    max: Option<i32>,
}

impl MaxEffectiveTimeCollector {
    pub fn new() -> Self {
        MaxEffectiveTimeCollector::default()
    }

    pub fn add(&mut self, effective_time: i32) {
        if self.max.map_or(true, |max| effective_time > max) {
            self.max = Some(effective_time);
        }
    }

    pub fn max_effective_time(&self) -> Option<i32> {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_time_column_parsing() {
        assert_eq!(effective_time_from_column("20230731"), Some(20230731));
        assert_eq!(effective_time_from_column(""), None);
        assert_eq!(effective_time_from_column("2023-07-31"), None);
        assert_eq!(effective_time_from_column("202307"), None);
    }

    #[test]
    fn active_column_parsing() {
        assert!(is_active("1"));
        assert!(!is_active("0"));
        assert!(!is_active(""));
        assert!(!is_active("true"));
    }

    #[test]
    fn collector_keeps_the_maximum() {
        let mut collector = MaxEffectiveTimeCollector::new();
        assert_eq!(collector.max_effective_time(), None);
        collector.add(20220131);
        collector.add(20230131);
        collector.add(20210131);
        assert_eq!(collector.max_effective_time(), Some(20230131));
    }
}
