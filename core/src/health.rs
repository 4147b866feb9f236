//! Capacity plausibility filtering and battery-health arithmetic.
//!
//! Ingestion stores whatever the report said. Charting consumers first
//! discard samples with physically implausible capacities, then summarise
//! health over the newest samples.

use serde::{Deserialize, Serialize};

use crate::types::BatteryRecord;

/// Smallest capacity, in mAh, treated as a real phone battery reading.
pub const PLAUSIBLE_CAPACITY_MIN: i64 = 1000;

/// Largest capacity, in mAh, treated as a real phone battery reading.
pub const PLAUSIBLE_CAPACITY_MAX: i64 = 15000;

/// Number of newest plausible samples averaged by [`HealthSummary::compute`].
pub const HEALTH_WINDOW: usize = 20;

fn charted_capacities(record: &BatteryRecord) -> [i64; 5] {
    [
        record.estimated_battery_capacity,
        record.last_learned_battery_capacity,
        record.min_learned_battery_capacity,
        record.max_learned_battery_capacity,
        record.hardware_capacity,
    ]
}

// Estimated capacity is a live guess and is left out of the average.
fn averaged_capacities(record: &BatteryRecord) -> [i64; 4] {
    [
        record.last_learned_battery_capacity,
        record.min_learned_battery_capacity,
        record.max_learned_battery_capacity,
        record.hardware_capacity,
    ]
}

/// Returns `true` when every charted capacity lies within
/// [`PLAUSIBLE_CAPACITY_MIN`]..=[`PLAUSIBLE_CAPACITY_MAX`].
pub fn is_plausible(record: &BatteryRecord) -> bool {
    charted_capacities(record)
        .iter()
        .all(|cap| (PLAUSIBLE_CAPACITY_MIN..=PLAUSIBLE_CAPACITY_MAX).contains(cap))
}

/// Keeps plausible records, newest first.
pub fn plausible_records(records: &[BatteryRecord]) -> Vec<BatteryRecord> {
    let mut kept: Vec<BatteryRecord> = records.iter().filter(|r| is_plausible(r)).cloned().collect();
    kept.sort_by(|a, b| b.log_capture_time.cmp(&a.log_capture_time));
    kept
}

/// Coarse health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    /// 85% or more of rated capacity.
    Good,
    /// 80% up to 85%.
    Fair,
    /// 60% up to 80%.
    Worn,
    /// Below 60%.
    Poor,
}

impl HealthBand {
    pub fn from_percent(percent: f64) -> Self {
        if percent >= 85.0 {
            Self::Good
        } else if percent >= 80.0 {
            Self::Fair
        } else if percent >= 60.0 {
            Self::Worn
        } else {
            Self::Poor
        }
    }
}

/// Health of one device's battery relative to its rated capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub nickname: String,
    /// Plausible samples that went into the average.
    pub samples: usize,
    pub average_capacity: f64,
    pub rated_capacity: i64,
    pub health_percent: f64,
    pub lost_percent: f64,
    pub band: HealthBand,
}

impl HealthSummary {
    /// Summarises health from one device's records.
    ///
    /// Averages the learned and hardware capacities of the newest
    /// [`HEALTH_WINDOW`] plausible records. `rated` overrides the rated
    /// capacity; otherwise the newest record's `design_capacity` is used.
    ///
    /// Returns `None` when no record is plausible or the rated capacity is
    /// not positive.
    ///
    /// # Examples
    ///
    /// ```
    /// use bugreport_battery_core::{HealthBand, HealthSummary, validate_record};
    /// # use bugreport_battery_core::RecordMap;
    /// # let map: RecordMap = serde_json::from_str(r#"{
    /// #   "log_capture_time": "2024-01-01 00:00:00", "phone_brand": "Xiaomi",
    /// #   "nickname": "houji", "system_version": "OS1.0",
    /// #   "estimated_battery_capacity": 4000, "last_learned_battery_capacity": 4000,
    /// #   "min_learned_battery_capacity": 4000, "max_learned_battery_capacity": 4000,
    /// #   "cycle_count": 300, "hardware_capacity": 4000, "design_capacity": 5000
    /// # }"#).unwrap();
    /// let record = validate_record(&map).unwrap();
    /// let summary = HealthSummary::compute(&[record], None).unwrap();
    /// assert_eq!(summary.health_percent, 80.0);
    /// assert_eq!(summary.band, HealthBand::Fair);
    /// ```
    pub fn compute(records: &[BatteryRecord], rated: Option<i64>) -> Option<Self> {
        let plausible = plausible_records(records);
        let newest = plausible.first()?;
        let rated_capacity = rated.unwrap_or(newest.design_capacity);
        if rated_capacity <= 0 {
            return None;
        }

        let window = &plausible[..plausible.len().min(HEALTH_WINDOW)];
        let (sum, count) = window
            .iter()
            .flat_map(averaged_capacities)
            .fold((0i64, 0usize), |(sum, count), cap| (sum + cap, count + 1));
        let average_capacity = round2(sum as f64 / count as f64);

        let health_percent = round2(average_capacity / rated_capacity as f64 * 100.0).max(0.0);
        let lost_percent = if health_percent >= 100.0 {
            0.0
        } else {
            round2(100.0 - health_percent)
        };

        Some(Self {
            nickname: newest.nickname.clone(),
            samples: window.len(),
            average_capacity,
            rated_capacity,
            health_percent,
            lost_percent,
            band: HealthBand::from_percent(health_percent),
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_capture_time;

    fn record(time: &str, cap: i64, design: i64) -> BatteryRecord {
        BatteryRecord {
            log_capture_time: parse_capture_time(time).unwrap(),
            phone_brand: "Xiaomi".into(),
            nickname: "houji".into(),
            system_version: "OS1.0.5.0.UNCCNXM".into(),
            estimated_battery_capacity: cap,
            last_learned_battery_capacity: cap,
            min_learned_battery_capacity: cap,
            max_learned_battery_capacity: cap,
            cycle_count: 10,
            hardware_capacity: cap,
            design_capacity: design,
        }
    }

    #[test]
    fn test_plausibility_bounds_inclusive() {
        assert!(is_plausible(&record("2024-01-01 00:00:00", 1000, 5000)));
        assert!(is_plausible(&record("2024-01-01 00:00:00", 15000, 5000)));
        assert!(!is_plausible(&record("2024-01-01 00:00:00", 999, 5000)));
        assert!(!is_plausible(&record("2024-01-01 00:00:00", 15001, 5000)));
    }

    #[test]
    fn test_single_implausible_field_excludes_record() {
        let mut r = record("2024-01-01 00:00:00", 4500, 5000);
        r.hardware_capacity = 45;
        assert!(!is_plausible(&r));
    }

    #[test]
    fn test_plausible_records_sorted_newest_first() {
        let records = vec![
            record("2024-01-01 00:00:00", 4500, 5000),
            record("2024-03-01 00:00:00", 4400, 5000),
            record("2024-02-01 00:00:00", 20, 5000),
        ];
        let kept = plausible_records(&records);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].capture_time_string(), "2024-03-01 00:00:00");
    }

    #[test]
    fn test_health_uses_newest_window_only() {
        let mut records = Vec::new();
        for day in 1..=25 {
            let cap = if day > 5 { 4500 } else { 1000 };
            records.push(record(&format!("2024-01-{day:02} 00:00:00"), cap, 5000));
        }
        let summary = HealthSummary::compute(&records, None).unwrap();
        assert_eq!(summary.samples, HEALTH_WINDOW);
        assert_eq!(summary.average_capacity, 4500.0);
        assert_eq!(summary.health_percent, 90.0);
        assert_eq!(summary.lost_percent, 10.0);
        assert_eq!(summary.band, HealthBand::Good);
    }

    #[test]
    fn test_health_rated_override_and_clamping() {
        let records = vec![record("2024-01-01 00:00:00", 5200, 5000)];
        let summary = HealthSummary::compute(&records, Some(5000)).unwrap();
        assert_eq!(summary.health_percent, 104.0);
        assert_eq!(summary.lost_percent, 0.0);

        let summary = HealthSummary::compute(&records, Some(10400)).unwrap();
        assert_eq!(summary.rated_capacity, 10400);
        assert_eq!(summary.health_percent, 50.0);
        assert_eq!(summary.band, HealthBand::Poor);
    }

    #[test]
    fn test_health_none_without_usable_data() {
        assert!(HealthSummary::compute(&[], None).is_none());
        let records = vec![record("2024-01-01 00:00:00", 4500, 0)];
        assert!(HealthSummary::compute(&records, None).is_none());
    }

    #[test]
    fn test_band_thresholds() {
        assert_eq!(HealthBand::from_percent(85.0), HealthBand::Good);
        assert_eq!(HealthBand::from_percent(84.99), HealthBand::Fair);
        assert_eq!(HealthBand::from_percent(80.0), HealthBand::Fair);
        assert_eq!(HealthBand::from_percent(79.99), HealthBand::Worn);
        assert_eq!(HealthBand::from_percent(60.0), HealthBand::Worn);
        assert_eq!(HealthBand::from_percent(59.99), HealthBand::Poor);
    }
}
