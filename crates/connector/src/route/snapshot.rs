use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Percentage of travel time saved by the optimized route.
///
/// `None` when `baseline` is zero or either input is not finite.
pub fn percent_saved(baseline: f64, optimized: f64) -> Option<f64> {
    if baseline == 0.0 || !baseline.is_finite() || !optimized.is_finite() {
        return None;
    }
    Some((baseline - optimized) / baseline * 100.0)
}

/// Most recent `route` payload, kept verbatim.
///
/// The payload is not validated; accessors return `None` (or empty) for
/// missing or mistyped fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteSnapshot(Value);

impl RouteSnapshot {
    pub fn new(payload: Value) -> Self {
        Self(payload)
    }

    pub fn payload(&self) -> &Value {
        &self.0
    }

    pub fn into_payload(self) -> Value {
        self.0
    }

    pub fn baseline_eta(&self) -> Option<f64> {
        self.0.get("baseline_eta").and_then(Value::as_f64)
    }

    pub fn optimized_eta(&self) -> Option<f64> {
        self.0.get("optimized_eta").and_then(Value::as_f64)
    }

    /// Derived on demand, never stored
    pub fn percent_saved(&self) -> Option<f64> {
        percent_saved(self.baseline_eta()?, self.optimized_eta()?)
    }

    pub fn trip_id(&self) -> Option<&str> {
        self.0.get("trip_id").and_then(Value::as_str)
    }

    /// `(lat, lon)` pairs; malformed entries are skipped
    pub fn coordinates(&self) -> Vec<(f64, f64)> {
        self.0
            .get("coordinates")
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .filter_map(|point| {
                        let pair = point.as_array()?;
                        Some((pair.first()?.as_f64()?, pair.get(1)?.as_f64()?))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Per-segment speeds
    pub fn speeds(&self) -> Vec<f64> {
        self.0
            .get("speeds")
            .and_then(Value::as_array)
            .map(|speeds| speeds.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default()
    }

    /// Server generation time (`timestamp`, seconds since epoch)
    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.0.get("timestamp").and_then(Value::as_f64)?;
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1e9) as u32;
        DateTime::from_timestamp(whole as i64, nanos)
    }
}

impl From<Value> for RouteSnapshot {
    fn from(payload: Value) -> Self {
        Self::new(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_percent_saved() {
        assert_eq!(percent_saved(100.0, 75.0), Some(25.0));
        assert_eq!(percent_saved(200.0, 200.0), Some(0.0));
        assert_eq!(percent_saved(100.0, 125.0), Some(-25.0));
    }

    #[test]
    fn test_percent_saved_zero_baseline() {
        assert_eq!(percent_saved(0.0, 75.0), None);
        assert_eq!(percent_saved(f64::NAN, 75.0), None);
    }

    #[test]
    fn test_snapshot_accessors() {
        let snapshot = RouteSnapshot::new(json!({
            "trip_id": "T-1042",
            "coordinates": [[37.7749, -122.4194], [37.7755, -122.4180], ["bad"]],
            "speeds": [35.0, 28.5],
            "metadata": {"route_short_name": "38R"},
            "baseline_eta": 70.0,
            "optimized_eta": 63.5,
            "timestamp": 1717171717.5
        }));

        assert_eq!(snapshot.trip_id(), Some("T-1042"));
        assert_eq!(snapshot.coordinates().len(), 2);
        assert_eq!(snapshot.speeds(), vec![35.0, 28.5]);
        assert_eq!(snapshot.baseline_eta(), Some(70.0));
        let saved = snapshot.percent_saved().unwrap();
        assert!((saved - 9.285714).abs() < 1e-4);

        let generated = snapshot.generated_at().unwrap();
        assert_eq!(generated.timestamp(), 1717171717);
        assert_eq!(generated.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_malformed_snapshot_is_kept() {
        let snapshot = RouteSnapshot::new(json!({"baseline_eta": "soon"}));
        assert_eq!(snapshot.baseline_eta(), None);
        assert_eq!(snapshot.percent_saved(), None);
        assert!(snapshot.coordinates().is_empty());
        assert_eq!(snapshot.payload()["baseline_eta"], "soon");

        let snapshot = RouteSnapshot::new(json!("not an object"));
        assert_eq!(snapshot.trip_id(), None);
        assert_eq!(snapshot.generated_at(), None);
    }

    #[test]
    fn test_zero_baseline_snapshot() {
        let snapshot = RouteSnapshot::new(json!({"baseline_eta": 0, "optimized_eta": 10}));
        assert_eq!(snapshot.percent_saved(), None);
    }
}
