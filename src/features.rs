use rand::Rng;
use serde::Serialize;

/// One simulated day's model inputs, kept in the resolved feature order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    cols: Vec<(String, f64)>,
}

impl FeatureRow {
    pub fn new(cols: Vec<(String, f64)>) -> Self {
        Self { cols }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.cols.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cols.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> Vec<f64> {
        self.cols.iter().map(|(_, v)| *v).collect()
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Values in `order`; names missing from the row read as 0.
    pub fn ordered(&self, order: &[String]) -> Vec<f64> {
        let mut v = Vec::with_capacity(order.len());
        for k in order {
            v.push(self.get(k).unwrap_or(0.0));
        }
        v
    }
}

/// Half-open uniform range `[lo, hi)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRange {
    pub lo: f64,
    pub hi: f64,
}

impl SampleRange {
    const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.lo && x < self.hi
    }
}

pub const DEFAULT_RANGE: SampleRange = SampleRange::new(0.0, 100.0);

// Checked top to bottom; first hit wins. `co` stays after the gas tokens it
// would otherwise shadow.
const TOKEN_RANGES: &[(&str, SampleRange)] = &[
    ("pm2", SampleRange::new(10.0, 250.0)),
    ("pm10", SampleRange::new(20.0, 400.0)),
    ("no2", SampleRange::new(5.0, 120.0)),
    ("o3", SampleRange::new(5.0, 180.0)),
    ("so2", SampleRange::new(1.0, 60.0)),
    ("co", SampleRange::new(0.1, 10.0)),
    ("temp", SampleRange::new(5.0, 45.0)),
    ("humid", SampleRange::new(10.0, 95.0)),
];

// Single-letter feed codes match whole names only.
const SHORT_CODES: &[(&str, SampleRange)] = &[
    ("t", SampleRange::new(5.0, 45.0)),
    ("h", SampleRange::new(10.0, 95.0)),
];

/// Plausible range for a feature, picked by case-insensitive token match.
pub fn range_for(name: &str) -> SampleRange {
    let lower = name.to_ascii_lowercase();
    for (tok, r) in TOKEN_RANGES {
        if lower.contains(tok) {
            return *r;
        }
    }
    for (code, r) in SHORT_CODES {
        if lower == *code {
            return *r;
        }
    }
    DEFAULT_RANGE
}

pub struct FeatureSampler<R> {
    rng: R,
}

impl<R: Rng> FeatureSampler<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    pub fn sample(&mut self, name: &str) -> f64 {
        let r = range_for(name);
        self.rng.gen_range(r.lo..r.hi)
    }

    pub fn sample_row(&mut self, names: &[String]) -> FeatureRow {
        FeatureRow::new(names.iter().map(|n| (n.clone(), self.sample(n))).collect())
    }

    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn dispatch_is_case_insensitive_substring() {
        assert_eq!(range_for("PM2.5_lag1"), SampleRange::new(10.0, 250.0));
        assert_eq!(range_for("pm25"), SampleRange::new(10.0, 250.0));
        assert_eq!(range_for("PM10"), SampleRange::new(20.0, 400.0));
        assert_eq!(range_for("avg_NO2"), SampleRange::new(5.0, 120.0));
        assert_eq!(range_for("O3"), SampleRange::new(5.0, 180.0));
        assert_eq!(range_for("so2_max"), SampleRange::new(1.0, 60.0));
        assert_eq!(range_for("CO"), SampleRange::new(0.1, 10.0));
        assert_eq!(range_for("Temperature"), SampleRange::new(5.0, 45.0));
        assert_eq!(range_for("humidity"), SampleRange::new(10.0, 95.0));
        assert_eq!(range_for("T"), SampleRange::new(5.0, 45.0));
        assert_eq!(range_for("h"), SampleRange::new(10.0, 95.0));
        assert_eq!(range_for("wind_speed"), DEFAULT_RANGE);
        assert_eq!(range_for("month"), DEFAULT_RANGE);
    }

    #[test]
    fn overlapping_tokens_take_the_first_match() {
        // contains both "o3" and "co"; "o3" is earlier in the table
        assert_eq!(range_for("co_o3_ratio"), SampleRange::new(5.0, 180.0));
        // "so2" also ends in "o2" but not "no2"
        assert_eq!(range_for("so2"), SampleRange::new(1.0, 60.0));
    }

    #[test]
    fn samples_stay_in_range() {
        let mut s = FeatureSampler::new(StdRng::seed_from_u64(42));
        for name in ["pm25", "pm10", "no2", "o3", "so2", "co", "temp", "t", "humidity", "h", "other"] {
            let r = range_for(name);
            for _ in 0..1000 {
                let x = s.sample(name);
                assert!(r.contains(x), "{} sampled {} outside {:?}", name, x, r);
            }
        }
    }

    #[test]
    fn same_seed_same_row() {
        let names: Vec<String> = ["pm25", "no2", "t"].iter().map(|s| s.to_string()).collect();
        let a = FeatureSampler::new(StdRng::seed_from_u64(9)).sample_row(&names);
        let b = FeatureSampler::new(StdRng::seed_from_u64(9)).sample_row(&names);
        assert_eq!(a, b);
        assert_eq!(a.names().collect::<Vec<_>>(), vec!["pm25", "no2", "t"]);
    }

    #[test]
    fn ordered_fills_missing_with_zero() {
        let row = FeatureRow::new(vec![("b".into(), 2.0), ("a".into(), 1.0)]);
        let order = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(row.ordered(&order), vec![1.0, 2.0, 0.0]);
    }
}
