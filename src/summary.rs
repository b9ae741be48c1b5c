//! Data behind the dashboard charts. Nothing here draws; it only aggregates.

use chrono::Datelike;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::live::LiveStatus;
use crate::types::{DailyAverage, ForecastPoint, SubReading};

pub const HISTOGRAM_BINS: usize = 15;

/// WHO guideline values, keyed by upper-cased feed code.
pub const WHO_LIMITS: &[(&str, f64)] = &[
    ("PM25", 25.0),
    ("PM10", 50.0),
    ("NO2", 40.0),
    ("O3", 100.0),
    ("SO2", 20.0),
    ("CO", 4.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
}

impl Summary {
    /// `None` for an empty series.
    pub fn from_points(points: &[ForecastPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let vals = points.iter().map(|p| p.predicted_index);
        let sum: f64 = vals.clone().sum();
        Some(Self {
            average: sum / points.len() as f64,
            highest: vals.clone().fold(f64::NEG_INFINITY, f64::max),
            lowest: vals.fold(f64::INFINITY, f64::min),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelledPoint {
    #[serde(flatten)]
    pub point: ForecastPoint,
    pub iso_week: u32,
    pub weekday: String,
}

pub fn label(points: &[ForecastPoint]) -> Vec<LabelledPoint> {
    points
        .iter()
        .map(|p| LabelledPoint {
            point: *p,
            iso_week: p.date.iso_week().week(),
            weekday: p.date.format("%A").to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyAverage {
    pub iso_week: u32,
    pub average: f64,
}

/// Mean per ISO week number, sorted by week number. Across a year boundary
/// week 1 therefore comes before week 52.
pub fn weekly_averages(points: &[ForecastPoint]) -> Vec<WeeklyAverage> {
    let mut groups: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for p in points {
        let g = groups.entry(p.date.iso_week().week()).or_insert((0.0, 0));
        g.0 += p.predicted_index;
        g.1 += 1;
    }
    groups
        .into_iter()
        .map(|(iso_week, (sum, n))| WeeklyAverage {
            iso_week,
            average: sum / n as f64,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bin {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
}

/// Equal-width bins over `[min, max]`; the top bin is closed.
pub fn histogram(points: &[ForecastPoint], bins: usize) -> Vec<Bin> {
    let Some(s) = Summary::from_points(points) else {
        return Vec::new();
    };
    if bins == 0 {
        return Vec::new();
    }
    let width = (s.highest - s.lowest) / bins as f64;
    let mut out: Vec<Bin> = (0..bins)
        .map(|i| Bin {
            lo: s.lowest + width * i as f64,
            hi: if i + 1 == bins {
                s.highest
            } else {
                s.lowest + width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();
    for p in points {
        let idx = if width > 0.0 {
            (((p.predicted_index - s.lowest) / width) as usize).min(bins - 1)
        } else {
            0
        };
        out[idx].count += 1;
    }
    out
}

/// Live pollutant values keyed by upper-cased code.
pub fn pollutant_composition(sub: &BTreeMap<String, SubReading>) -> BTreeMap<String, f64> {
    sub.iter().map(|(k, r)| (k.to_uppercase(), r.v)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhoComparison {
    pub pollutant: String,
    pub live: f64,
    /// 0 when no guideline is known for the code.
    pub who_limit: f64,
}

pub fn who_comparison(sub: &BTreeMap<String, SubReading>) -> Vec<WhoComparison> {
    sub.iter()
        .map(|(k, r)| {
            let key = k.to_uppercase();
            let who_limit = WHO_LIMITS
                .iter()
                .find(|(code, _)| *code == key)
                .map(|(_, l)| *l)
                .unwrap_or(0.0);
            WhoComparison {
                pollutant: key,
                live: r.v,
                who_limit,
            }
        })
        .collect()
}

/// Everything the dashboard page shows for one run.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub location: String,
    pub live: LiveStatus,
    pub warning: Option<String>,
    pub history: Vec<DailyAverage>,
    pub forecast: Vec<LabelledPoint>,
    pub weekly: Vec<WeeklyAverage>,
    pub histogram: Vec<Bin>,
    pub composition: BTreeMap<String, f64>,
    pub who: Vec<WhoComparison>,
    pub summary: Option<Summary>,
}

impl Dashboard {
    pub fn build(location: &str, live: LiveStatus, points: &[ForecastPoint]) -> Self {
        let (history, composition, who) = match live.reading() {
            Some(r) => (
                r.history.clone(),
                pollutant_composition(&r.sub_readings),
                who_comparison(&r.sub_readings),
            ),
            None => (Vec::new(), BTreeMap::new(), Vec::new()),
        };
        Self {
            location: location.to_string(),
            warning: live.warning(),
            live,
            history,
            forecast: label(points),
            weekly: weekly_averages(points),
            histogram: histogram(points, HISTOGRAM_BINS),
            composition,
            who,
            summary: Summary::from_points(points),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series(start: NaiveDate, vals: &[f64]) -> Vec<ForecastPoint> {
        vals.iter()
            .enumerate()
            .map(|(i, v)| ForecastPoint {
                date: start + chrono::Duration::days(i as i64 + 1),
                predicted_index: *v,
            })
            .collect()
    }

    fn monday() -> NaiveDate {
        // 2025-01-05 is a Sunday, so the first point lands on Monday 6th
        NaiveDate::from_ymd_opt(2025, 1, 5).unwrap()
    }

    #[test]
    fn summary_is_plain_mean_max_min() {
        let vals: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64) * 1.7 - (i % 4) as f64 * 9.3).collect();
        let pts = series(monday(), &vals);
        let s = Summary::from_points(&pts).unwrap();
        let sum: f64 = vals.iter().sum();
        assert_eq!(s.average, sum / 30.0);
        assert_eq!(s.highest, vals.iter().cloned().fold(f64::MIN, f64::max));
        assert_eq!(s.lowest, vals.iter().cloned().fold(f64::MAX, f64::min));
        assert!(Summary::from_points(&[]).is_none());
    }

    #[test]
    fn weeks_group_by_iso_week() {
        let vals: Vec<f64> = (0..14).map(|i| if i < 7 { 100.0 } else { 200.0 }).collect();
        let pts = series(monday(), &vals);
        let wk = weekly_averages(&pts);
        assert_eq!(wk.len(), 2);
        assert_eq!(wk[0], WeeklyAverage { iso_week: 2, average: 100.0 });
        assert_eq!(wk[1], WeeklyAverage { iso_week: 3, average: 200.0 });

        let labelled = label(&pts);
        assert_eq!(labelled[0].weekday, "Monday");
        assert_eq!(labelled[6].weekday, "Sunday");
    }

    #[test]
    fn weeks_sort_by_number_across_new_year() {
        // 2025-12-14 is a Sunday; the series runs through ISO weeks 51, 52, 1..4
        let start = NaiveDate::from_ymd_opt(2025, 12, 14).unwrap();
        let vals: Vec<f64> = (0..42).map(|i| (i / 7) as f64 * 10.0).collect();
        let wk = weekly_averages(&series(start, &vals));
        let weeks: Vec<u32> = wk.iter().map(|w| w.iso_week).collect();
        assert_eq!(weeks, vec![1, 2, 3, 4, 51, 52]);
        assert_eq!(wk[4].average, 0.0);
        assert_eq!(wk[0].average, 20.0);
    }

    #[test]
    fn histogram_counts_every_point() {
        let vals: Vec<f64> = (0..30).map(|i| i as f64 * 10.0).collect();
        let pts = series(monday(), &vals);
        let h = histogram(&pts, HISTOGRAM_BINS);
        assert_eq!(h.len(), 15);
        assert_eq!(h.iter().map(|b| b.count).sum::<usize>(), 30);
        assert_eq!(h[0].lo, 0.0);
        assert_eq!(h[14].hi, 290.0);
        assert_eq!(h[14].count, 2);
    }

    #[test]
    fn flat_histogram_lands_in_first_bin() {
        let pts = series(monday(), &[50.0; 5]);
        let h = histogram(&pts, 4);
        assert_eq!(h[0].count, 5);
    }

    #[test]
    fn who_limits_by_uppercased_code() {
        let mut sub = BTreeMap::new();
        sub.insert("pm25".to_string(), SubReading { v: 187.0 });
        sub.insert("co".to_string(), SubReading { v: 3.2 });
        sub.insert("w".to_string(), SubReading { v: 1.5 });
        let who = who_comparison(&sub);
        assert_eq!(who.len(), 3);
        assert_eq!(who[0], WhoComparison { pollutant: "CO".into(), live: 3.2, who_limit: 4.0 });
        assert_eq!(who[1].who_limit, 25.0);
        assert_eq!(who[2].who_limit, 0.0);

        let comp = pollutant_composition(&sub);
        assert_eq!(comp["PM25"], 187.0);
    }

    #[test]
    fn fallback_dashboard_has_no_live_breakdown() {
        let pts = series(monday(), &[120.0, 140.0]);
        let d = Dashboard::build("Lahore, Pakistan", LiveStatus::resolve(None, 160), &pts);
        assert!(d.warning.is_some());
        assert!(d.composition.is_empty());
        assert!(d.who.is_empty());
        assert_eq!(d.summary.unwrap().average, 130.0);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["live"]["source"], "fallback");
        assert_eq!(json["live"]["index"], 160);
        assert_eq!(json["forecast"][0]["iso_week"], 2);
    }
}
