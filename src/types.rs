use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One pollutant's instantaneous reading, as the feed reports it under `iaqi`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubReading {
    pub v: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAverage {
    pub day: NaiveDate,
    pub avg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveReading {
    pub index: i64,
    pub sub_readings: BTreeMap<String, SubReading>, // pollutant code -> reading
    pub history: Vec<DailyAverage>,                 // daily pm25 averages, may be empty
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted_index: f64,
}
