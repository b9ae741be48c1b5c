//! Live reading client for the WAQI city feed.
//!
//! One GET per pipeline run. Every failure collapses into an absence signal
//! and the caller falls back to a fixed index.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::FeedConfig;
use crate::types::{DailyAverage, LiveReading, SubReading};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed returned HTTP {0}")]
    HttpStatus(u16),
    #[error("feed status was {0:?}")]
    Status(String),
    #[error("malformed feed body: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct FeedData {
    aqi: i64,
    #[serde(default)]
    iaqi: BTreeMap<String, SubReading>,
    // Kept loose so a bad history block never costs us the live index.
    #[serde(default)]
    forecast: serde_json::Value,
}

/// Daily pm25 averages from `forecast.daily.pm25`; unusable entries are skipped.
fn parse_history(forecast: &serde_json::Value) -> Vec<DailyAverage> {
    let Some(entries) = forecast
        .pointer("/daily/pm25")
        .and_then(serde_json::Value::as_array)
    else {
        if !forecast.is_null() {
            tracing::debug!("feed forecast has no daily pm25 list");
        }
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|e| match DailyAverage::deserialize(e) {
            Ok(d) => Some(d),
            Err(err) => {
                tracing::debug!("skipping pm25 history entry {}: {}", e, err);
                None
            }
        })
        .collect()
}

/// Parse a feed response body.
pub fn parse_feed(body: &[u8]) -> Result<LiveReading, FeedError> {
    let env: Envelope = serde_json::from_slice(body)?;
    if env.status != "ok" {
        return Err(FeedError::Status(env.status));
    }
    let data: FeedData = serde_json::from_value(env.data)?;
    Ok(LiveReading {
        index: data.aqi,
        sub_readings: data.iaqi,
        history: parse_history(&data.forecast),
    })
}

pub struct LiveClient {
    cfg: FeedConfig,
    http: Client,
}

impl LiveClient {
    pub fn new(cfg: FeedConfig) -> Self {
        Self {
            cfg,
            http: Client::new(),
        }
    }

    pub fn url(&self) -> String {
        format!(
            "{}/{}/?token={}",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.city,
            self.cfg.token
        )
    }

    pub async fn try_fetch(&self) -> Result<LiveReading, FeedError> {
        let resp = self.http.get(self.url()).send().await?;
        if !resp.status().is_success() {
            return Err(FeedError::HttpStatus(resp.status().as_u16()));
        }
        let body = resp.bytes().await?;
        parse_feed(&body)
    }

    /// Fetch the current reading, or `None` if anything went wrong.
    pub async fn fetch(&self) -> Option<LiveReading> {
        match self.try_fetch().await {
            Ok(r) => {
                tracing::info!(
                    "live aqi for {} = {} ({} sub-readings)",
                    self.cfg.location_name,
                    r.index,
                    r.sub_readings.len()
                );
                Some(r)
            }
            Err(e) => {
                tracing::warn!("live aqi unavailable for {}: {}", self.cfg.location_name, e);
                None
            }
        }
    }
}

/// The headline index a pipeline run works from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum LiveStatus {
    Feed { reading: LiveReading },
    Fallback { index: i64 },
}

impl LiveStatus {
    pub fn resolve(reading: Option<LiveReading>, fallback: i64) -> Self {
        match reading {
            Some(reading) => LiveStatus::Feed { reading },
            None => LiveStatus::Fallback { index: fallback },
        }
    }

    pub fn index(&self) -> i64 {
        match self {
            LiveStatus::Feed { reading } => reading.index,
            LiveStatus::Fallback { index } => *index,
        }
    }

    pub fn reading(&self) -> Option<&LiveReading> {
        match self {
            LiveStatus::Feed { reading } => Some(reading),
            LiveStatus::Fallback { .. } => None,
        }
    }

    /// Non-blocking notice shown alongside the dashboard when the feed was down.
    pub fn warning(&self) -> Option<String> {
        match self {
            LiveStatus::Feed { .. } => None,
            LiveStatus::Fallback { index } => {
                Some(format!("Live AQI unavailable, using fallback {}.", index))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK_BODY: &str = r#"{
        "status": "ok",
        "data": {
            "aqi": 187,
            "idx": 8673,
            "iaqi": {
                "pm25": {"v": 187},
                "pm10": {"v": 96.5},
                "no2": {"v": 12.3},
                "t": {"v": 24}
            },
            "forecast": {"daily": {"pm25": [
                {"avg": 170, "day": "2025-11-02", "max": 190, "min": 150},
                {"avg": 182, "day": "2025-11-03", "max": 201, "min": 160}
            ]}}
        }
    }"#;

    #[test]
    fn ok_body_is_returned_unmodified() {
        let r = parse_feed(OK_BODY.as_bytes()).unwrap();
        assert_eq!(r.index, 187);
        assert_eq!(r.sub_readings.len(), 4);
        assert_eq!(r.sub_readings["pm10"], SubReading { v: 96.5 });
        assert_eq!(r.sub_readings["t"], SubReading { v: 24.0 });
        assert_eq!(r.history.len(), 2);
        assert_eq!(r.history[1].avg, 182.0);
    }

    #[test]
    fn ok_without_iaqi_or_forecast() {
        let r = parse_feed(br#"{"status":"ok","data":{"aqi":42}}"#).unwrap();
        assert_eq!(r.index, 42);
        assert!(r.sub_readings.is_empty());
        assert!(r.history.is_empty());
    }

    #[test]
    fn broken_history_keeps_the_live_index() {
        let r = parse_feed(
            br#"{"status":"ok","data":{"aqi":187,"iaqi":{"pm25":{"v":187}},"forecast":null}}"#,
        )
        .unwrap();
        assert_eq!(r.index, 187);
        assert_eq!(r.sub_readings["pm25"], SubReading { v: 187.0 });
        assert!(r.history.is_empty());

        let r = parse_feed(
            br#"{"status":"ok","data":{"aqi":187,"iaqi":{"pm25":{"v":187}},
                "forecast":{"daily":{"pm25":[
                    {"day":"2025-11-02","max":190},
                    {"avg":182,"day":"2025-11-03"}
                ]}}}}"#,
        )
        .unwrap();
        assert_eq!(r.index, 187);
        assert_eq!(r.history.len(), 1);
        assert_eq!(r.history[0].avg, 182.0);

        let r = parse_feed(br#"{"status":"ok","data":{"aqi":90,"forecast":{"daily":"n/a"}}}"#).unwrap();
        assert_eq!(r.index, 90);
        assert!(r.history.is_empty());
    }

    #[test]
    fn error_status_is_absent() {
        let err = parse_feed(br#"{"status":"error","data":"Invalid key"}"#).unwrap_err();
        assert!(matches!(err, FeedError::Status(s) if s == "error"));
    }

    #[test]
    fn non_numeric_aqi_is_malformed() {
        // The feed reports "-" when a station has no current value.
        let err = parse_feed(br#"{"status":"ok","data":{"aqi":"-"}}"#).unwrap_err();
        assert!(matches!(err, FeedError::Malformed(_)));
        assert!(parse_feed(b"<html>").is_err());
        assert!(parse_feed(br#"{"status":"ok"}"#).is_err());
    }

    #[test]
    fn fallback_is_exactly_the_configured_index() {
        let st = LiveStatus::resolve(None, 160);
        assert_eq!(st.index(), 160);
        assert!(st.reading().is_none());
        assert!(st.warning().unwrap().contains("160"));

        let st = LiveStatus::resolve(parse_feed(OK_BODY.as_bytes()).ok(), 160);
        assert_eq!(st.index(), 187);
        assert!(st.warning().is_none());
    }

    #[test]
    fn url_embeds_city_and_token() {
        let c = LiveClient::new(FeedConfig {
            base_url: "http://127.0.0.1:9/feed/".into(),
            city: "geo:1;2".into(),
            token: "tok".into(),
            location_name: "x".into(),
        });
        assert_eq!(c.url(), "http://127.0.0.1:9/feed/geo:1;2/?token=tok");
    }
}
