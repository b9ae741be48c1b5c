use chrono::{Days, NaiveDate};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::features::FeatureSampler;
use crate::model::{LoadedModel, ModelError};
use crate::types::ForecastPoint;

pub const HORIZON_DAYS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("invalid blend policy: {0}")]
    Policy(String),
    #[error("date overflow {0} days after {1}")]
    DateOverflow(u64, NaiveDate),
}

fn default_model_weight() -> f64 {
    0.7
}

fn default_noise_sd() -> f64 {
    10.0
}

/// How each day's model output becomes the published value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BlendPolicy {
    /// Model output as is.
    Raw,
    /// `w * model + (1 - w) * max(0, base + N(0, sd))`, where `base` starts at the
    /// live index and then follows the published values.
    Blended {
        #[serde(default = "default_model_weight")]
        model_weight: f64,
        #[serde(default = "default_noise_sd")]
        noise_sd: f64,
    },
}

impl Default for BlendPolicy {
    fn default() -> Self {
        BlendPolicy::Blended {
            model_weight: default_model_weight(),
            noise_sd: default_noise_sd(),
        }
    }
}

pub struct ForecastGenerator<'a, R> {
    model: &'a LoadedModel,
    policy: BlendPolicy,
    sampler: FeatureSampler<R>,
}

impl<'a, R: Rng> ForecastGenerator<'a, R> {
    pub fn new(model: &'a LoadedModel, policy: BlendPolicy, rng: R) -> Self {
        Self {
            model,
            policy,
            sampler: FeatureSampler::new(rng),
        }
    }

    /// One point per day for the [`HORIZON_DAYS`] days after `today`.
    pub fn generate(
        &mut self,
        today: NaiveDate,
        base_aqi: f64,
    ) -> Result<Vec<ForecastPoint>, ForecastError> {
        let noise = match self.policy {
            BlendPolicy::Raw => None,
            BlendPolicy::Blended {
                model_weight,
                noise_sd,
            } => {
                if !(0.0..=1.0).contains(&model_weight) {
                    return Err(ForecastError::Policy(format!(
                        "model_weight {} outside [0, 1]",
                        model_weight
                    )));
                }
                let n = Normal::new(0.0, noise_sd)
                    .map_err(|e| ForecastError::Policy(format!("noise_sd {}: {}", noise_sd, e)))?;
                Some((model_weight, n))
            }
        };

        let mut base = base_aqi;
        let mut out = Vec::with_capacity(HORIZON_DAYS as usize);
        for i in 1..=HORIZON_DAYS {
            let date = today
                .checked_add_days(Days::new(i))
                .ok_or(ForecastError::DateOverflow(i, today))?;
            let row = self.sampler.sample_row(self.model.feature_names());
            let pred = self.model.predict(&row)?;
            let value = match &noise {
                None => pred,
                Some((w, n)) => {
                    let daily = (base + n.sample(self.sampler.rng_mut())).max(0.0);
                    w * pred + (1.0 - w) * daily
                }
            };
            base = value;
            out.push(ForecastPoint {
                date,
                predicted_index: value,
            });
        }
        tracing::debug!(
            "generated {} points from base {} ({:?})",
            out.len(),
            base_aqi,
            self.policy
        );
        Ok(out)
    }
}
