//! Response delays: fixed or sampled from a distribution.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DelayDistribution {
    Uniform { lower: u64, upper: u64 },
    Lognormal { median: f64, sigma: f64 },
    Fixed { milliseconds: u64 },
}

impl DelayDistribution {
    pub fn sample_millis(&self) -> u64 {
        let mut rng = rand::thread_rng();
        self.sample_millis_with(&mut rng)
    }

    pub fn sample_millis_with(&self, rng: &mut impl Rng) -> u64 {
        match *self {
            DelayDistribution::Fixed { milliseconds } => milliseconds,
            DelayDistribution::Uniform { lower, upper } => {
                if upper <= lower {
                    lower
                } else {
                    rng.gen_range(lower..=upper)
                }
            }
            DelayDistribution::Lognormal { median, sigma } => {
                // Box-Muller for a standard normal sample.
                let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
                let u2: f64 = rng.gen();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                let value = median * (sigma * z).exp();
                if value.is_finite() && value > 0.0 {
                    value.round() as u64
                } else {
                    0
                }
            }
        }
    }
}

/// Sleep for `millis`, returning false if `cancel` fired first.
pub async fn delay(millis: u64, cancel: &CancellationToken) -> bool {
    if millis == 0 {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(millis)) => true,
        _ = cancel.cancelled() => false,
    }
}
