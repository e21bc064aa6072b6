use crate::core::constants::DEFAULT_TEMP;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// How long each lambda window is simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "RawProtocol")]
pub struct SimulationProtocol {
    burn_in: usize,
    n_frames: usize,
    steps_per_frame: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawProtocol {
    #[serde(default)]
    burn_in: usize,
    n_frames: usize,
    steps_per_frame: usize,
}

impl TryFrom<RawProtocol> for SimulationProtocol {
    type Error = ConfigError;

    fn try_from(raw: RawProtocol) -> Result<Self, Self::Error> {
        Self::new(raw.burn_in, raw.n_frames, raw.steps_per_frame)
    }
}

impl SimulationProtocol {
    pub fn new(burn_in: usize, n_frames: usize, steps_per_frame: usize) -> Result<Self, ConfigError> {
        if n_frames < 1 {
            return Err(ConfigError::InvalidValue {
                name: "n_frames",
                reason: "must be at least 1".to_string(),
            });
        }
        if steps_per_frame < 1 {
            return Err(ConfigError::InvalidValue {
                name: "steps_per_frame",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            burn_in,
            n_frames,
            steps_per_frame,
        })
    }

    pub fn burn_in(&self) -> usize {
        self.burn_in
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn steps_per_frame(&self) -> usize {
        self.steps_per_frame
    }

    pub fn production_steps(&self) -> usize {
        self.n_frames * self.steps_per_frame
    }
}

impl Default for SimulationProtocol {
    fn default() -> Self {
        Self {
            burn_in: 10_000,
            n_frames: 1_000,
            steps_per_frame: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BootstrapConfig {
    pub n_bootstrap: usize,
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            n_bootstrap: 100,
            seed: 2024,
        }
    }
}

/// Settings shared by the runner and the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationConfig {
    pub temperature: f64,
    /// Lambda indices whose trajectories are retained in the result.
    pub keep_idxs: BTreeSet<usize>,
    /// Streams production frames to disk in batches of this size when set.
    pub max_buffer_frames: Option<usize>,
    pub bootstrap: BootstrapConfig,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMP,
            keep_idxs: BTreeSet::new(),
            max_buffer_frames: None,
            bootstrap: BootstrapConfig::default(),
        }
    }
}

#[derive(Default)]
pub struct EstimationConfigBuilder {
    temperature: Option<f64>,
    keep_idxs: Option<BTreeSet<usize>>,
    max_buffer_frames: Option<usize>,
    n_bootstrap: Option<usize>,
    bootstrap_seed: Option<u64>,
}

impl EstimationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temperature(mut self, kelvin: f64) -> Self {
        self.temperature = Some(kelvin);
        self
    }
    pub fn keep_idxs<I: IntoIterator<Item = usize>>(mut self, idxs: I) -> Self {
        self.keep_idxs = Some(idxs.into_iter().collect());
        self
    }
    pub fn max_buffer_frames(mut self, n: usize) -> Self {
        self.max_buffer_frames = Some(n);
        self
    }
    pub fn n_bootstrap(mut self, n: usize) -> Self {
        self.n_bootstrap = Some(n);
        self
    }
    pub fn bootstrap_seed(mut self, seed: u64) -> Self {
        self.bootstrap_seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<EstimationConfig, ConfigError> {
        let temperature = self
            .temperature
            .ok_or(ConfigError::MissingParameter("temperature"))?;
        if !(temperature > 0.0) || !temperature.is_finite() {
            return Err(ConfigError::InvalidValue {
                name: "temperature",
                reason: format!("{temperature} K is not a positive finite temperature"),
            });
        }
        if self.max_buffer_frames == Some(0) {
            return Err(ConfigError::InvalidValue {
                name: "max_buffer_frames",
                reason: "must be at least 1".to_string(),
            });
        }
        let defaults = BootstrapConfig::default();
        let n_bootstrap = self.n_bootstrap.unwrap_or(defaults.n_bootstrap);
        if n_bootstrap < 1 {
            return Err(ConfigError::InvalidValue {
                name: "n_bootstrap",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(EstimationConfig {
            temperature,
            keep_idxs: self.keep_idxs.unwrap_or_default(),
            max_buffer_frames: self.max_buffer_frames,
            bootstrap: BootstrapConfig {
                n_bootstrap,
                seed: self.bootstrap_seed.unwrap_or(defaults.seed),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_rejects_zero_frames_and_zero_stride() {
        assert!(matches!(
            SimulationProtocol::new(0, 0, 1),
            Err(ConfigError::InvalidValue { name: "n_frames", .. })
        ));
        assert!(matches!(
            SimulationProtocol::new(0, 1, 0),
            Err(ConfigError::InvalidValue { name: "steps_per_frame", .. })
        ));
    }

    #[test]
    fn protocol_production_steps_is_frames_times_stride() {
        let protocol = SimulationProtocol::new(100, 20, 50).unwrap();
        assert_eq!(protocol.production_steps(), 1000);
        assert_eq!(protocol.burn_in(), 100);
    }

    #[test]
    fn builder_requires_temperature() {
        assert_eq!(
            EstimationConfigBuilder::new().build().unwrap_err(),
            ConfigError::MissingParameter("temperature")
        );
    }

    #[test]
    fn builder_applies_bootstrap_defaults() {
        let config = EstimationConfigBuilder::new()
            .temperature(300.0)
            .keep_idxs([0, 4])
            .build()
            .unwrap();
        assert_eq!(config.bootstrap, BootstrapConfig::default());
        assert_eq!(config.bootstrap.n_bootstrap, 100);
        assert_eq!(config.bootstrap.seed, 2024);
        assert_eq!(config.keep_idxs.into_iter().collect::<Vec<_>>(), vec![0, 4]);
    }

    #[test]
    fn builder_rejects_zero_buffer() {
        let result = EstimationConfigBuilder::new()
            .temperature(300.0)
            .max_buffer_frames(0)
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { name: "max_buffer_frames", .. })
        ));
    }

    #[test]
    fn protocol_deserializes_from_kebab_case_toml() {
        let protocol: SimulationProtocol =
            toml::from_str("burn-in = 10\nn-frames = 5\nsteps-per-frame = 2").unwrap();
        assert_eq!(protocol.n_frames(), 5);
    }

    #[test]
    fn protocol_deserialization_is_validated() {
        let result: Result<SimulationProtocol, _> =
            toml::from_str("n-frames = 0\nsteps-per-frame = 2");
        assert!(result.is_err());
    }
}
