use crate::cli::EstimateArgs;
use crate::error::{CliError, Result};
use fepkit::core::models::state::orthorhombic_box;
use fepkit::core::potentials::Potential;
use fepkit::engine::config::{EstimationConfigBuilder, SimulationProtocol};
use fepkit::workflows::relative::{
    AlchemicalSystem, BarostatSettings, DynamicsSettings, RelativeFreeEnergyConfig,
};
use nalgebra::Vector3;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const DEFAULT_SEED: u64 = 2024;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialSystem {
    name: String,
    masses: Vec<f64>,
    x0: Vec<[f64; 3]>,
    /// Orthorhombic box edge lengths in nm.
    #[serde(rename = "box")]
    box_lengths: [f64; 3],
    ligand_idxs: Vec<usize>,
    potentials_a: Vec<Potential>,
    potentials_b: Vec<Potential>,
}

impl From<PartialSystem> for AlchemicalSystem {
    fn from(p: PartialSystem) -> Self {
        Self {
            name: p.name,
            potentials_a: p.potentials_a,
            potentials_b: p.potentials_b,
            masses: p.masses,
            x0: p.x0.into_iter().map(Vector3::from).collect(),
            box0: orthorhombic_box(p.box_lengths),
            ligand_idxs: p.ligand_idxs,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialProtocol {
    burn_in: Option<usize>,
    n_frames: Option<usize>,
    steps_per_frame: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialEstimation {
    temperature: Option<f64>,
    keep_idxs: Option<Vec<usize>>,
    max_buffer_frames: Option<usize>,
    n_bootstrap: Option<usize>,
    bootstrap_seed: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialBarostat {
    enabled: Option<bool>,
    pressure: Option<f64>,
    interval: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialDynamics {
    dt: Option<f64>,
    friction: Option<f64>,
    barostat: Option<PartialBarostat>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PartialRunConfig {
    prefix: Option<String>,
    seed: Option<u64>,
    lambda_schedule: Option<Vec<f64>>,
    system: Option<PartialSystem>,
    protocol: Option<PartialProtocol>,
    estimation: Option<PartialEstimation>,
    dynamics: Option<PartialDynamics>,
}

/// Everything the `estimate` command needs, fully resolved.
#[derive(Debug)]
pub struct RunConfig {
    pub system: AlchemicalSystem,
    pub relative: RelativeFreeEnergyConfig,
}

fn parse_value<T: FromStr>(key: &str, value: &str, kind: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid {kind} value for {key}: {value}")))
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn merge_with_cli(mut self, args: &EstimateArgs) -> Result<RunConfig> {
        self.apply_set_values(&args.set_values)?;

        let system: AlchemicalSystem = self
            .system
            .take()
            .ok_or_else(|| CliError::Config("`system` section is required.".to_string()))?
            .into();

        let protocol = self.protocol.take().unwrap_or_default();
        let defaults = SimulationProtocol::default();
        let protocol = SimulationProtocol::new(
            protocol.burn_in.unwrap_or(defaults.burn_in()),
            args.n_frames
                .or(protocol.n_frames)
                .unwrap_or(defaults.n_frames()),
            protocol.steps_per_frame.unwrap_or(defaults.steps_per_frame()),
        )
        .map_err(|e| CliError::Config(e.to_string()))?;

        let estimation = self.estimation.take().unwrap_or_default();
        let mut builder = EstimationConfigBuilder::new()
            .temperature(estimation.temperature.unwrap_or(fepkit::core::constants::DEFAULT_TEMP));
        if let Some(keep_idxs) = estimation.keep_idxs {
            builder = builder.keep_idxs(keep_idxs);
        }
        if let Some(n) = args.max_buffer_frames.or(estimation.max_buffer_frames) {
            builder = builder.max_buffer_frames(n);
        }
        if let Some(n) = estimation.n_bootstrap {
            builder = builder.n_bootstrap(n);
        }
        if let Some(seed) = estimation.bootstrap_seed {
            builder = builder.bootstrap_seed(seed);
        }
        let estimation = builder.build().map_err(|e| CliError::Config(e.to_string()))?;

        let dynamics = Self::merge_dynamics(self.dynamics.take());

        let relative = RelativeFreeEnergyConfig {
            prefix: args.prefix.clone().or(self.prefix).unwrap_or_default(),
            protocol,
            estimation,
            dynamics,
            lambda_schedule: self.lambda_schedule,
            seed: args.seed.or(self.seed).unwrap_or(DEFAULT_SEED),
        };
        Ok(RunConfig { system, relative })
    }

    fn merge_dynamics(partial: Option<PartialDynamics>) -> DynamicsSettings {
        let defaults = DynamicsSettings::default();
        let Some(partial) = partial else {
            return defaults;
        };
        let barostat = match partial.barostat {
            Some(PartialBarostat {
                enabled: Some(false),
                ..
            }) => None,
            Some(b) => {
                let d = BarostatSettings::default();
                Some(BarostatSettings {
                    pressure: b.pressure.unwrap_or(d.pressure),
                    interval: b.interval.unwrap_or(d.interval),
                })
            }
            None => defaults.barostat,
        };
        DynamicsSettings {
            dt: partial.dt.unwrap_or(defaults.dt),
            friction: partial.friction.unwrap_or(defaults.friction),
            barostat,
        }
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value_str)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };

            match key {
                "prefix" => self.prefix = Some(value_str.to_string()),
                "seed" => self.seed = Some(parse_value(key, value_str, "integer")?),
                "protocol.burn-in" => {
                    self.protocol.get_or_insert_with(Default::default).burn_in =
                        Some(parse_value(key, value_str, "integer")?);
                }
                "protocol.n-frames" => {
                    self.protocol.get_or_insert_with(Default::default).n_frames =
                        Some(parse_value(key, value_str, "integer")?);
                }
                "protocol.steps-per-frame" => {
                    self.protocol
                        .get_or_insert_with(Default::default)
                        .steps_per_frame = Some(parse_value(key, value_str, "integer")?);
                }
                "estimation.temperature" => {
                    self.estimation.get_or_insert_with(Default::default).temperature =
                        Some(parse_value(key, value_str, "float")?);
                }
                "estimation.n-bootstrap" => {
                    self.estimation.get_or_insert_with(Default::default).n_bootstrap =
                        Some(parse_value(key, value_str, "integer")?);
                }
                "estimation.bootstrap-seed" => {
                    self.estimation
                        .get_or_insert_with(Default::default)
                        .bootstrap_seed = Some(parse_value(key, value_str, "integer")?);
                }
                "estimation.max-buffer-frames" => {
                    self.estimation
                        .get_or_insert_with(Default::default)
                        .max_buffer_frames = Some(parse_value(key, value_str, "integer")?);
                }
                "dynamics.dt" => {
                    self.dynamics.get_or_insert_with(Default::default).dt =
                        Some(parse_value(key, value_str, "float")?);
                }
                "dynamics.friction" => {
                    self.dynamics.get_or_insert_with(Default::default).friction =
                        Some(parse_value(key, value_str, "float")?);
                }
                "dynamics.barostat.enabled" => {
                    self.dynamics
                        .get_or_insert_with(Default::default)
                        .barostat
                        .get_or_insert_with(Default::default)
                        .enabled = Some(parse_value(key, value_str, "boolean")?);
                }
                "dynamics.barostat.pressure" => {
                    self.dynamics
                        .get_or_insert_with(Default::default)
                        .barostat
                        .get_or_insert_with(Default::default)
                        .pressure = Some(parse_value(key, value_str, "float")?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}
