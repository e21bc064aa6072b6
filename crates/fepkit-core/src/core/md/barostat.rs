use super::MdError;
use crate::core::constants::{BAR_NM3_TO_KJ_PER_MOL, kbt};
use crate::core::geometry::{box_volume, centroid};
use crate::core::models::state::PeriodicBox;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

const ADAPT_EVERY: usize = 10;
const INITIAL_STEP_FRACTION: f64 = 0.01;

/// Isotropic Monte-Carlo barostat settings. Pressure in bar, interval in MD steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MonteCarloBarostat {
    pub pressure: f64,
    pub temperature: f64,
    pub group_idxs: Vec<Vec<usize>>,
    pub interval: usize,
    pub seed: u64,
}

impl MonteCarloBarostat {
    pub fn new(
        pressure: f64,
        temperature: f64,
        group_idxs: Vec<Vec<usize>>,
        interval: usize,
        seed: u64,
    ) -> Self {
        Self {
            pressure,
            temperature,
            group_idxs,
            interval,
            seed,
        }
    }

    pub fn bind(&self, n_atoms: usize, initial_box: &PeriodicBox) -> Result<BarostatStepper, MdError> {
        if self.interval == 0 {
            return Err(MdError::InvalidParameter {
                name: "barostat interval",
                value: 0.0,
            });
        }
        if !(self.temperature > 0.0) {
            return Err(MdError::InvalidParameter {
                name: "barostat temperature",
                value: self.temperature,
            });
        }
        if let Some(&index) = self.group_idxs.iter().flatten().find(|&&i| i >= n_atoms) {
            return Err(MdError::GroupIndexOutOfRange { index, n_atoms });
        }
        Ok(BarostatStepper {
            settings: self.clone(),
            kt: kbt(self.temperature),
            volume_step: INITIAL_STEP_FRACTION * box_volume(initial_box),
            rng: StdRng::seed_from_u64(self.seed),
            n_attempted: 0,
            n_accepted: 0,
            window_attempted: 0,
            window_accepted: 0,
        })
    }
}

pub struct BarostatStepper {
    settings: MonteCarloBarostat,
    kt: f64,
    volume_step: f64,
    rng: StdRng,
    n_attempted: usize,
    n_accepted: usize,
    window_attempted: usize,
    window_accepted: usize,
}

impl BarostatStepper {
    pub fn interval(&self) -> usize {
        self.settings.interval
    }

    pub fn n_attempted(&self) -> usize {
        self.n_attempted
    }

    pub fn n_accepted(&self) -> usize {
        self.n_accepted
    }

    pub fn volume_step(&self) -> f64 {
        self.volume_step
    }

    /// Attempts one isotropic volume change. Returns `true` when accepted, in which case
    /// `x` and `periodic_box` hold the rescaled state.
    pub fn attempt<E>(
        &mut self,
        x: &mut Vec<Vector3<f64>>,
        periodic_box: &mut PeriodicBox,
        mut energy: E,
    ) -> Result<bool, MdError>
    where
        E: FnMut(&[Vector3<f64>], &PeriodicBox) -> Result<f64, MdError>,
    {
        let volume = box_volume(periodic_box);
        let delta_v = self.rng.gen_range(-self.volume_step..=self.volume_step);
        let new_volume = volume + delta_v;
        self.n_attempted += 1;
        self.window_attempted += 1;

        let accepted = if new_volume > 0.0 {
            let scale = (new_volume / volume).cbrt();
            let new_box = *periodic_box * scale;
            let mut new_x = x.clone();
            for group in &self.settings.group_idxs {
                if let Some(center) = centroid(x, group) {
                    let shift = center * (scale - 1.0);
                    for &i in group {
                        new_x[i] += shift;
                    }
                }
            }

            let u_old = energy(x, periodic_box)?;
            let u_new = energy(&new_x, &new_box)?;
            let n_groups = self.settings.group_idxs.len() as f64;
            let delta_h = (u_new - u_old)
                + self.settings.pressure * delta_v * BAR_NM3_TO_KJ_PER_MOL
                - n_groups * self.kt * (new_volume / volume).ln();

            let accept = delta_h <= 0.0 || self.rng.gen_range(0.0..1.0) < (-delta_h / self.kt).exp();
            if accept {
                *x = new_x;
                *periodic_box = new_box;
            }
            accept
        } else {
            false
        };

        if accepted {
            self.n_accepted += 1;
            self.window_accepted += 1;
        }
        self.adapt(volume);
        Ok(accepted)
    }

    fn adapt(&mut self, volume: f64) {
        if self.window_attempted < ADAPT_EVERY {
            return;
        }
        let rate = self.window_accepted as f64 / self.window_attempted as f64;
        if rate < 0.25 {
            self.volume_step *= 0.9;
        } else if rate > 0.75 {
            self.volume_step = (self.volume_step * 1.1).min(0.3 * volume);
        }
        trace!(rate, volume_step = self.volume_step, "Adapted barostat step size");
        self.window_attempted = 0;
        self.window_accepted = 0;
    }
}
