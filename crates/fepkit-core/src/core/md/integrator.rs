use super::MdError;
use crate::core::constants::kbt;
use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Langevin thermostat settings. Units: K, ps, 1/ps, amu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LangevinIntegrator {
    pub temperature: f64,
    pub dt: f64,
    pub friction: f64,
    pub masses: Vec<f64>,
    pub seed: u64,
}

impl LangevinIntegrator {
    pub fn new(temperature: f64, dt: f64, friction: f64, masses: Vec<f64>, seed: u64) -> Self {
        Self {
            temperature,
            dt,
            friction,
            masses,
            seed,
        }
    }

    pub fn validate(&self, n_atoms: usize) -> Result<(), MdError> {
        if self.masses.len() != n_atoms {
            return Err(MdError::AtomCountMismatch {
                what: "masses",
                found: self.masses.len(),
                n_atoms,
            });
        }
        for (name, value) in [
            ("temperature", self.temperature),
            ("dt", self.dt),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(MdError::InvalidParameter { name, value });
            }
        }
        if !(self.friction >= 0.0) || !self.friction.is_finite() {
            return Err(MdError::InvalidParameter {
                name: "friction",
                value: self.friction,
            });
        }
        if let Some(&m) = self.masses.iter().find(|&&m| !(m > 0.0)) {
            return Err(MdError::InvalidParameter {
                name: "mass",
                value: m,
            });
        }
        Ok(())
    }

    /// Binds the settings into a stateful stepper with its own RNG stream.
    pub fn bind(&self, n_atoms: usize) -> Result<LangevinStepper, MdError> {
        self.validate(n_atoms)?;
        let ca = (-self.friction * self.dt).exp();
        let kt = kbt(self.temperature);
        let noise_scale = self
            .masses
            .iter()
            .map(|&m| ((1.0 - ca * ca) * kt / m).sqrt())
            .collect();
        Ok(LangevinStepper {
            dt: self.dt,
            ca,
            inv_masses: self.masses.iter().map(|m| 1.0 / m).collect(),
            noise_scale,
            rng: StdRng::seed_from_u64(self.seed),
        })
    }
}

/// BAOAB splitting of the Langevin equation.
///
/// The caller owns forces: `step` expects the forces at `x` on entry and
/// calls `compute_forces` once after the final position update.
pub struct LangevinStepper {
    dt: f64,
    ca: f64,
    inv_masses: Vec<f64>,
    noise_scale: Vec<f64>,
    rng: StdRng,
}

impl LangevinStepper {
    pub fn step<F>(
        &mut self,
        x: &mut [Vector3<f64>],
        v: &mut [Vector3<f64>],
        forces: &mut Vec<Vector3<f64>>,
        mut compute_forces: F,
    ) -> Result<(), MdError>
    where
        F: FnMut(&[Vector3<f64>]) -> Result<Vec<Vector3<f64>>, MdError>,
    {
        let half_dt = 0.5 * self.dt;

        for i in 0..x.len() {
            v[i] += forces[i] * (half_dt * self.inv_masses[i]);
            x[i] += v[i] * half_dt;
            let noise: Vector3<f64> = Vector3::new(
                StandardNormal.sample(&mut self.rng),
                StandardNormal.sample(&mut self.rng),
                StandardNormal.sample(&mut self.rng),
            );
            v[i] = v[i] * self.ca + noise * self.noise_scale[i];
            x[i] += v[i] * half_dt;
        }

        *forces = compute_forces(x)?;

        for i in 0..x.len() {
            v[i] += forces[i] * (half_dt * self.inv_masses[i]);
        }
        Ok(())
    }
}
