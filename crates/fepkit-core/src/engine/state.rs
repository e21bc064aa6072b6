use super::error::FepError;
use crate::core::md::{LangevinIntegrator, MonteCarloBarostat};
use crate::core::models::state::{Frame, PeriodicBox};
use crate::core::potentials::Potential;
use serde::{Deserialize, Serialize};

/// Everything needed to simulate one lambda window.
///
/// Given a [`SimulationProtocol`](super::config::SimulationProtocol), sampling an
/// `InitialState` is deterministic: the RNG streams are seeded from the integrator and
/// barostat settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    potentials: Vec<Potential>,
    integrator: LangevinIntegrator,
    barostat: Option<MonteCarloBarostat>,
    x0: Frame,
    v0: Frame,
    box0: PeriodicBox,
    lamb: f64,
    ligand_idxs: Vec<usize>,
}

impl InitialState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        potentials: Vec<Potential>,
        integrator: LangevinIntegrator,
        barostat: Option<MonteCarloBarostat>,
        x0: Frame,
        v0: Frame,
        box0: PeriodicBox,
        lamb: f64,
        ligand_idxs: Vec<usize>,
    ) -> Result<Self, FepError> {
        let n_atoms = x0.len();
        if v0.len() != n_atoms {
            return Err(FepError::InvalidState(format!(
                "{} velocities for {} atoms",
                v0.len(),
                n_atoms
            )));
        }
        if integrator.masses.len() != n_atoms {
            return Err(FepError::InvalidState(format!(
                "{} masses for {} atoms",
                integrator.masses.len(),
                n_atoms
            )));
        }
        if let Some(&bad) = ligand_idxs.iter().find(|&&i| i >= n_atoms) {
            return Err(FepError::InvalidState(format!(
                "ligand index {bad} out of range for {n_atoms} atoms"
            )));
        }
        for potential in &potentials {
            potential.validate(n_atoms)?;
        }
        Ok(Self {
            potentials,
            integrator,
            barostat,
            x0,
            v0,
            box0,
            lamb,
            ligand_idxs,
        })
    }

    pub fn potentials(&self) -> &[Potential] {
        &self.potentials
    }

    pub fn integrator(&self) -> &LangevinIntegrator {
        &self.integrator
    }

    pub fn barostat(&self) -> Option<&MonteCarloBarostat> {
        self.barostat.as_ref()
    }

    pub fn x0(&self) -> &Frame {
        &self.x0
    }

    pub fn v0(&self) -> &Frame {
        &self.v0
    }

    pub fn box0(&self) -> &PeriodicBox {
        &self.box0
    }

    pub fn lamb(&self) -> f64 {
        self.lamb
    }

    pub fn ligand_idxs(&self) -> &[usize] {
        &self.ligand_idxs
    }

    pub fn n_atoms(&self) -> usize {
        self.x0.len()
    }

    pub fn temperature(&self) -> f64 {
        self.integrator.temperature
    }
}
