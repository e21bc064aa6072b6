use super::free_energy::{SimulationResult, estimate_free_energy_given_initial_states};
use crate::core::constants::DEFAULT_PRESSURE;
use crate::core::geometry::get_group_indices;
use crate::core::md::{LangevinIntegrator, MonteCarloBarostat};
use crate::core::models::state::{Frame, PeriodicBox};
use crate::core::potentials::{Potential, interpolate_all};
use crate::engine::config::{EstimationConfig, SimulationProtocol};
use crate::engine::error::{FepError, SimulationContext, SimulationError};
use crate::engine::progress::ProgressReporter;
use crate::engine::state::InitialState;
use nalgebra::Vector3;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// Two end-state Hamiltonians over a shared set of particles.
///
/// `potentials_a[i]` and `potentials_b[i]` must be the same kind of term over the same
/// atoms; only their parameters differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AlchemicalSystem {
    pub name: String,
    pub potentials_a: Vec<Potential>,
    pub potentials_b: Vec<Potential>,
    pub masses: Vec<f64>,
    pub x0: Frame,
    pub box0: PeriodicBox,
    pub ligand_idxs: Vec<usize>,
}

impl AlchemicalSystem {
    pub fn n_atoms(&self) -> usize {
        self.x0.len()
    }

    pub fn validate(&self) -> Result<(), FepError> {
        let n_atoms = self.n_atoms();
        if self.masses.len() != n_atoms {
            return Err(FepError::InvalidState(format!(
                "{} masses for {} atoms",
                self.masses.len(),
                n_atoms
            )));
        }
        if self.potentials_a.len() != self.potentials_b.len() {
            return Err(FepError::ComponentMismatch {
                left: self.potentials_a.len(),
                right: self.potentials_b.len(),
            });
        }
        for potential in self.potentials_a.iter().chain(&self.potentials_b) {
            potential.validate(n_atoms)?;
        }
        // Interpolating at an end point checks positional correspondence.
        interpolate_all(&self.potentials_a, &self.potentials_b, 0.0)?;
        if self.ligand_idxs.is_empty() {
            return Err(FepError::InvalidState("no ligand atoms selected".to_string()));
        }
        Ok(())
    }

    /// Rigid molecules implied by the bond graph; every atom is its own group when the
    /// system has no bonds.
    pub fn group_idxs(&self) -> Vec<Vec<usize>> {
        let bonds = self
            .potentials_a
            .iter()
            .find_map(Potential::as_harmonic_bond)
            .map(|hb| hb.bonds.as_slice())
            .unwrap_or(&[]);
        get_group_indices(bonds, self.n_atoms())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BarostatSettings {
    /// bar
    pub pressure: f64,
    /// MD steps between volume moves.
    pub interval: usize,
}

impl Default for BarostatSettings {
    fn default() -> Self {
        Self {
            pressure: DEFAULT_PRESSURE,
            interval: 15,
        }
    }
}

/// Integrator and barostat settings shared by every window of a ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DynamicsSettings {
    /// ps
    pub dt: f64,
    /// 1/ps
    pub friction: f64,
    pub barostat: Option<BarostatSettings>,
}

impl Default for DynamicsSettings {
    fn default() -> Self {
        Self {
            dt: 1e-3,
            friction: 1.0,
            barostat: Some(BarostatSettings::default()),
        }
    }
}

/// The 22-window schedule: dense near both end states, symmetric about 0.5.
pub fn default_lambda_schedule() -> Vec<f64> {
    const HALF: [f64; 11] = [0.0, 0.01, 0.02, 0.04, 0.06, 0.08, 0.11, 0.15, 0.20, 0.32, 0.42];
    HALF.iter()
        .copied()
        .chain(HALF.iter().rev().map(|l| 1.0 - l))
        .collect()
}

/// One InitialState per lambda, each reproducible from `seed` and its index.
///
/// Window `i` runs its integrator with seed `seed + i` and its barostat with
/// `seed + i + 1`.
pub fn setup_initial_states(
    system: &AlchemicalSystem,
    dynamics: &DynamicsSettings,
    temperature: f64,
    lambda_schedule: &[f64],
    seed: u64,
) -> Result<Vec<InitialState>, FepError> {
    system.validate()?;
    let group_idxs = system.group_idxs();
    let v0 = vec![Vector3::zeros(); system.n_atoms()];

    lambda_schedule
        .iter()
        .enumerate()
        .map(|(lamb_idx, &lamb)| {
            let run_seed = seed.wrapping_add(lamb_idx as u64);
            let potentials = interpolate_all(&system.potentials_a, &system.potentials_b, lamb)?;
            let integrator = LangevinIntegrator::new(
                temperature,
                dynamics.dt,
                dynamics.friction,
                system.masses.clone(),
                run_seed,
            );
            let barostat = dynamics.barostat.as_ref().map(|b| {
                MonteCarloBarostat::new(
                    b.pressure,
                    temperature,
                    group_idxs.clone(),
                    b.interval,
                    run_seed.wrapping_add(1),
                )
            });
            InitialState::new(
                potentials,
                integrator,
                barostat,
                system.x0.clone(),
                v0.clone(),
                system.box0,
                lamb,
                system.ligand_idxs.clone(),
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelativeFreeEnergyConfig {
    /// Appended to the system name in log lines and figure titles.
    pub prefix: String,
    pub protocol: SimulationProtocol,
    /// An empty `keep_idxs` retains the two end states.
    pub estimation: EstimationConfig,
    pub dynamics: DynamicsSettings,
    /// Defaults to [`default_lambda_schedule`].
    pub lambda_schedule: Option<Vec<f64>>,
    pub seed: u64,
}

impl Default for RelativeFreeEnergyConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            protocol: SimulationProtocol::default(),
            estimation: EstimationConfig::default(),
            dynamics: DynamicsSettings::default(),
            lambda_schedule: None,
            seed: 2024,
        }
    }
}

/// Relative free energy between the two end states of `system`.
///
/// Any failure after the ladder is built is returned together with the initial
/// states, protocol and prefix needed to rerun it.
#[instrument(skip_all, name = "relative_free_energy", fields(system = %system.name))]
pub fn estimate_relative_free_energy(
    system: &AlchemicalSystem,
    config: &RelativeFreeEnergyConfig,
    reporter: &ProgressReporter,
) -> Result<SimulationResult, SimulationError> {
    let combined_prefix = format!("{}_{}", system.name, config.prefix);
    let lambda_schedule = match &config.lambda_schedule {
        Some(schedule) => {
            warn!("Using a caller-supplied lambda schedule of {} windows", schedule.len());
            schedule.clone()
        }
        None => default_lambda_schedule(),
    };
    let with_context = |initial_states: Vec<InitialState>, source: FepError| {
        SimulationError::new(
            SimulationContext {
                initial_states,
                protocol: config.protocol,
                prefix: combined_prefix.clone(),
            },
            source,
        )
    };

    let initial_states = setup_initial_states(
        system,
        &config.dynamics,
        config.estimation.temperature,
        &lambda_schedule,
        config.seed,
    )
    .map_err(|e| with_context(Vec::new(), e))?;

    let mut estimation = config.estimation.clone();
    if estimation.keep_idxs.is_empty() {
        estimation.keep_idxs = [0, initial_states.len().saturating_sub(1)].into();
    }
    info!(
        n_states = initial_states.len(),
        prefix = %combined_prefix,
        "Built lambda ladder"
    );

    estimate_free_energy_given_initial_states(
        &initial_states,
        &config.protocol,
        &estimation,
        &combined_prefix,
        reporter,
    )
    .map_err(|e| with_context(initial_states.clone(), e))
}

/// An independent estimate, e.g. the solvent or complex leg of a binding cycle.
#[derive(Debug, Clone)]
pub struct Leg {
    pub system: AlchemicalSystem,
    pub config: RelativeFreeEnergyConfig,
}

/// Runs independent legs, in parallel when the `parallel` feature is on.
///
/// Results are returned in input order; one failing leg does not affect the others.
pub fn run_legs(legs: &[Leg]) -> Vec<Result<SimulationResult, SimulationError>> {
    #[cfg(not(feature = "parallel"))]
    let iterator = legs.iter();

    #[cfg(feature = "parallel")]
    let iterator = legs.par_iter();

    iterator
        .map(|leg| estimate_relative_free_energy(&leg.system, &leg.config, &ProgressReporter::new()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::state::orthorhombic_box;
    use crate::core::potentials::{HarmonicBond, PositionRestraint};

    fn dimer(k_b: f64) -> AlchemicalSystem {
        let bond = |k: f64| Potential::HarmonicBond(HarmonicBond::new(vec![[0, 1]], vec![[k, 0.15]]));
        let restraint = Potential::PositionRestraint(PositionRestraint::new(
            vec![0],
            vec![[1.0; 3]],
            vec![500.0],
        ));
        AlchemicalSystem {
            name: "dimer".to_string(),
            potentials_a: vec![bond(1000.0), restraint.clone()],
            potentials_b: vec![bond(k_b), restraint],
            masses: vec![12.0, 12.0],
            x0: vec![Vector3::repeat(1.0), Vector3::new(1.15, 1.0, 1.0)],
            box0: orthorhombic_box([2.0; 3]),
            ligand_idxs: vec![0, 1],
        }
    }

    #[test]
    fn default_schedule_is_symmetric_and_sorted() {
        let schedule = default_lambda_schedule();
        assert_eq!(schedule.len(), 22);
        assert_eq!(schedule[0], 0.0);
        assert_eq!(schedule[21], 1.0);
        assert!(schedule.windows(2).all(|w| w[0] < w[1]));
        for (lo, hi) in schedule.iter().zip(schedule.iter().rev()) {
            assert!((lo + hi - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn initial_states_follow_the_seed_convention() {
        let states =
            setup_initial_states(&dimer(4000.0), &DynamicsSettings::default(), 300.0, &[0.0, 0.5, 1.0], 10)
                .unwrap();
        assert_eq!(states.len(), 3);
        for (i, state) in states.iter().enumerate() {
            assert_eq!(state.integrator().seed, 10 + i as u64);
            assert_eq!(state.barostat().unwrap().seed, 11 + i as u64);
            assert_eq!(state.barostat().unwrap().group_idxs, vec![vec![0, 1]]);
        }
        let Potential::HarmonicBond(mid) = &states[1].potentials()[0] else {
            panic!("first term should stay a bond");
        };
        assert_eq!(mid.params[0], [2500.0, 0.15]);
    }

    #[test]
    fn mismatched_end_states_are_rejected() {
        let mut system = dimer(4000.0);
        system.potentials_b.pop();
        assert!(matches!(
            system.validate(),
            Err(FepError::ComponentMismatch { left: 2, right: 1 })
        ));

        let mut swapped = dimer(4000.0);
        swapped.potentials_b.reverse();
        assert!(swapped.validate().is_err());
    }

    #[test]
    fn failures_carry_the_reproduction_context() {
        let config = RelativeFreeEnergyConfig {
            prefix: "solvent".to_string(),
            protocol: SimulationProtocol::new(0, 2, 1).unwrap(),
            lambda_schedule: Some(vec![0.0]),
            dynamics: DynamicsSettings {
                barostat: None,
                ..DynamicsSettings::default()
            },
            ..RelativeFreeEnergyConfig::default()
        };
        let err = estimate_relative_free_energy(&dimer(4000.0), &config, &ProgressReporter::new())
            .unwrap_err();
        assert!(matches!(err.source, FepError::IncompleteLadder { n_states: 1, .. }));
        assert_eq!(err.context.prefix, "dimer_solvent");
        assert_eq!(err.context.initial_states.len(), 1);
        assert_eq!(err.context.protocol.n_frames(), 2);
    }

    #[test]
    fn legs_return_one_result_each_in_order() {
        let config = |prefix: &str| RelativeFreeEnergyConfig {
            prefix: prefix.to_string(),
            protocol: SimulationProtocol::new(50, 20, 5).unwrap(),
            lambda_schedule: Some(vec![0.0, 1.0]),
            dynamics: DynamicsSettings {
                barostat: None,
                ..DynamicsSettings::default()
            },
            ..RelativeFreeEnergyConfig::default()
        };
        let mut broken = dimer(4000.0);
        broken.masses.pop();
        let legs = vec![
            Leg {
                system: dimer(4000.0),
                config: config("solvent"),
            },
            Leg {
                system: broken,
                config: config("complex"),
            },
        ];
        let results = run_legs(&legs);
        assert_eq!(results.len(), 2);
        let solvent = results[0].as_ref().unwrap();
        assert_eq!(solvent.all_dgs.len(), 1);
        assert_eq!(solvent.frames.len(), 2);
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.context.prefix, "dimer_complex");
        assert!(err.context.initial_states.is_empty());
    }
}
