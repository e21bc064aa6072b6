//! Composable state transitions on `(coords, velocities, box)` triples.
//!
//! A move never mutates its input. The only state it carries across calls is its own
//! random stream and, for Monte-Carlo moves, the proposal/acceptance counters.

use super::error::FepError;
use crate::core::constants::kbt;
use crate::core::geometry::{box_volume, centroid, delta_r, rotate_about};
use crate::core::md::{Context, LangevinIntegrator, MonteCarloBarostat};
use crate::core::models::state::{CoordsVelBox, PeriodicBox, is_finite_frame};
use crate::core::potentials::{Nonbonded, Potential};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use std::f64::consts::PI;
use tracing::trace;

const MAX_OUTSIDE_ATTEMPTS: usize = 10_000;

pub trait Move {
    fn name(&self) -> &'static str;

    fn apply(&mut self, xvb: &CoordsVelBox) -> Result<CoordsVelBox, FepError>;

    /// Applies the move `n` times in sequence.
    fn apply_n(&mut self, xvb: &CoordsVelBox, n: usize) -> Result<CoordsVelBox, FepError> {
        let mut current = xvb.clone();
        for _ in 0..n {
            current = self.apply(&current)?;
        }
        Ok(current)
    }
}

/// Moves that propose and accept or reject trial states.
pub trait MonteCarloMove: Move {
    fn n_proposed(&self) -> usize;
    fn n_accepted(&self) -> usize;

    fn acceptance_fraction(&self) -> f64 {
        match self.n_proposed() {
            0 => 0.0,
            n => self.n_accepted() as f64 / n as f64,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counters {
    proposed: usize,
    accepted: usize,
}

impl Counters {
    fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }
}

/// Metropolis test on a log acceptance ratio.
#[inline]
fn metropolis(log_ratio: f64, rng: &mut StdRng) -> bool {
    log_ratio >= 0.0 || rng.gen_range(0.0..1.0f64).ln() < log_ratio
}

fn uniform_rotation(rng: &mut StdRng) -> UnitQuaternion<f64> {
    let q = Quaternion::<f64>::new(
        StandardNormal.sample(rng),
        StandardNormal.sample(rng),
        StandardNormal.sample(rng),
        StandardNormal.sample(rng),
    );
    UnitQuaternion::from_quaternion(q)
}

fn uniform_in_box(periodic_box: &PeriodicBox, rng: &mut StdRng) -> Vector3<f64> {
    Vector3::new(
        rng.gen_range(0.0..1.0) * periodic_box[(0, 0)],
        rng.gen_range(0.0..1.0) * periodic_box[(1, 1)],
        rng.gen_range(0.0..1.0) * periodic_box[(2, 2)],
    )
}

fn uniform_in_sphere(center: &Vector3<f64>, radius: f64, rng: &mut StdRng) -> Vector3<f64> {
    let direction = Vector3::<f64>::new(
        StandardNormal.sample(rng),
        StandardNormal.sample(rng),
        StandardNormal.sample(rng),
    )
    .normalize();
    let r = radius * rng.gen_range(0.0..1.0f64).cbrt();
    center + direction * r
}

/// Rigidly rotates `group` about its centroid and places the centroid at `target`.
fn place_group(
    coords: &[Vector3<f64>],
    group: &[usize],
    target: &Vector3<f64>,
    rotation: &UnitQuaternion<f64>,
) -> Vec<Vector3<f64>> {
    let mut moved = coords.to_vec();
    let Some(center) = centroid(coords, group) else {
        return moved;
    };
    let members: Vec<Vector3<f64>> = group.iter().map(|&i| coords[i]).collect();
    let rotated = rotate_about(&members, &center, rotation);
    let shift = target - center;
    for (&i, x) in group.iter().zip(rotated) {
        moved[i] = x + shift;
    }
    moved
}

fn validate_groups(
    mover: &'static str,
    groups: &[Vec<usize>],
    nonbonded: &Nonbonded,
) -> Result<(), FepError> {
    let n_atoms = nonbonded.params.len();
    if groups.is_empty() || groups.iter().any(|g| g.is_empty()) {
        return Err(FepError::InvalidMove {
            mover,
            reason: "molecule groups must be non-empty".to_string(),
        });
    }
    if let Some(&index) = groups.iter().flatten().find(|&&i| i >= n_atoms) {
        return Err(FepError::InvalidMove {
            mover,
            reason: format!("atom {index} is outside the {n_atoms}-atom nonbonded term"),
        });
    }
    Ok(())
}

/// Langevin dynamics, optionally with a Monte-Carlo barostat, for `n_steps` steps.
///
/// Each call draws a fresh integrator seed from the move's own stream, so a sequence
/// of calls is reproducible from the construction seed.
#[derive(Debug, Clone)]
pub struct NptMove {
    potentials: Vec<Potential>,
    integrator: LangevinIntegrator,
    barostat: Option<MonteCarloBarostat>,
    pub n_steps: usize,
    rng: StdRng,
}

impl NptMove {
    pub fn new(
        potentials: Vec<Potential>,
        integrator: LangevinIntegrator,
        barostat: Option<MonteCarloBarostat>,
        n_steps: usize,
        seed: u64,
    ) -> Self {
        Self {
            potentials,
            integrator,
            barostat,
            n_steps,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Move for NptMove {
    fn name(&self) -> &'static str {
        "NptMove"
    }

    fn apply(&mut self, xvb: &CoordsVelBox) -> Result<CoordsVelBox, FepError> {
        let mut integrator = self.integrator.clone();
        integrator.seed = self.rng.r#gen();
        let barostat = self.barostat.clone().map(|mut b| {
            b.seed = self.rng.r#gen();
            b
        });

        let mut ctx = Context::new(
            xvb.coords.clone(),
            xvb.velocities.clone(),
            xvb.periodic_box,
            self.potentials.clone(),
            &integrator,
            barostat.as_ref(),
        )?;
        ctx.multiple_steps(self.n_steps, 0)?;
        if !is_finite_frame(ctx.get_x_t()) {
            return Err(FepError::MoveDivergence { mover: self.name() });
        }
        Ok(CoordsVelBox::new(
            ctx.get_x_t().clone(),
            ctx.get_v_t().clone(),
            *ctx.get_box(),
        ))
    }
}

/// Untargeted exchange: one molecule is picked uniformly, randomly reoriented and
/// reinserted at a uniform position in the box.
///
/// The proposal is symmetric, so acceptance is a plain Metropolis test on the change
/// of the molecule's interaction energy with the rest of the system.
#[derive(Debug, Clone)]
pub struct BdExchangeMove {
    nonbonded: Nonbonded,
    mol_groups: Vec<Vec<usize>>,
    beta: f64,
    rng: StdRng,
    counters: Counters,
}

impl BdExchangeMove {
    pub fn new(
        nonbonded: Nonbonded,
        mol_groups: Vec<Vec<usize>>,
        temperature: f64,
        seed: u64,
    ) -> Result<Self, FepError> {
        validate_groups("BdExchangeMove", &mol_groups, &nonbonded)?;
        Ok(Self {
            nonbonded,
            mol_groups,
            beta: 1.0 / kbt(temperature),
            rng: StdRng::seed_from_u64(seed),
            counters: Counters::default(),
        })
    }
}

impl Move for BdExchangeMove {
    fn name(&self) -> &'static str {
        "BdExchangeMove"
    }

    fn apply(&mut self, xvb: &CoordsVelBox) -> Result<CoordsVelBox, FepError> {
        let group = &self.mol_groups[self.rng.gen_range(0..self.mol_groups.len())];
        let target = uniform_in_box(&xvb.periodic_box, &mut self.rng);
        let rotation = uniform_rotation(&mut self.rng);
        let trial = place_group(&xvb.coords, group, &target, &rotation);

        let u_old = self
            .nonbonded
            .group_interaction_energy(&xvb.coords, &xvb.periodic_box, group)?;
        let u_new = self
            .nonbonded
            .group_interaction_energy(&trial, &xvb.periodic_box, group)?;
        let log_ratio = -self.beta * (u_new - u_old);
        let accepted = log_ratio.is_finite() && metropolis(log_ratio, &mut self.rng);
        self.counters.record(accepted);
        trace!(delta_u = u_new - u_old, accepted, "Exchange proposal");

        if accepted {
            Ok(CoordsVelBox::new(trial, xvb.velocities.clone(), xvb.periodic_box))
        } else {
            Ok(xvb.clone())
        }
    }
}

impl MonteCarloMove for BdExchangeMove {
    fn n_proposed(&self) -> usize {
        self.counters.proposed
    }
    fn n_accepted(&self) -> usize {
        self.counters.accepted
    }
}

/// Targeted exchange between a sphere of `radius` around the ligand centroid and the
/// rest of the box.
///
/// Each proposal picks a direction (into or out of the sphere) with equal probability,
/// a molecule uniformly from the source region and a uniform position in the
/// destination region. The acceptance ratio carries the proposal bias
/// `n_src·V_dst / ((n_dst + 1)·V_src)`, which makes the move satisfy detailed balance
/// in both directions.
#[derive(Debug, Clone)]
pub struct TibdExchangeMove {
    nonbonded: Nonbonded,
    mol_groups: Vec<Vec<usize>>,
    ligand_idxs: Vec<usize>,
    radius: f64,
    beta: f64,
    rng: StdRng,
    counters: Counters,
}

impl TibdExchangeMove {
    pub fn new(
        nonbonded: Nonbonded,
        mol_groups: Vec<Vec<usize>>,
        temperature: f64,
        ligand_idxs: Vec<usize>,
        radius: f64,
        seed: u64,
    ) -> Result<Self, FepError> {
        validate_groups("TibdExchangeMove", &mol_groups, &nonbonded)?;
        if ligand_idxs.is_empty() {
            return Err(FepError::InvalidMove {
                mover: "TibdExchangeMove",
                reason: "targeted insertion needs ligand atoms".to_string(),
            });
        }
        if !(radius > 0.0) {
            return Err(FepError::InvalidMove {
                mover: "TibdExchangeMove",
                reason: format!("radius must be positive, got {radius}"),
            });
        }
        Ok(Self {
            nonbonded,
            mol_groups,
            ligand_idxs,
            radius,
            beta: 1.0 / kbt(temperature),
            rng: StdRng::seed_from_u64(seed),
            counters: Counters::default(),
        })
    }

    fn sphere_volume(&self) -> f64 {
        4.0 / 3.0 * PI * self.radius.powi(3)
    }

    /// Partitions molecule indices into those whose centroid lies inside the sphere and
    /// those outside it.
    fn partition(
        &self,
        coords: &[Vector3<f64>],
        periodic_box: &PeriodicBox,
        center: &Vector3<f64>,
    ) -> (Vec<usize>, Vec<usize>) {
        (0..self.mol_groups.len()).partition(|&m| {
            centroid(coords, &self.mol_groups[m])
                .map(|c| delta_r(&c, center, periodic_box).norm() < self.radius)
                .unwrap_or(false)
        })
    }

    fn uniform_outside(
        &mut self,
        periodic_box: &PeriodicBox,
        center: &Vector3<f64>,
    ) -> Result<Vector3<f64>, FepError> {
        for _ in 0..MAX_OUTSIDE_ATTEMPTS {
            let candidate = uniform_in_box(periodic_box, &mut self.rng);
            if delta_r(&candidate, center, periodic_box).norm() >= self.radius {
                return Ok(candidate);
            }
        }
        Err(FepError::InvalidMove {
            mover: "TibdExchangeMove",
            reason: "no position outside the targeted sphere could be drawn".to_string(),
        })
    }

    /// Number of molecules whose centroid is within the targeted sphere.
    pub fn occupancy(&self, xvb: &CoordsVelBox) -> usize {
        match centroid(&xvb.coords, &self.ligand_idxs) {
            Some(center) => self.partition(&xvb.coords, &xvb.periodic_box, &center).0.len(),
            None => 0,
        }
    }
}

impl Move for TibdExchangeMove {
    fn name(&self) -> &'static str {
        "TibdExchangeMove"
    }

    fn apply(&mut self, xvb: &CoordsVelBox) -> Result<CoordsVelBox, FepError> {
        let periodic_box = &xvb.periodic_box;
        let center = centroid(&xvb.coords, &self.ligand_idxs).ok_or(FepError::InvalidMove {
            mover: "TibdExchangeMove",
            reason: "ligand selection is empty".to_string(),
        })?;
        // Membership uses the minimum image, so a sphere wider than half the shortest
        // edge overlaps its own periodic images and no longer has volume `4/3 π r³`.
        let max_radius = 0.5 * periodic_box.diagonal().min();
        if self.radius > max_radius {
            return Err(FepError::InvalidMove {
                mover: "TibdExchangeMove",
                reason: format!(
                    "radius {} exceeds half the shortest box edge ({max_radius})",
                    self.radius
                ),
            });
        }
        let v_in = self.sphere_volume();
        let v_out = box_volume(periodic_box) - v_in;

        let (inside, outside) = self.partition(&xvb.coords, periodic_box, &center);
        let insertion = self.rng.gen_range(0.0..1.0) < 0.5;
        let (src, n_dst, v_src, v_dst) = if insertion {
            (outside, inside.len(), v_out, v_in)
        } else {
            (inside, outside.len(), v_in, v_out)
        };
        if src.is_empty() {
            self.counters.record(false);
            return Ok(xvb.clone());
        }

        let group = self.mol_groups[src[self.rng.gen_range(0..src.len())]].clone();
        let target = if insertion {
            uniform_in_sphere(&center, self.radius, &mut self.rng)
        } else {
            self.uniform_outside(periodic_box, &center)?
        };
        let rotation = uniform_rotation(&mut self.rng);
        let trial = place_group(&xvb.coords, &group, &target, &rotation);

        let u_old = self
            .nonbonded
            .group_interaction_energy(&xvb.coords, periodic_box, &group)?;
        let u_new = self
            .nonbonded
            .group_interaction_energy(&trial, periodic_box, &group)?;
        let log_bias = (src.len() as f64 * v_dst).ln() - ((n_dst + 1) as f64 * v_src).ln();
        let log_ratio = -self.beta * (u_new - u_old) + log_bias;
        let accepted = log_ratio.is_finite() && metropolis(log_ratio, &mut self.rng);
        self.counters.record(accepted);
        trace!(insertion, delta_u = u_new - u_old, log_bias, accepted, "Targeted exchange proposal");

        if accepted {
            Ok(CoordsVelBox::new(trial, xvb.velocities.clone(), xvb.periodic_box))
        } else {
            Ok(xvb.clone())
        }
    }
}

impl MonteCarloMove for TibdExchangeMove {
    fn n_proposed(&self) -> usize {
        self.counters.proposed
    }
    fn n_accepted(&self) -> usize {
        self.counters.accepted
    }
}

/// Applies its moves in order, feeding each the output of the previous one.
#[derive(Default)]
pub struct SequenceMove {
    moves: Vec<Box<dyn Move + Send>>,
}

impl SequenceMove {
    pub fn new(moves: Vec<Box<dyn Move + Send>>) -> Self {
        Self { moves }
    }

    pub fn push(&mut self, mv: Box<dyn Move + Send>) {
        self.moves.push(mv);
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

impl Move for SequenceMove {
    fn name(&self) -> &'static str {
        "SequenceMove"
    }

    fn apply(&mut self, xvb: &CoordsVelBox) -> Result<CoordsVelBox, FepError> {
        let mut current = xvb.clone();
        for mv in &mut self.moves {
            current = mv.apply(&current)?;
        }
        Ok(current)
    }
}
