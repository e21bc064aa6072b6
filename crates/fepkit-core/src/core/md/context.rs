use super::barostat::{BarostatStepper, MonteCarloBarostat};
use super::integrator::{LangevinIntegrator, LangevinStepper};
use super::MdError;
use crate::core::models::state::{Frame, PeriodicBox};
use crate::core::potentials::Potential;
use nalgebra::Vector3;

fn total_forces(
    potentials: &[Potential],
    x: &[Vector3<f64>],
    periodic_box: &PeriodicBox,
) -> Result<(Frame, f64), MdError> {
    let mut forces = vec![Vector3::zeros(); x.len()];
    let mut energy = 0.0;
    for potential in potentials {
        energy += potential.accumulate_forces(x, periodic_box, &mut forces)?;
    }
    Ok((forces, energy))
}

fn total_energy(
    potentials: &[Potential],
    x: &[Vector3<f64>],
    periodic_box: &PeriodicBox,
) -> Result<f64, MdError> {
    potentials.iter().try_fold(0.0, |acc, p| Ok(acc + p.energy(x, periodic_box)?))
}

/// Bound simulation state: coordinates, velocities, box, potentials and steppers.
pub struct Context {
    x: Frame,
    v: Frame,
    periodic_box: PeriodicBox,
    forces: Frame,
    potentials: Vec<Potential>,
    integrator: LangevinStepper,
    barostat: Option<BarostatStepper>,
    step_count: u64,
}

impl Context {
    pub fn new(
        x0: Frame,
        v0: Frame,
        box0: PeriodicBox,
        potentials: Vec<Potential>,
        integrator: &LangevinIntegrator,
        barostat: Option<&MonteCarloBarostat>,
    ) -> Result<Self, MdError> {
        let n_atoms = x0.len();
        if v0.len() != n_atoms {
            return Err(MdError::AtomCountMismatch {
                what: "velocities",
                found: v0.len(),
                n_atoms,
            });
        }
        for potential in &potentials {
            potential.validate(n_atoms)?;
        }
        let integrator = integrator.bind(n_atoms)?;
        let barostat = barostat.map(|b| b.bind(n_atoms, &box0)).transpose()?;
        let (forces, _) = total_forces(&potentials, &x0, &box0)?;

        Ok(Self {
            x: x0,
            v: v0,
            periodic_box: box0,
            forces,
            potentials,
            integrator,
            barostat,
            step_count: 0,
        })
    }

    /// Advances `n_steps` steps, recording coordinates and box after every
    /// `store_x_interval`-th step. An interval of zero records nothing.
    pub fn multiple_steps(
        &mut self,
        n_steps: usize,
        store_x_interval: usize,
    ) -> Result<(Vec<Frame>, Vec<PeriodicBox>), MdError> {
        let capacity = if store_x_interval == 0 {
            0
        } else {
            n_steps / store_x_interval
        };
        let mut frames = Vec::with_capacity(capacity);
        let mut boxes = Vec::with_capacity(capacity);

        for step in 1..=n_steps {
            self.step()?;
            if store_x_interval > 0 && step % store_x_interval == 0 {
                frames.push(self.x.clone());
                boxes.push(self.periodic_box);
            }
        }
        Ok((frames, boxes))
    }

    fn step(&mut self) -> Result<(), MdError> {
        let potentials = &self.potentials;
        let periodic_box = self.periodic_box;
        self.integrator.step(&mut self.x, &mut self.v, &mut self.forces, |x| {
            total_forces(potentials, x, &periodic_box).map(|(f, _)| f)
        })?;
        self.step_count += 1;

        if let Some(barostat) = self.barostat.as_mut() {
            if self.step_count % barostat.interval() as u64 == 0 {
                let accepted = barostat.attempt(&mut self.x, &mut self.periodic_box, |x, b| {
                    total_energy(potentials, x, b)
                })?;
                if accepted {
                    self.forces = total_forces(potentials, &self.x, &self.periodic_box)?.0;
                }
            }
        }
        Ok(())
    }

    pub fn get_x_t(&self) -> &Frame {
        &self.x
    }

    pub fn get_v_t(&self) -> &Frame {
        &self.v
    }

    pub fn get_box(&self) -> &PeriodicBox {
        &self.periodic_box
    }

    pub fn potentials(&self) -> &[Potential] {
        &self.potentials
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn potential_energy(&self) -> Result<f64, MdError> {
        total_energy(&self.potentials, &self.x, &self.periodic_box)
    }

    /// Barostat `(attempted, accepted)` counts, if a barostat is bound.
    pub fn barostat_counts(&self) -> Option<(usize, usize)> {
        self.barostat
            .as_ref()
            .map(|b| (b.n_attempted(), b.n_accepted()))
    }
}
