use super::error::FepError;
use crate::core::constants::beta;
use crate::core::models::state::{Frame, PeriodicBox};
use crate::core::potentials::Potential;
use crate::core::storage::Trajectory;

use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

static LIVE_STATES: AtomicUsize = AtomicUsize::new(0);
static PEAK_LIVE_STATES: AtomicUsize = AtomicUsize::new(0);

/// Reduced-energy evaluator for one bound potential term over a batch of frames.
#[derive(Debug, Clone)]
pub struct BatchEnergyEvaluator {
    potential: Potential,
    beta: f64,
}

impl BatchEnergyEvaluator {
    pub fn new(potential: Potential, temperature: f64) -> Self {
        Self {
            potential,
            beta: beta(temperature),
        }
    }

    pub fn name(&self) -> &'static str {
        self.potential.name()
    }

    pub fn potential(&self) -> &Potential {
        &self.potential
    }

    /// `β·U(x_n)` for every frame, in frame order.
    pub fn evaluate(&self, frames: &Trajectory, boxes: &[PeriodicBox]) -> Result<Vec<f64>, FepError> {
        if frames.len() != boxes.len() {
            return Err(FepError::FrameCountMismatch {
                frames: frames.len(),
                boxes: boxes.len(),
            });
        }
        let mut energies = Vec::with_capacity(frames.len());
        frames.try_for_each_batch(|start, batch| -> Result<(), FepError> {
            let reduced = |(i, frame): (usize, &Frame)| -> Result<f64, FepError> {
                Ok(self.beta * self.potential.energy(frame, &boxes[start + i])?)
            };

            #[cfg(feature = "parallel")]
            let batch_energies: Result<Vec<f64>, FepError> =
                batch.par_iter().enumerate().map(reduced).collect();
            #[cfg(not(feature = "parallel"))]
            let batch_energies: Result<Vec<f64>, FepError> =
                batch.iter().enumerate().map(reduced).collect();

            energies.extend(batch_energies?);
            Ok(())
        })?;
        Ok(energies)
    }
}

/// One evaluator per bound term, in term order.
pub fn get_batch_u_fns(potentials: &[Potential], temperature: f64) -> Vec<BatchEnergyEvaluator> {
    potentials
        .iter()
        .cloned()
        .map(|p| BatchEnergyEvaluator::new(p, temperature))
        .collect()
}

/// A sampled window together with the per-term evaluators of its own Hamiltonian.
#[derive(Debug)]
pub struct EnergyDecomposedState {
    frames: Trajectory,
    boxes: Vec<PeriodicBox>,
    batch_u_fns: Vec<BatchEnergyEvaluator>,
}

impl EnergyDecomposedState {
    pub fn new(
        frames: Trajectory,
        boxes: Vec<PeriodicBox>,
        batch_u_fns: Vec<BatchEnergyEvaluator>,
    ) -> Result<Self, FepError> {
        if frames.len() != boxes.len() {
            return Err(FepError::FrameCountMismatch {
                frames: frames.len(),
                boxes: boxes.len(),
            });
        }
        let live = LIVE_STATES.fetch_add(1, Ordering::SeqCst) + 1;
        PEAK_LIVE_STATES.fetch_max(live, Ordering::SeqCst);
        Ok(Self {
            frames,
            boxes,
            batch_u_fns,
        })
    }

    /// Decomposed states currently alive in this process.
    pub fn live_instances() -> usize {
        LIVE_STATES.load(Ordering::SeqCst)
    }

    /// High-water mark of [`Self::live_instances`] since the last
    /// [`Self::reset_peak_instances`].
    pub fn peak_instances() -> usize {
        PEAK_LIVE_STATES.load(Ordering::SeqCst)
    }

    pub fn reset_peak_instances() {
        PEAK_LIVE_STATES.store(LIVE_STATES.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    pub fn frames(&self) -> &Trajectory {
        &self.frames
    }

    pub fn boxes(&self) -> &[PeriodicBox] {
        &self.boxes
    }

    pub fn batch_u_fns(&self) -> &[BatchEnergyEvaluator] {
        &self.batch_u_fns
    }

    pub fn n_components(&self) -> usize {
        self.batch_u_fns.len()
    }

    /// Reduced energies of component `k` of this state's Hamiltonian over `other`'s frames.
    fn reduced_energies_on(
        &self,
        k: usize,
        other: &EnergyDecomposedState,
    ) -> Result<Vec<f64>, FepError> {
        self.batch_u_fns[k].evaluate(&other.frames, &other.boxes)
    }
}

impl Drop for EnergyDecomposedState {
    fn drop(&mut self) {
        LIVE_STATES.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reduced energies `u[k][l][n]`: energy function `k`, frames sampled at state `l`.
#[derive(Debug, Clone, PartialEq)]
pub struct UKln {
    pub component: String,
    pub u: [[Vec<f64>; 2]; 2],
}

impl UKln {
    pub fn new(component: impl Into<String>, u: [[Vec<f64>; 2]; 2]) -> Self {
        Self {
            component: component.into(),
            u,
        }
    }

    /// `u[1][0] - u[0][0]`: reduced work of switching state-0 samples to state 1.
    pub fn forward_work(&self) -> Vec<f64> {
        self.u[1][0]
            .iter()
            .zip(&self.u[0][0])
            .map(|(b, a)| b - a)
            .collect()
    }

    /// `u[0][1] - u[1][1]`: reduced work of switching state-1 samples to state 0.
    pub fn reverse_work(&self) -> Vec<f64> {
        self.u[0][1]
            .iter()
            .zip(&self.u[1][1])
            .map(|(a, b)| a - b)
            .collect()
    }

    pub fn n_samples(&self) -> (usize, usize) {
        (self.u[0][0].len(), self.u[1][1].len())
    }

    /// Element-wise sum over components. Returns `None` for an empty slice.
    pub fn sum(components: &[UKln]) -> Option<UKln> {
        let (first, rest) = components.split_first()?;
        let mut total = first.clone();
        total.component = "Total".to_string();
        for component in rest {
            for k in 0..2 {
                for l in 0..2 {
                    for (acc, v) in total.u[k][l].iter_mut().zip(&component.u[k][l]) {
                        *acc += v;
                    }
                }
            }
        }
        Some(total)
    }
}

/// Per-component 2×2×n reduced-energy tensors between two adjacent windows.
///
/// Term lists must correspond positionally. Every component is evaluated; the first
/// evaluator failure aborts the whole computation.
pub fn compute_energy_decomposed_u_kln(
    prev: &EnergyDecomposedState,
    cur: &EnergyDecomposedState,
) -> Result<Vec<UKln>, FepError> {
    if prev.n_components() != cur.n_components() {
        return Err(FepError::ComponentMismatch {
            left: prev.n_components(),
            right: cur.n_components(),
        });
    }
    (0..prev.n_components())
        .map(|k| {
            let u00 = prev.reduced_energies_on(k, prev)?;
            let u01 = prev.reduced_energies_on(k, cur)?;
            let u10 = cur.reduced_energies_on(k, prev)?;
            let u11 = cur.reduced_energies_on(k, cur)?;
            Ok(UKln::new(prev.batch_u_fns[k].name(), [[u00, u01], [u10, u11]]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::kbt;
    use crate::core::models::state::orthorhombic_box;
    use crate::core::potentials::{HarmonicBond, PositionRestraint};
    use nalgebra::Vector3;

    const T: f64 = 300.0;

    fn restraint(k: f64) -> Potential {
        Potential::PositionRestraint(PositionRestraint::new(vec![0], vec![[0.0; 3]], vec![k]))
    }

    fn bond(k: f64) -> Potential {
        Potential::HarmonicBond(HarmonicBond::new(vec![[0, 1]], vec![[k, 0.0]]))
    }

    fn state(xs: &[f64], potentials: Vec<Potential>) -> EnergyDecomposedState {
        let frames: Vec<_> = xs
            .iter()
            .map(|&x| vec![Vector3::new(x, 0.0, 0.0), Vector3::zeros()])
            .collect();
        let boxes = vec![orthorhombic_box([100.0; 3]); frames.len()];
        EnergyDecomposedState::new(Trajectory::InMemory(frames), boxes, get_batch_u_fns(&potentials, T))
            .unwrap()
    }

    #[test]
    fn evaluator_returns_reduced_energies_in_frame_order() {
        let s = state(&[0.0, 0.1, 0.2], vec![restraint(100.0)]);
        let u = s.batch_u_fns()[0].evaluate(s.frames(), s.boxes()).unwrap();
        let expected: Vec<f64> = [0.0f64, 0.1, 0.2]
            .iter()
            .map(|x| 0.5 * 100.0 * x * x / kbt(T))
            .collect();
        for (a, b) in u.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn chunked_store_evaluates_like_the_in_memory_trajectory() {
        use crate::core::storage::StoredArrays;

        let frames: Vec<_> = [0.05, 0.1, 0.15, 0.2, 0.25]
            .iter()
            .map(|&x| vec![Vector3::new(x, 0.0, 0.0), Vector3::zeros()])
            .collect();
        let boxes = vec![orthorhombic_box([100.0; 3]); frames.len()];
        let mut store = StoredArrays::new().unwrap();
        store.extend(&frames[..2]).unwrap();
        store.extend(&frames[2..4]).unwrap();
        store.extend(&frames[4..]).unwrap();

        let evaluator = BatchEnergyEvaluator::new(restraint(250.0), T);
        let in_memory = evaluator
            .evaluate(&Trajectory::InMemory(frames), &boxes)
            .unwrap();
        let streamed = evaluator.evaluate(&Trajectory::Stored(store), &boxes).unwrap();
        assert_eq!(in_memory, streamed);
    }

    #[test]
    fn u_kln_indexes_energy_function_then_sampled_state() {
        let prev = state(&[0.1, 0.2], vec![restraint(100.0)]);
        let cur = state(&[0.3], vec![restraint(400.0)]);
        let u_kln = compute_energy_decomposed_u_kln(&prev, &cur).unwrap();
        assert_eq!(u_kln.len(), 1);
        let u = &u_kln[0].u;
        assert_eq!(u[0][0].len(), 2);
        assert_eq!(u[0][1].len(), 1);
        let b = 1.0 / kbt(T);
        assert!((u[0][1][0] - b * 0.5 * 100.0 * 0.09).abs() < 1e-12);
        assert!((u[1][0][1] - b * 0.5 * 400.0 * 0.04).abs() < 1e-12);
        assert_eq!(u_kln[0].component, "PositionRestraint");
    }

    #[test]
    fn works_follow_sign_convention() {
        let u = UKln::new("x", [[vec![1.0], vec![5.0]], [vec![3.0], vec![4.0]]]);
        assert_eq!(u.forward_work(), vec![2.0]);
        assert_eq!(u.reverse_work(), vec![1.0]);
    }

    #[test]
    fn mismatched_component_counts_are_rejected() {
        let prev = state(&[0.1], vec![restraint(1.0)]);
        let cur = state(&[0.1], vec![restraint(1.0), bond(1.0)]);
        assert!(matches!(
            compute_energy_decomposed_u_kln(&prev, &cur),
            Err(FepError::ComponentMismatch { left: 1, right: 2 })
        ));
    }

    #[test]
    fn summed_tensor_is_elementwise_sum_of_components() {
        let prev = state(&[0.1, 0.2], vec![restraint(10.0), bond(20.0)]);
        let cur = state(&[0.3, 0.4], vec![restraint(30.0), bond(40.0)]);
        let components = compute_energy_decomposed_u_kln(&prev, &cur).unwrap();
        let total = UKln::sum(&components).unwrap();
        for k in 0..2 {
            for l in 0..2 {
                for n in 0..2 {
                    let expected = components[0].u[k][l][n] + components[1].u[k][l][n];
                    assert!((total.u[k][l][n] - expected).abs() < 1e-12);
                }
            }
        }
        assert!(UKln::sum(&[]).is_none());
    }

    #[test]
    fn evaluator_failures_propagate() {
        let three_atoms = Potential::HarmonicBond(HarmonicBond::new(vec![[0, 2]], vec![[1.0, 0.0]]));
        let prev = state(&[0.1], vec![restraint(1.0)]);
        let frames = Trajectory::InMemory(vec![vec![Vector3::zeros(), Vector3::zeros()]]);
        let cur = EnergyDecomposedState::new(
            frames,
            vec![orthorhombic_box([10.0; 3])],
            get_batch_u_fns(&[three_atoms], T),
        )
        .unwrap();
        assert!(matches!(
            compute_energy_decomposed_u_kln(&prev, &cur),
            Err(FepError::Potential { .. })
        ));
    }
}
