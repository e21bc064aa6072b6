use super::config::{ConfigError, SimulationProtocol};
use super::error::{FepError, SimulationPhase};
use super::state::InitialState;
use crate::core::md::Context;
use crate::core::models::state::{PeriodicBox, is_finite_frame};
use crate::core::storage::{StoredArrays, Trajectory};
use tracing::{debug, instrument, trace};

/// Splits `n` items into full batches of `batch_size` followed by the remainder, if any.
pub fn batches(n: usize, batch_size: usize) -> Result<Vec<usize>, ConfigError> {
    if batch_size == 0 {
        return Err(ConfigError::InvalidValue {
            name: "batch_size",
            reason: "must be at least 1".to_string(),
        });
    }
    let mut sizes = vec![batch_size; n / batch_size];
    if n % batch_size != 0 {
        sizes.push(n % batch_size);
    }
    Ok(sizes)
}

/// Simulates one lambda window: `burn_in` discarded steps, then `n_frames` frames
/// recorded every `steps_per_frame` steps.
///
/// With `max_buffer_frames`, production runs in batches that are appended to a
/// [`StoredArrays`] so at most one batch is held in memory.
#[instrument(skip_all, name = "sample", fields(lambda = state.lamb()))]
pub fn sample(
    state: &InitialState,
    protocol: &SimulationProtocol,
    max_buffer_frames: Option<usize>,
) -> Result<(Trajectory, Vec<PeriodicBox>), FepError> {
    let mut ctx = Context::new(
        state.x0().clone(),
        state.v0().clone(),
        *state.box0(),
        state.potentials().to_vec(),
        state.integrator(),
        state.barostat(),
    )?;

    if protocol.burn_in() > 0 {
        ctx.multiple_steps(protocol.burn_in(), 0)?;
    }
    if !is_finite_frame(ctx.get_x_t()) {
        return Err(FepError::NumericalDivergence {
            phase: SimulationPhase::Equilibration,
            lambda: state.lamb(),
        });
    }

    let steps_per_frame = protocol.steps_per_frame();
    let (trajectory, boxes) = match max_buffer_frames {
        None => {
            let (frames, boxes) = ctx.multiple_steps(protocol.production_steps(), steps_per_frame)?;
            (Trajectory::InMemory(frames), boxes)
        }
        Some(buffer) => {
            let mut store = StoredArrays::new()?;
            let mut boxes = Vec::with_capacity(protocol.n_frames());
            for (i, n_batch) in batches(protocol.n_frames(), buffer)?.into_iter().enumerate() {
                let (frames, batch_boxes) = ctx.multiple_steps(n_batch * steps_per_frame, steps_per_frame)?;
                store.extend(&frames)?;
                boxes.extend(batch_boxes);
                trace!(batch = i, n_frames = n_batch, "Flushed production batch");
            }
            (Trajectory::Stored(store), boxes)
        }
    };

    if trajectory.len() != protocol.n_frames() || boxes.len() != protocol.n_frames() {
        return Err(FepError::FrameCountMismatch {
            frames: trajectory.len(),
            boxes: boxes.len(),
        });
    }
    let last_finite = match trajectory.last()? {
        Some(frame) => is_finite_frame(&frame),
        None => false,
    };
    if !last_finite {
        return Err(FepError::NumericalDivergence {
            phase: SimulationPhase::Production,
            lambda: state.lamb(),
        });
    }

    debug!(n_frames = trajectory.len(), "Sampling complete");
    Ok((trajectory, boxes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::md::LangevinIntegrator;
    use crate::core::models::state::orthorhombic_box;
    use crate::core::potentials::{HarmonicBond, Potential, PositionRestraint};
    use nalgebra::Vector3;

    fn harmonic_state(seed: u64, k: f64) -> InitialState {
        let restraint = Potential::PositionRestraint(PositionRestraint::new(
            vec![0],
            vec![[1.0; 3]],
            vec![k],
        ));
        InitialState::new(
            vec![restraint],
            LangevinIntegrator::new(300.0, 0.01, 10.0, vec![1.0], seed),
            None,
            vec![Vector3::new(1.0, 1.0, 1.0)],
            vec![Vector3::zeros()],
            orthorhombic_box([3.0; 3]),
            0.0,
            vec![0],
        )
        .unwrap()
    }

    #[test]
    fn batches_yields_full_batches_then_remainder() {
        assert_eq!(batches(10, 3).unwrap(), vec![3, 3, 3, 1]);
        assert_eq!(batches(9, 3).unwrap(), vec![3, 3, 3]);
        assert_eq!(batches(2, 5).unwrap(), vec![2]);
        assert!(batches(0, 4).unwrap().is_empty());
    }

    #[test]
    fn batches_rejects_zero_batch_size() {
        assert!(batches(10, 0).is_err());
    }

    #[test]
    fn sample_records_exactly_n_frames() {
        let protocol = SimulationProtocol::new(20, 7, 3).unwrap();
        let (frames, boxes) = sample(&harmonic_state(1, 100.0), &protocol, None).unwrap();
        assert_eq!(frames.len(), 7);
        assert_eq!(boxes.len(), 7);
    }

    #[test]
    fn streamed_sampling_matches_in_memory_sampling_bitwise() {
        let protocol = SimulationProtocol::new(10, 11, 4).unwrap();
        let state = harmonic_state(9, 100.0);
        let (in_memory, boxes_a) = sample(&state, &protocol, None).unwrap();
        let (streamed, boxes_b) = sample(&state, &protocol, Some(3)).unwrap();
        assert!(matches!(streamed, Trajectory::Stored(_)));
        assert_eq!(in_memory.to_vec().unwrap(), streamed.to_vec().unwrap());
        assert_eq!(boxes_a, boxes_b);
    }

    #[test]
    fn exploding_system_reports_equilibration_divergence() {
        let bond = Potential::HarmonicBond(HarmonicBond::new(vec![[0, 1]], vec![[1e12, 0.1]]));
        let state = InitialState::new(
            vec![bond],
            LangevinIntegrator::new(300.0, 0.01, 0.0, vec![1.0, 1.0], 0),
            None,
            vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.5, 0.0, 0.0)],
            vec![Vector3::zeros(); 2],
            orthorhombic_box([1e6; 3]),
            0.25,
            vec![],
        )
        .unwrap();
        let protocol = SimulationProtocol::new(500, 1, 1).unwrap();
        let err = sample(&state, &protocol, None).unwrap_err();
        assert!(matches!(
            err,
            FepError::NumericalDivergence {
                phase: SimulationPhase::Equilibration,
                lambda
            } if lambda == 0.25
        ));
    }
}
