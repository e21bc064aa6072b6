use super::config::{EstimationConfig, SimulationProtocol};
use super::decomposition::{
    EnergyDecomposedState, UKln, compute_energy_decomposed_u_kln, get_batch_u_fns,
};
use super::error::FepError;
use super::progress::{Progress, ProgressReporter};
use super::sampler::sample;
use super::state::InitialState;
use super::window::DecomposedWindow;
use crate::core::models::state::PeriodicBox;
use crate::core::storage::Trajectory;
use tracing::{debug, info, instrument};

/// Output of a full ladder traversal.
#[derive(Debug)]
pub struct SequentialRun {
    /// `L - 1` entries, each holding one tensor per energy component.
    pub u_kln_by_component_by_lambda: Vec<Vec<UKln>>,
    /// Trajectories of the retained lambda indices, in ascending index order.
    pub frames: Vec<Trajectory>,
    pub boxes: Vec<Vec<PeriodicBox>>,
}

/// Samples every state in ladder order and computes the decomposed `u_kln` tensors of
/// each adjacent pair.
///
/// Memory stays bounded by two decomposed states regardless of the ladder length. Each
/// index in `config.keep_idxs` additionally retains an independent copy of its
/// trajectory, so keeping many interior windows grows memory linearly; production runs
/// should keep only the end states.
#[instrument(skip_all, name = "sequential_runner", fields(n_states = initial_states.len()))]
pub fn run_sequential_sims_given_initial_states(
    initial_states: &[InitialState],
    protocol: &SimulationProtocol,
    config: &EstimationConfig,
    reporter: &ProgressReporter,
) -> Result<SequentialRun, FepError> {
    let n_states = initial_states.len();
    if let Some(&index) = config.keep_idxs.iter().find(|&&i| i >= n_states) {
        return Err(FepError::InvalidKeepIndex { index, n_states });
    }

    let mut window = DecomposedWindow::new();
    let mut u_kln_by_component_by_lambda = Vec::with_capacity(n_states.saturating_sub(1));
    let mut frames = Vec::with_capacity(config.keep_idxs.len());
    let mut boxes = Vec::with_capacity(config.keep_idxs.len());

    reporter.report(Progress::TaskStart {
        total_steps: n_states as u64,
    });
    for (lamb_idx, initial_state) in initial_states.iter().enumerate() {
        reporter.report(Progress::WindowStart {
            index: lamb_idx,
            lambda: initial_state.lamb(),
        });

        let (cur_frames, cur_boxes) = sample(initial_state, protocol, config.max_buffer_frames)?;
        info!(lambda = initial_state.lamb(), "Completed simulation at lambda={}", initial_state.lamb());

        if config.keep_idxs.contains(&lamb_idx) {
            frames.push(cur_frames.duplicate()?);
            boxes.push(cur_boxes.clone());
            debug!(lamb_idx, "Retained trajectory for export");
        }

        window.evict_for(lamb_idx);
        let batch_u_fns = get_batch_u_fns(initial_state.potentials(), config.temperature);
        let cur_state = EnergyDecomposedState::new(cur_frames, cur_boxes, batch_u_fns)?;
        window.insert(lamb_idx, cur_state);
        reporter.report(Progress::WindowOccupancy {
            index: lamb_idx,
            live_states: window.live_count(),
        });

        if let Some((prev, cur)) = window.adjacent_pair(lamb_idx) {
            let u_kln_by_component = compute_energy_decomposed_u_kln(prev, cur)?;
            debug!(
                lamb_idx,
                n_components = u_kln_by_component.len(),
                "Computed decomposed u_kln for adjacent pair"
            );
            u_kln_by_component_by_lambda.push(u_kln_by_component);
        }
        reporter.report(Progress::TaskIncrement);
    }
    window.clear();
    reporter.report(Progress::TaskFinish);

    Ok(SequentialRun {
        u_kln_by_component_by_lambda,
        frames,
        boxes,
    })
}
