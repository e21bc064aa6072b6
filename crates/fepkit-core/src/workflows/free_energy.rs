use crate::core::constants::kbt;
use crate::core::geometry::{centroid, compute_box_center, get_group_indices, image_frame};
use crate::core::models::state::{Frame, PeriodicBox};
use crate::core::potentials::find_harmonic_bond;
use crate::core::storage::Trajectory;
use crate::engine::bar::{bar_with_bootstrapped_uncertainty, estimate_from_ukln, pair_overlap};
use crate::engine::config::{BootstrapConfig, EstimationConfig, SimulationProtocol};
use crate::engine::decomposition::UKln;
use crate::engine::error::FepError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::report::{
    WorkPanel, make_dg_errs_figure, make_overlap_detail_figure, make_overlap_summary_figure,
};
use crate::engine::runner::run_sequential_sims_given_initial_states;
use crate::engine::state::InitialState;
use tracing::{info, instrument};

/// Rendered SVG diagnostics of one estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct Figures {
    pub dg_errs: String,
    pub overlap_summary: String,
    pub overlap_detail: String,
}

impl Figures {
    /// `(file stem, svg)` pairs in a fixed order.
    pub fn named(&self) -> [(&'static str, &str); 3] {
        [
            ("dg_errs", &self.dg_errs),
            ("overlap_summary", &self.overlap_summary),
            ("overlap_detail", &self.overlap_detail),
        ]
    }
}

/// Per-pair estimates of a full ladder. Energies are in kJ/mol.
#[derive(Debug, Clone, PartialEq)]
pub struct PairAnalysis {
    /// ΔG of each adjacent pair from the component-summed works.
    pub all_dgs: Vec<f64>,
    pub all_errs: Vec<f64>,
    /// `[pair][component]` ΔG, for diagnostics only.
    pub dg_by_lambda_by_component: Vec<Vec<f64>>,
    pub dg_errs_by_lambda_by_component: Vec<Vec<f64>>,
    pub overlaps_by_lambda: Vec<f64>,
    pub overlaps_by_lambda_by_component: Vec<Vec<f64>>,
    /// Histogram panels: every component followed by the summed works.
    pub panels_by_lambda: Vec<Vec<WorkPanel>>,
}

/// Pair-BAR over every adjacent pair of an `n_states` ladder.
///
/// The per-pair ΔG always comes from BAR on the summed works. BAR does not commute with
/// the sum over components, so the per-component values need not add up to it and are
/// never used to build totals.
pub fn analyze_pairs(
    u_kln_by_component_by_lambda: &[Vec<UKln>],
    n_states: usize,
    temperature: f64,
    bootstrap: &BootstrapConfig,
    prefix: &str,
) -> Result<PairAnalysis, FepError> {
    let found = u_kln_by_component_by_lambda.len();
    if n_states < 2 || found != n_states - 1 {
        return Err(FepError::IncompleteLadder {
            n_states,
            expected: n_states.saturating_sub(1).max(1),
            found,
        });
    }
    let kt = kbt(temperature);

    let mut analysis = PairAnalysis {
        all_dgs: Vec::with_capacity(found),
        all_errs: Vec::with_capacity(found),
        dg_by_lambda_by_component: Vec::with_capacity(found),
        dg_errs_by_lambda_by_component: Vec::with_capacity(found),
        overlaps_by_lambda: Vec::with_capacity(found),
        overlaps_by_lambda_by_component: Vec::with_capacity(found),
        panels_by_lambda: Vec::with_capacity(found),
    };

    for (lamb_idx, u_kln_by_component) in u_kln_by_component_by_lambda.iter().enumerate() {
        let mut dgs = Vec::with_capacity(u_kln_by_component.len());
        let mut errs = Vec::with_capacity(u_kln_by_component.len());
        let mut overlaps = Vec::with_capacity(u_kln_by_component.len());
        let mut panels = Vec::with_capacity(u_kln_by_component.len() + 1);
        for u_kln in u_kln_by_component {
            let estimate = estimate_from_ukln(u_kln, bootstrap)?;
            dgs.push(estimate.df * kt);
            errs.push(estimate.df_err * kt);
            overlaps.push(estimate.overlap);
            panels.push(WorkPanel {
                title: u_kln.component.clone(),
                df: estimate.df,
                df_err: estimate.df_err,
                w_f: u_kln.forward_work(),
                w_r: u_kln.reverse_work(),
            });
        }

        let total = UKln::sum(u_kln_by_component).ok_or_else(|| {
            FepError::InvalidState(format!("pair {lamb_idx} has no energy components"))
        })?;
        let (w_f, w_r) = (total.forward_work(), total.reverse_work());
        let (total_df, total_df_err) = bar_with_bootstrapped_uncertainty(&w_f, &w_r, bootstrap)?;
        let total_overlap = pair_overlap(&w_f, &w_r, total_df)?;
        let (total_dg, total_dg_err) = (total_df * kt, total_df_err * kt);
        info!(
            "{} BAR: lambda {} -> {} dG: {:.3} +- {:.3} kJ/mol",
            prefix,
            lamb_idx,
            lamb_idx + 1,
            total_dg,
            total_dg_err
        );
        panels.push(WorkPanel {
            title: format!("{prefix}_{lamb_idx}_to_{}", lamb_idx + 1),
            df: total_df,
            df_err: total_df_err,
            w_f,
            w_r,
        });

        analysis.all_dgs.push(total_dg);
        analysis.all_errs.push(total_dg_err);
        analysis.overlaps_by_lambda.push(total_overlap);
        analysis.dg_by_lambda_by_component.push(dgs);
        analysis.dg_errs_by_lambda_by_component.push(errs);
        analysis.overlaps_by_lambda_by_component.push(overlaps);
        analysis.panels_by_lambda.push(panels);
    }
    Ok(analysis)
}

/// Everything produced by one multi-state estimate.
#[derive(Debug)]
pub struct SimulationResult {
    pub all_dgs: Vec<f64>,
    pub all_errs: Vec<f64>,
    pub dg_by_lambda_by_component: Vec<Vec<f64>>,
    pub dg_errs_by_lambda_by_component: Vec<Vec<f64>>,
    pub overlaps_by_lambda: Vec<f64>,
    pub overlaps_by_lambda_by_component: Vec<Vec<f64>>,
    pub component_names: Vec<String>,
    pub figures: Figures,
    /// Trajectories of the retained lambda indices, ascending.
    pub frames: Vec<Trajectory>,
    pub boxes: Vec<Vec<PeriodicBox>>,
    pub initial_states: Vec<InitialState>,
    pub protocol: SimulationProtocol,
}

impl SimulationResult {
    /// Sum of the per-pair ΔG in kJ/mol.
    pub fn total_dg(&self) -> f64 {
        self.all_dgs.iter().sum()
    }

    /// Pair errors combined in quadrature.
    pub fn total_err(&self) -> f64 {
        self.all_errs.iter().map(|e| e * e).sum::<f64>().sqrt()
    }

    pub fn lambdas(&self) -> Vec<f64> {
        self.initial_states.iter().map(InitialState::lamb).collect()
    }
}

/// Runs every window of the ladder and combines adjacent pairs with BAR.
#[instrument(skip_all, name = "free_energy_workflow", fields(prefix = prefix, n_states = initial_states.len()))]
pub fn estimate_free_energy_given_initial_states(
    initial_states: &[InitialState],
    protocol: &SimulationProtocol,
    config: &EstimationConfig,
    prefix: &str,
    reporter: &ProgressReporter,
) -> Result<SimulationResult, FepError> {
    let component_names: Vec<String> = initial_states
        .first()
        .map(|s| s.potentials().iter().map(|p| p.name().to_string()).collect())
        .unwrap_or_default();

    reporter.report(Progress::PhaseStart { name: "Sampling" });
    let run = run_sequential_sims_given_initial_states(initial_states, protocol, config, reporter)?;
    reporter.report(Progress::PhaseFinish);

    reporter.report(Progress::PhaseStart { name: "Estimation" });
    let analysis = analyze_pairs(
        &run.u_kln_by_component_by_lambda,
        initial_states.len(),
        config.temperature,
        &config.bootstrap,
        prefix,
    )?;
    let figures = Figures {
        dg_errs: make_dg_errs_figure(&component_names, &analysis.dg_errs_by_lambda_by_component)?,
        overlap_summary: make_overlap_summary_figure(
            &component_names,
            &analysis.overlaps_by_lambda_by_component,
            &analysis.overlaps_by_lambda,
        )?,
        overlap_detail: make_overlap_detail_figure(&analysis.panels_by_lambda)?,
    };
    reporter.report(Progress::PhaseFinish);

    Ok(SimulationResult {
        all_dgs: analysis.all_dgs,
        all_errs: analysis.all_errs,
        dg_by_lambda_by_component: analysis.dg_by_lambda_by_component,
        dg_errs_by_lambda_by_component: analysis.dg_errs_by_lambda_by_component,
        overlaps_by_lambda: analysis.overlaps_by_lambda,
        overlaps_by_lambda_by_component: analysis.overlaps_by_lambda_by_component,
        component_names,
        figures,
        frames: run.frames,
        boxes: run.boxes,
        initial_states: initial_states.to_vec(),
        protocol: protocol.clone(),
    })
}

/// Recentres each frame on the ligand centroid and wraps every bonded group into its
/// box.
///
/// The result is for visualization; energies of imaged frames are not guaranteed to
/// match those of the originals.
pub fn image_frames(
    initial_state: &InitialState,
    frames: &Trajectory,
    boxes: &[PeriodicBox],
) -> Result<Vec<Frame>, FepError> {
    if frames.len() != boxes.len() {
        return Err(FepError::FrameCountMismatch {
            frames: frames.len(),
            boxes: boxes.len(),
        });
    }
    let bonds = find_harmonic_bond(initial_state.potentials())?;
    let groups = get_group_indices(&bonds.bonds, initial_state.n_atoms());

    let mut imaged = Vec::with_capacity(frames.len());
    frames.try_for_each_batch(|start, batch| -> Result<(), FepError> {
        for (frame, periodic_box) in batch.iter().zip(&boxes[start..]) {
            let ligand_center = centroid(frame, initial_state.ligand_idxs()).ok_or_else(|| {
                FepError::InvalidState("cannot recentre on an empty ligand selection".to_string())
            })?;
            let offset = ligand_center - compute_box_center(periodic_box);
            let centered: Frame = frame.iter().map(|x| x - offset).collect();
            imaged.push(image_frame(&groups, &centered, periodic_box));
        }
        Ok(())
    })?;
    Ok(imaged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::md::LangevinIntegrator;
    use crate::core::models::state::orthorhombic_box;
    use crate::core::potentials::{HarmonicBond, Potential, PositionRestraint};
    use crate::engine::bar::bar;
    use nalgebra::Vector3;

    const T: f64 = 300.0;

    /// Tensor whose forward and reverse works are exactly `w_f` and `w_r`.
    fn ukln(name: &str, w_f: &[f64], w_r: &[f64]) -> UKln {
        UKln::new(
            name,
            [
                [vec![0.0; w_f.len()], w_r.to_vec()],
                [w_f.to_vec(), vec![0.0; w_r.len()]],
            ],
        )
    }

    fn quick_bootstrap() -> BootstrapConfig {
        BootstrapConfig {
            n_bootstrap: 20,
            seed: 1,
        }
    }

    #[test]
    fn incomplete_ladders_are_rejected() {
        let pair = vec![ukln("A", &[0.0, 1.0], &[0.0, -1.0])];
        let err = analyze_pairs(&[pair.clone()], 3, T, &quick_bootstrap(), "t").unwrap_err();
        assert!(matches!(
            err,
            FepError::IncompleteLadder {
                n_states: 3,
                expected: 2,
                found: 1
            }
        ));
        assert!(analyze_pairs(&[], 1, T, &quick_bootstrap(), "t").is_err());
    }

    #[test]
    fn totals_come_from_summed_works_not_summed_components() {
        let a_f = [0.0, 0.0, 0.2, 4.0];
        let a_r = [0.5, 0.4, 0.6, 0.3];
        let b_f = [1.0, 2.0, 3.0, 0.0];
        let b_r = [-1.0, 0.0, 1.0, 2.0];
        let pair = vec![ukln("A", &a_f, &a_r), ukln("B", &b_f, &b_r)];
        let analysis = analyze_pairs(&[pair], 2, T, &quick_bootstrap(), "t").unwrap();

        let kt = kbt(T);
        let sum_f: Vec<f64> = a_f.iter().zip(&b_f).map(|(a, b)| a + b).collect();
        let sum_r: Vec<f64> = a_r.iter().zip(&b_r).map(|(a, b)| a + b).collect();
        let expected_total = bar(&sum_f, &sum_r).unwrap() * kt;
        assert!((analysis.all_dgs[0] - expected_total).abs() < 1e-9);

        let component_sum: f64 = analysis.dg_by_lambda_by_component[0].iter().sum();
        assert!(
            (component_sum - analysis.all_dgs[0]).abs() > 0.1 * kt,
            "component sum {component_sum} unexpectedly matches total {}",
            analysis.all_dgs[0]
        );
    }

    #[test]
    fn panels_list_components_then_the_summed_pair() {
        let pair = vec![
            ukln("HarmonicBond", &[0.1, 0.2, 0.3], &[-0.1, -0.2, 0.0]),
            ukln("Nonbonded", &[0.3, 0.1, 0.2], &[-0.3, 0.0, -0.1]),
        ];
        let analysis = analyze_pairs(&[pair.clone(), pair], 3, T, &quick_bootstrap(), "run").unwrap();
        let titles: Vec<&str> = analysis.panels_by_lambda[1]
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(titles, vec!["HarmonicBond", "Nonbonded", "run_1_to_2"]);
        for overlap in analysis.overlaps_by_lambda.iter().chain(analysis.overlaps_by_lambda_by_component.iter().flatten()) {
            assert!((0.0..=1.0).contains(overlap));
        }
    }

    #[test]
    fn total_error_combines_pairs_in_quadrature() {
        let result = SimulationResult {
            all_dgs: vec![1.0, 2.0],
            all_errs: vec![0.3, 0.4],
            dg_by_lambda_by_component: vec![],
            dg_errs_by_lambda_by_component: vec![],
            overlaps_by_lambda: vec![],
            overlaps_by_lambda_by_component: vec![],
            component_names: vec![],
            figures: Figures {
                dg_errs: String::new(),
                overlap_summary: String::new(),
                overlap_detail: String::new(),
            },
            frames: vec![],
            boxes: vec![],
            initial_states: vec![],
            protocol: SimulationProtocol::new(0, 1, 1).unwrap(),
        };
        assert_eq!(result.total_dg(), 3.0);
        assert!((result.total_err() - 0.5).abs() < 1e-12);
    }

    fn dimer_state(potentials: Vec<Potential>) -> InitialState {
        InitialState::new(
            potentials,
            LangevinIntegrator::new(T, 0.001, 1.0, vec![1.0; 3], 0),
            None,
            vec![Vector3::zeros(); 3],
            vec![Vector3::zeros(); 3],
            orthorhombic_box([2.0; 3]),
            0.0,
            vec![0],
        )
        .unwrap()
    }

    #[test]
    fn image_frames_centres_the_ligand_and_keeps_molecules_whole() {
        let bond = Potential::HarmonicBond(HarmonicBond::new(vec![[1, 2]], vec![[100.0, 0.1]]));
        let state = dimer_state(vec![bond]);
        let frame = vec![
            Vector3::new(0.1, 0.1, 0.1),
            Vector3::new(1.95, 1.0, 1.0),
            Vector3::new(2.05, 1.0, 1.0),
        ];
        let box0 = orthorhombic_box([2.0; 3]);
        let imaged = image_frames(&state, &Trajectory::InMemory(vec![frame]), &[box0]).unwrap();

        assert!((imaged[0][0] - Vector3::repeat(1.0)).norm() < 1e-12);
        let bond_vec = imaged[0][2] - imaged[0][1];
        assert!((bond_vec.norm() - 0.1).abs() < 1e-12);
        for atom in &imaged[0] {
            assert!(atom.iter().all(|&c| (0.0..2.0).contains(&c)));
        }
    }

    #[test]
    fn image_frames_requires_a_bond_term_and_matching_boxes() {
        let restraint = Potential::PositionRestraint(PositionRestraint::new(
            vec![0],
            vec![[0.0; 3]],
            vec![1.0],
        ));
        let state = dimer_state(vec![restraint]);
        let frames = Trajectory::InMemory(vec![vec![Vector3::zeros(); 3]]);
        let box0 = orthorhombic_box([2.0; 3]);
        assert!(matches!(
            image_frames(&state, &frames, &[box0]),
            Err(FepError::Potential { .. })
        ));
        assert!(matches!(
            image_frames(&state, &frames, &[]),
            Err(FepError::FrameCountMismatch { frames: 1, boxes: 0 })
        ));
    }
}
