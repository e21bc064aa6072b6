use fepkit::core::md::{LangevinIntegrator, MonteCarloBarostat};
use fepkit::core::models::state::{CoordsVelBox, is_finite_frame, orthorhombic_box};
use fepkit::core::potentials::{Nonbonded, Potential};
use fepkit::engine::moves::{
    BdExchangeMove, MonteCarloMove, Move, NptMove, SequenceMove, TibdExchangeMove,
};
use nalgebra::Vector3;

const T: f64 = 300.0;

/// A 3×3×3 lattice of Lennard-Jones particles; particle 13 sits at the centre and acts
/// as the ligand.
fn lj_lattice() -> (Nonbonded, CoordsVelBox) {
    let spacing = 0.5;
    let box_length = 3.0 * spacing;
    let mut coords = Vec::new();
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                coords.push(Vector3::new(
                    (i as f64 + 0.5) * spacing,
                    (j as f64 + 0.5) * spacing,
                    (k as f64 + 0.5) * spacing,
                ));
            }
        }
    }
    let nonbonded = Nonbonded::new(vec![[0.0, 0.3, 0.5]; coords.len()], vec![], 2.0, 0.7);
    let xvb = CoordsVelBox::at_rest(coords, orthorhombic_box([box_length; 3]));
    (nonbonded, xvb)
}

fn waters() -> Vec<Vec<usize>> {
    (0..27).filter(|&i| i != 13).map(|i| vec![i]).collect()
}

#[test]
fn md_and_exchange_moves_compose_into_a_stable_chain() {
    let (nonbonded, xvb) = lj_lattice();
    let n_atoms = xvb.n_atoms();
    let integrator = LangevinIntegrator::new(T, 0.002, 1.0, vec![18.0; n_atoms], 0);
    let barostat = MonteCarloBarostat::new(
        1.0,
        T,
        (0..n_atoms).map(|i| vec![i]).collect(),
        5,
        0,
    );
    let npt = NptMove::new(
        vec![Potential::Nonbonded(nonbonded.clone())],
        integrator,
        Some(barostat),
        50,
        12,
    );
    let targeted = TibdExchangeMove::new(nonbonded.clone(), waters(), T, vec![13], 0.4, 5).unwrap();
    let untargeted = BdExchangeMove::new(nonbonded, waters(), T, 6).unwrap();

    let mut chain = SequenceMove::new(vec![Box::new(npt), Box::new(targeted), Box::new(untargeted)]);
    let out = chain.apply_n(&xvb, 10).unwrap();

    assert!(is_finite_frame(&out.coords));
    assert!(is_finite_frame(&out.velocities));
    assert_ne!(out.periodic_box, xvb.periodic_box, "barostat never changed the box");
    assert_eq!(out.n_atoms(), xvb.n_atoms());
}

#[test]
fn targeted_counters_track_every_proposal() {
    let (nonbonded, xvb) = lj_lattice();
    let mut mover = TibdExchangeMove::new(nonbonded, waters(), T, vec![13], 0.4, 21).unwrap();
    let out = mover.apply_n(&xvb, 300).unwrap();
    assert_eq!(mover.n_proposed(), 300);
    assert!(mover.n_accepted() <= 300);
    assert!((0.0..=1.0).contains(&mover.acceptance_fraction()));
    assert_eq!(out.coords[13], xvb.coords[13], "the ligand is never exchanged");
    assert_eq!(out.velocities, xvb.velocities);
}

#[test]
fn targeted_move_rejects_a_sphere_larger_than_the_box() {
    let (nonbonded, xvb) = lj_lattice();
    let mut mover = TibdExchangeMove::new(nonbonded, waters(), T, vec![13], 5.0, 0).unwrap();
    assert!(mover.apply(&xvb).is_err());
}
