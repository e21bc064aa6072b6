//! Bound potential terms of the reference engine.
//!
//! Every term is parameterized for a single lambda value; alchemical
//! intermediates are produced by [`Potential::interpolate`] when the ladder is
//! built, so evaluation itself never sees lambda.

pub mod bonded;
pub mod error;
pub mod nonbonded;
pub mod restraint;

pub use bonded::{HarmonicAngle, HarmonicBond};
pub use error::PotentialError;
pub use nonbonded::Nonbonded;
pub use restraint::PositionRestraint;

use super::models::state::{Frame, PeriodicBox};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Shared contract of the concrete term types.
pub trait PotentialTerm {
    const NAME: &'static str;

    /// Checks index ranges and parameter counts against a system of `n_atoms`.
    fn validate(&self, n_atoms: usize) -> Result<(), PotentialError>;

    /// Returns the energy in kJ/mol, accumulating forces into `forces` when given.
    fn evaluate(
        &self,
        coords: &[Vector3<f64>],
        periodic_box: &PeriodicBox,
        forces: Option<&mut [Vector3<f64>]>,
    ) -> Result<f64, PotentialError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Potential {
    HarmonicBond(HarmonicBond),
    HarmonicAngle(HarmonicAngle),
    PositionRestraint(PositionRestraint),
    Nonbonded(Nonbonded),
}

impl Potential {
    pub fn name(&self) -> &'static str {
        match self {
            Potential::HarmonicBond(_) => HarmonicBond::NAME,
            Potential::HarmonicAngle(_) => HarmonicAngle::NAME,
            Potential::PositionRestraint(_) => PositionRestraint::NAME,
            Potential::Nonbonded(_) => Nonbonded::NAME,
        }
    }

    pub fn validate(&self, n_atoms: usize) -> Result<(), PotentialError> {
        match self {
            Potential::HarmonicBond(p) => p.validate(n_atoms),
            Potential::HarmonicAngle(p) => p.validate(n_atoms),
            Potential::PositionRestraint(p) => p.validate(n_atoms),
            Potential::Nonbonded(p) => p.validate(n_atoms),
        }
    }

    fn evaluate(
        &self,
        coords: &[Vector3<f64>],
        periodic_box: &PeriodicBox,
        forces: Option<&mut [Vector3<f64>]>,
    ) -> Result<f64, PotentialError> {
        match self {
            Potential::HarmonicBond(p) => p.evaluate(coords, periodic_box, forces),
            Potential::HarmonicAngle(p) => p.evaluate(coords, periodic_box, forces),
            Potential::PositionRestraint(p) => p.evaluate(coords, periodic_box, forces),
            Potential::Nonbonded(p) => p.evaluate(coords, periodic_box, forces),
        }
    }

    /// Evaluates forces and energy at a single configuration.
    pub fn execute(
        &self,
        coords: &[Vector3<f64>],
        periodic_box: &PeriodicBox,
    ) -> Result<(Frame, f64), PotentialError> {
        let mut forces = vec![Vector3::zeros(); coords.len()];
        let energy = self.evaluate(coords, periodic_box, Some(&mut forces))?;
        Ok((forces, energy))
    }

    pub fn energy(
        &self,
        coords: &[Vector3<f64>],
        periodic_box: &PeriodicBox,
    ) -> Result<f64, PotentialError> {
        self.evaluate(coords, periodic_box, None)
    }

    /// Adds this term's forces into `forces` and returns its energy.
    pub fn accumulate_forces(
        &self,
        coords: &[Vector3<f64>],
        periodic_box: &PeriodicBox,
        forces: &mut [Vector3<f64>],
    ) -> Result<f64, PotentialError> {
        self.evaluate(coords, periodic_box, Some(forces))
    }

    /// Linear interpolation of parameters between two end-state terms of the same kind.
    pub fn interpolate(a: &Self, b: &Self, lambda: f64) -> Result<Self, PotentialError> {
        if !(0.0..=1.0).contains(&lambda) {
            return Err(PotentialError::InvalidLambda(lambda));
        }
        match (a, b) {
            (Potential::HarmonicBond(a), Potential::HarmonicBond(b)) => {
                HarmonicBond::interpolate(a, b, lambda).map(Potential::HarmonicBond)
            }
            (Potential::HarmonicAngle(a), Potential::HarmonicAngle(b)) => {
                HarmonicAngle::interpolate(a, b, lambda).map(Potential::HarmonicAngle)
            }
            (Potential::PositionRestraint(a), Potential::PositionRestraint(b)) => {
                PositionRestraint::interpolate(a, b, lambda).map(Potential::PositionRestraint)
            }
            (Potential::Nonbonded(a), Potential::Nonbonded(b)) => {
                Nonbonded::interpolate(a, b, lambda).map(Potential::Nonbonded)
            }
            _ => Err(PotentialError::IncompatibleTerms {
                left: a.name(),
                right: b.name(),
            }),
        }
    }

    pub fn as_harmonic_bond(&self) -> Option<&HarmonicBond> {
        match self {
            Potential::HarmonicBond(p) => Some(p),
            _ => None,
        }
    }
}

/// First `HarmonicBond` term in `potentials`.
pub fn find_harmonic_bond(potentials: &[Potential]) -> Result<&HarmonicBond, PotentialError> {
    potentials
        .iter()
        .find_map(Potential::as_harmonic_bond)
        .ok_or(PotentialError::MissingTerm(HarmonicBond::NAME))
}

/// Interpolates two positionally corresponding term lists.
pub fn interpolate_all(
    a: &[Potential],
    b: &[Potential],
    lambda: f64,
) -> Result<Vec<Potential>, PotentialError> {
    if a.len() != b.len() {
        return Err(PotentialError::TopologyMismatch {
            term: "Potential list",
            detail: format!("{} vs {} terms", a.len(), b.len()),
        });
    }
    a.iter()
        .zip(b)
        .map(|(pa, pb)| Potential::interpolate(pa, pb, lambda))
        .collect()
}

#[inline]
pub(crate) fn lerp(a: f64, b: f64, lambda: f64) -> f64 {
    (1.0 - lambda) * a + lambda * b
}

pub(crate) fn lerp_all<const N: usize>(a: &[[f64; N]], b: &[[f64; N]], lambda: f64) -> Vec<[f64; N]> {
    a.iter()
        .zip(b)
        .map(|(pa, pb)| std::array::from_fn(|k| lerp(pa[k], pb[k], lambda)))
        .collect()
}

#[inline]
pub(crate) fn check_index(
    term: &'static str,
    index: usize,
    n_atoms: usize,
) -> Result<(), PotentialError> {
    if index >= n_atoms {
        Err(PotentialError::AtomIndexOutOfRange {
            term,
            index,
            n_atoms,
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::state::orthorhombic_box;

    fn restraint(k: f64) -> Potential {
        Potential::PositionRestraint(PositionRestraint::new(vec![0], vec![[0.0; 3]], vec![k]))
    }

    #[test]
    fn find_harmonic_bond_fails_when_variant_is_absent() {
        let potentials = vec![restraint(1.0)];
        assert_eq!(
            find_harmonic_bond(&potentials).unwrap_err(),
            PotentialError::MissingTerm("HarmonicBond")
        );
    }

    #[test]
    fn find_harmonic_bond_returns_first_bond_term() {
        let bond = HarmonicBond::new(vec![[0, 1]], vec![[1.0, 0.1]]);
        let potentials = vec![restraint(1.0), Potential::HarmonicBond(bond.clone())];
        assert_eq!(find_harmonic_bond(&potentials).unwrap(), &bond);
    }

    #[test]
    fn interpolating_different_kinds_is_rejected() {
        let bond = Potential::HarmonicBond(HarmonicBond::new(vec![], vec![]));
        let err = Potential::interpolate(&bond, &restraint(1.0), 0.5).unwrap_err();
        assert!(matches!(err, PotentialError::IncompatibleTerms { .. }));
    }

    #[test]
    fn interpolate_rejects_lambda_outside_unit_interval() {
        assert_eq!(
            Potential::interpolate(&restraint(1.0), &restraint(2.0), 1.5).unwrap_err(),
            PotentialError::InvalidLambda(1.5)
        );
    }

    #[test]
    fn execute_returns_forces_and_energy() {
        let coords = vec![Vector3::new(0.1, 0.0, 0.0)];
        let (forces, energy) = restraint(100.0)
            .execute(&coords, &orthorhombic_box([1.0; 3]))
            .unwrap();
        assert!((energy - 0.5).abs() < 1e-12);
        assert!((forces[0].x + 10.0).abs() < 1e-12);
    }

    #[test]
    fn potential_round_trips_through_toml_with_type_tag() {
        let source = r#"
            type = "harmonic-bond"
            bonds = [[0, 1]]
            params = [[1000.0, 0.1]]
        "#;
        let potential: Potential = toml::from_str(source).unwrap();
        assert_eq!(potential.name(), "HarmonicBond");
    }
}
