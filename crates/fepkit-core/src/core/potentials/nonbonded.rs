use super::error::PotentialError;
use super::{PotentialTerm, check_index, lerp_all};
use crate::core::constants::ONE_4PI_EPS0;
use crate::core::geometry::delta_r;
use crate::core::models::state::PeriodicBox;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::f64::consts::PI;

/// Pairwise Lennard-Jones plus erfc-screened Coulomb with a hard cutoff.
///
/// Per-atom parameters are `[q, sigma, epsilon]` (e, nm, kJ/mol), combined with
/// Lorentz-Berthelot rules. `beta` is the Ewald screening parameter in 1/nm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Nonbonded {
    pub params: Vec<[f64; 3]>,
    #[serde(default)]
    pub exclusions: Vec<[usize; 2]>,
    pub beta: f64,
    pub cutoff: f64,
}

#[inline]
fn pair_energy_and_dudr(r: f64, qij: f64, sigma: f64, epsilon: f64, beta: f64) -> (f64, f64) {
    let sr6 = (sigma / r).powi(6);
    let sr12 = sr6 * sr6;
    let lj = 4.0 * epsilon * (sr12 - sr6);
    let dlj = 4.0 * epsilon * (-12.0 * sr12 + 6.0 * sr6) / r;

    let screened = libm::erfc(beta * r);
    let coulomb = ONE_4PI_EPS0 * qij * screened / r;
    let dcoulomb = ONE_4PI_EPS0
        * qij
        * (-screened / (r * r) - 2.0 * beta / PI.sqrt() * (-(beta * r).powi(2)).exp() / r);

    (lj + coulomb, dlj + dcoulomb)
}

impl Nonbonded {
    pub fn new(params: Vec<[f64; 3]>, exclusions: Vec<[usize; 2]>, beta: f64, cutoff: f64) -> Self {
        Self {
            params,
            exclusions,
            beta,
            cutoff,
        }
    }

    fn exclusion_set(&self) -> HashSet<(usize, usize)> {
        self.exclusions
            .iter()
            .map(|&[i, j]| (i.min(j), i.max(j)))
            .collect()
    }

    #[inline]
    fn pair(&self, i: usize, j: usize, r: f64) -> (f64, f64) {
        let [qi, si, ei] = self.params[i];
        let [qj, sj, ej] = self.params[j];
        pair_energy_and_dudr(r, qi * qj, 0.5 * (si + sj), (ei * ej).sqrt(), self.beta)
    }

    fn check_box(&self, periodic_box: &PeriodicBox) -> Result<(), PotentialError> {
        let diag = periodic_box.diagonal();
        if diag.iter().any(|&l| !(l > 0.0)) {
            return Err(PotentialError::InvalidBox { term: Self::NAME });
        }
        Ok(())
    }

    /// Interaction energy between the atoms in `group` and every atom outside it.
    ///
    /// Intra-group pairs are skipped, so a rigid displacement of the group changes the
    /// total nonbonded energy by exactly the change in this quantity.
    pub fn group_interaction_energy(
        &self,
        coords: &[Vector3<f64>],
        periodic_box: &PeriodicBox,
        group: &[usize],
    ) -> Result<f64, PotentialError> {
        self.validate(coords.len())?;
        self.check_box(periodic_box)?;
        for &g in group {
            check_index(Self::NAME, g, coords.len())?;
        }
        let exclusions = self.exclusion_set();
        let in_group: HashSet<usize> = group.iter().copied().collect();
        let cutoff_sq = self.cutoff * self.cutoff;

        let mut energy = 0.0;
        for &i in group {
            for j in (0..coords.len()).filter(|j| !in_group.contains(j)) {
                if exclusions.contains(&(i.min(j), i.max(j))) {
                    continue;
                }
                let d = delta_r(&coords[i], &coords[j], periodic_box);
                let r_sq = d.norm_squared();
                if r_sq >= cutoff_sq || r_sq == 0.0 {
                    continue;
                }
                energy += self.pair(i, j, r_sq.sqrt()).0;
            }
        }
        Ok(energy)
    }

    pub fn interpolate(a: &Self, b: &Self, lambda: f64) -> Result<Self, PotentialError> {
        if a.exclusions != b.exclusions {
            return Err(PotentialError::TopologyMismatch {
                term: Self::NAME,
                detail: "exclusion lists differ".to_string(),
            });
        }
        if a.beta != b.beta || a.cutoff != b.cutoff {
            return Err(PotentialError::TopologyMismatch {
                term: Self::NAME,
                detail: "beta and cutoff must be identical".to_string(),
            });
        }
        if a.params.len() != b.params.len() {
            return Err(PotentialError::TopologyMismatch {
                term: Self::NAME,
                detail: format!("{} vs {} atoms", a.params.len(), b.params.len()),
            });
        }
        Ok(Self {
            params: lerp_all(&a.params, &b.params, lambda),
            exclusions: a.exclusions.clone(),
            beta: a.beta,
            cutoff: a.cutoff,
        })
    }
}

impl PotentialTerm for Nonbonded {
    const NAME: &'static str = "Nonbonded";

    fn validate(&self, n_atoms: usize) -> Result<(), PotentialError> {
        if self.params.len() != n_atoms {
            return Err(PotentialError::ParameterCountMismatch {
                term: Self::NAME,
                indices: n_atoms,
                params: self.params.len(),
            });
        }
        for &[i, j] in &self.exclusions {
            check_index(Self::NAME, i, n_atoms)?;
            check_index(Self::NAME, j, n_atoms)?;
        }
        Ok(())
    }

    fn evaluate(
        &self,
        coords: &[Vector3<f64>],
        periodic_box: &PeriodicBox,
        mut forces: Option<&mut [Vector3<f64>]>,
    ) -> Result<f64, PotentialError> {
        self.validate(coords.len())?;
        self.check_box(periodic_box)?;
        let exclusions = self.exclusion_set();
        let cutoff_sq = self.cutoff * self.cutoff;
        let n = coords.len();

        let mut energy = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                if exclusions.contains(&(i, j)) {
                    continue;
                }
                let d = delta_r(&coords[i], &coords[j], periodic_box);
                let r_sq = d.norm_squared();
                if r_sq >= cutoff_sq || r_sq == 0.0 {
                    continue;
                }
                let r = r_sq.sqrt();
                let (u, dudr) = self.pair(i, j, r);
                energy += u;
                if let Some(f) = forces.as_deref_mut() {
                    let fi = d * (-dudr / r);
                    f[i] += fi;
                    f[j] -= fi;
                }
            }
        }
        Ok(energy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::state::orthorhombic_box;

    fn lj_only(n: usize) -> Nonbonded {
        Nonbonded::new(vec![[0.0, 0.3, 0.5]; n], vec![], 2.0, 1.2)
    }

    #[test]
    fn lennard_jones_minimum_is_minus_epsilon() {
        let nb = lj_only(2);
        let r_min = 2f64.powf(1.0 / 6.0) * 0.3;
        let coords = vec![Vector3::zeros(), Vector3::new(r_min, 0.0, 0.0)];
        let e = nb
            .evaluate(&coords, &orthorhombic_box([5.0; 3]), None)
            .unwrap();
        assert!((e + 0.5).abs() < 1e-9);
    }

    #[test]
    fn pairs_beyond_cutoff_do_not_interact() {
        let nb = lj_only(2);
        let coords = vec![Vector3::zeros(), Vector3::new(1.5, 0.0, 0.0)];
        let e = nb
            .evaluate(&coords, &orthorhombic_box([5.0; 3]), None)
            .unwrap();
        assert_eq!(e, 0.0);
    }

    #[test]
    fn excluded_pairs_do_not_interact() {
        let mut nb = lj_only(2);
        nb.exclusions.push([1, 0]);
        let coords = vec![Vector3::zeros(), Vector3::new(0.3, 0.0, 0.0)];
        let e = nb
            .evaluate(&coords, &orthorhombic_box([5.0; 3]), None)
            .unwrap();
        assert_eq!(e, 0.0);
    }

    #[test]
    fn forces_match_finite_differences_with_charges() {
        let nb = Nonbonded::new(
            vec![[0.4, 0.3, 0.5], [-0.4, 0.32, 0.6], [0.1, 0.28, 0.3]],
            vec![],
            3.0,
            1.0,
        );
        let b = orthorhombic_box([3.0; 3]);
        let coords = vec![
            Vector3::new(0.1, 0.1, 0.1),
            Vector3::new(0.5, 0.2, 0.1),
            Vector3::new(2.9, 0.1, 0.2),
        ];
        let mut forces = vec![Vector3::zeros(); 3];
        nb.evaluate(&coords, &b, Some(&mut forces)).unwrap();
        let h = 1e-6;
        for atom in 0..3 {
            for axis in 0..3 {
                let mut plus = coords.clone();
                let mut minus = coords.clone();
                plus[atom][axis] += h;
                minus[atom][axis] -= h;
                let expected = -(nb.evaluate(&plus, &b, None).unwrap()
                    - nb.evaluate(&minus, &b, None).unwrap())
                    / (2.0 * h);
                assert!((forces[atom][axis] - expected).abs() < 1e-3 * expected.abs().max(1.0));
            }
        }
    }

    #[test]
    fn group_interaction_equals_total_minus_intra_group_energy() {
        let nb = Nonbonded::new(vec![[0.2, 0.3, 0.4]; 4], vec![], 2.5, 1.0);
        let b = orthorhombic_box([3.0; 3]);
        let coords = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.15, 0.0, 0.0),
            Vector3::new(0.5, 0.1, 0.0),
            Vector3::new(0.4, 0.5, 0.1),
        ];
        let total = nb.evaluate(&coords, &b, None).unwrap();
        let group = nb.group_interaction_energy(&coords, &b, &[0, 1]).unwrap();
        let r01 = 0.15;
        let intra_01 = nb.pair(0, 1, r01).0;
        let r23 = (coords[2] - coords[3]).norm();
        let intra_23 = nb.pair(2, 3, r23).0;
        assert!((total - intra_01 - intra_23 - group).abs() < 1e-9);
    }

    #[test]
    fn parameter_count_must_match_atom_count() {
        let nb = lj_only(3);
        assert!(matches!(
            nb.evaluate(&[Vector3::zeros(); 2], &orthorhombic_box([1.0; 3]), None),
            Err(PotentialError::ParameterCountMismatch { .. })
        ));
    }
}
