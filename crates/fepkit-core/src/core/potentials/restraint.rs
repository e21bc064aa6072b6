use super::error::PotentialError;
use super::{PotentialTerm, check_index, lerp, lerp_all};
use crate::core::models::state::PeriodicBox;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Isotropic harmonic tether `U = ½ k |x - x_anchor|²` on selected atoms.
///
/// Anchors are absolute positions and are not imaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PositionRestraint {
    pub atoms: Vec<usize>,
    pub anchors: Vec<[f64; 3]>,
    pub k: Vec<f64>,
}

impl PositionRestraint {
    pub fn new(atoms: Vec<usize>, anchors: Vec<[f64; 3]>, k: Vec<f64>) -> Self {
        Self { atoms, anchors, k }
    }

    pub fn interpolate(a: &Self, b: &Self, lambda: f64) -> Result<Self, PotentialError> {
        if a.atoms != b.atoms {
            return Err(PotentialError::TopologyMismatch {
                term: Self::NAME,
                detail: "restrained atom lists differ".to_string(),
            });
        }
        Ok(Self {
            atoms: a.atoms.clone(),
            anchors: lerp_all(&a.anchors, &b.anchors, lambda),
            k: a.k.iter().zip(&b.k).map(|(&ka, &kb)| lerp(ka, kb, lambda)).collect(),
        })
    }
}

impl PotentialTerm for PositionRestraint {
    const NAME: &'static str = "PositionRestraint";

    fn validate(&self, n_atoms: usize) -> Result<(), PotentialError> {
        for params in [self.anchors.len(), self.k.len()] {
            if params != self.atoms.len() {
                return Err(PotentialError::ParameterCountMismatch {
                    term: Self::NAME,
                    indices: self.atoms.len(),
                    params,
                });
            }
        }
        for &i in &self.atoms {
            check_index(Self::NAME, i, n_atoms)?;
        }
        Ok(())
    }

    fn evaluate(
        &self,
        coords: &[Vector3<f64>],
        _periodic_box: &PeriodicBox,
        mut forces: Option<&mut [Vector3<f64>]>,
    ) -> Result<f64, PotentialError> {
        self.validate(coords.len())?;
        let mut energy = 0.0;
        for ((&i, anchor), &k) in self.atoms.iter().zip(&self.anchors).zip(&self.k) {
            let d = coords[i] - Vector3::from(*anchor);
            energy += 0.5 * k * d.norm_squared();
            if let Some(f) = forces.as_deref_mut() {
                f[i] -= d * k;
            }
        }
        Ok(energy)
    }
}
