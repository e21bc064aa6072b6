use super::error::PotentialError;
use super::{PotentialTerm, check_index, lerp_all};
use crate::core::geometry::delta_r;
use crate::core::models::state::PeriodicBox;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// `U = ½ k (r - r0)²` over a list of atom pairs. Parameters are `[k, r0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HarmonicBond {
    pub bonds: Vec<[usize; 2]>,
    pub params: Vec<[f64; 2]>,
}

impl HarmonicBond {
    pub fn new(bonds: Vec<[usize; 2]>, params: Vec<[f64; 2]>) -> Self {
        Self { bonds, params }
    }

    pub fn interpolate(a: &Self, b: &Self, lambda: f64) -> Result<Self, PotentialError> {
        if a.bonds != b.bonds {
            return Err(PotentialError::TopologyMismatch {
                term: Self::NAME,
                detail: "bond lists differ".to_string(),
            });
        }
        Ok(Self {
            bonds: a.bonds.clone(),
            params: lerp_all(&a.params, &b.params, lambda),
        })
    }
}

impl PotentialTerm for HarmonicBond {
    const NAME: &'static str = "HarmonicBond";

    fn validate(&self, n_atoms: usize) -> Result<(), PotentialError> {
        if self.bonds.len() != self.params.len() {
            return Err(PotentialError::ParameterCountMismatch {
                term: Self::NAME,
                indices: self.bonds.len(),
                params: self.params.len(),
            });
        }
        for &[i, j] in &self.bonds {
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
        let mut energy = 0.0;
        for (&[i, j], &[k, r0]) in self.bonds.iter().zip(&self.params) {
            let d = delta_r(&coords[i], &coords[j], periodic_box);
            let r = d.norm();
            let dr = r - r0;
            energy += 0.5 * k * dr * dr;
            if let Some(f) = forces.as_deref_mut() {
                if r > 0.0 {
                    let fi = d * (-k * dr / r);
                    f[i] += fi;
                    f[j] -= fi;
                }
            }
        }
        Ok(energy)
    }
}

/// `U = ½ k (θ - θ0)²` over atom triples with the vertex in the middle.
/// Parameters are `[k, θ0]` with θ0 in radians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HarmonicAngle {
    pub angles: Vec<[usize; 3]>,
    pub params: Vec<[f64; 2]>,
}

impl HarmonicAngle {
    pub fn new(angles: Vec<[usize; 3]>, params: Vec<[f64; 2]>) -> Self {
        Self { angles, params }
    }

    pub fn interpolate(a: &Self, b: &Self, lambda: f64) -> Result<Self, PotentialError> {
        if a.angles != b.angles {
            return Err(PotentialError::TopologyMismatch {
                term: Self::NAME,
                detail: "angle lists differ".to_string(),
            });
        }
        Ok(Self {
            angles: a.angles.clone(),
            params: lerp_all(&a.params, &b.params, lambda),
        })
    }
}

impl PotentialTerm for HarmonicAngle {
    const NAME: &'static str = "HarmonicAngle";

    fn validate(&self, n_atoms: usize) -> Result<(), PotentialError> {
        if self.angles.len() != self.params.len() {
            return Err(PotentialError::ParameterCountMismatch {
                term: Self::NAME,
                indices: self.angles.len(),
                params: self.params.len(),
            });
        }
        for triple in &self.angles {
            for &idx in triple {
                check_index(Self::NAME, idx, n_atoms)?;
            }
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
        let mut energy = 0.0;
        for (&[i, j, k], &[kt, theta0]) in self.angles.iter().zip(&self.params) {
            let a = delta_r(&coords[i], &coords[j], periodic_box);
            let b = delta_r(&coords[k], &coords[j], periodic_box);
            let (na, nb) = (a.norm(), b.norm());
            if na == 0.0 || nb == 0.0 {
                continue;
            }
            let cos = (a.dot(&b) / (na * nb)).clamp(-1.0, 1.0);
            let theta = cos.acos();
            let dtheta = theta - theta0;
            energy += 0.5 * kt * dtheta * dtheta;

            if let Some(f) = forces.as_deref_mut() {
                let sin = (1.0 - cos * cos).sqrt().max(1e-8);
                // dθ/dx = -(1/sinθ) dcosθ/dx
                let dcos_da = b / (na * nb) - a * (cos / (na * na));
                let dcos_db = a / (na * nb) - b * (cos / (nb * nb));
                let prefactor = kt * dtheta / sin;
                let fi = dcos_da * prefactor;
                let fk = dcos_db * prefactor;
                f[i] += fi;
                f[k] += fk;
                f[j] -= fi + fk;
            }
        }
        Ok(energy)
    }
}
