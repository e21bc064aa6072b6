use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// One coordinate frame: N positions in nm.
pub type Frame = Vec<Vector3<f64>>;

/// A 3×3 periodic box; columns are the box vectors in nm.
pub type PeriodicBox = Matrix3<f64>;

/// Builds an orthorhombic box from its three edge lengths.
pub fn orthorhombic_box(lengths: [f64; 3]) -> PeriodicBox {
    Matrix3::from_diagonal(&Vector3::new(lengths[0], lengths[1], lengths[2]))
}

/// `true` when every component of every position is finite.
pub fn is_finite_frame(frame: &[Vector3<f64>]) -> bool {
    frame.iter().all(|x| x.iter().all(|c| c.is_finite()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordsVelBox {
    pub coords: Frame,
    pub velocities: Frame,
    pub periodic_box: PeriodicBox,
}

impl CoordsVelBox {
    pub fn new(coords: Frame, velocities: Frame, periodic_box: PeriodicBox) -> Self {
        Self {
            coords,
            velocities,
            periodic_box,
        }
    }

    /// Starts from rest: velocities are zeroed.
    pub fn at_rest(coords: Frame, periodic_box: PeriodicBox) -> Self {
        let velocities = vec![Vector3::zeros(); coords.len()];
        Self::new(coords, velocities, periodic_box)
    }

    #[inline]
    pub fn n_atoms(&self) -> usize {
        self.coords.len()
    }

    pub fn volume(&self) -> f64 {
        self.periodic_box.determinant().abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orthorhombic_box_places_lengths_on_diagonal() {
        let b = orthorhombic_box([1.0, 2.0, 3.0]);
        assert_eq!(b.diagonal(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(b[(0, 1)], 0.0);
    }

    #[test]
    fn at_rest_zeroes_all_velocities() {
        let xvb = CoordsVelBox::at_rest(vec![Vector3::new(1.0, 0.0, 0.0); 4], orthorhombic_box([2.0; 3]));
        assert_eq!(xvb.n_atoms(), 4);
        assert!(xvb.velocities.iter().all(|v| v.norm() == 0.0));
        assert!((xvb.volume() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn is_finite_frame_detects_nan_and_infinity() {
        let mut frame = vec![Vector3::new(0.0, 1.0, 2.0)];
        assert!(is_finite_frame(&frame));
        frame[0].y = f64::NAN;
        assert!(!is_finite_frame(&frame));
        frame[0].y = f64::INFINITY;
        assert!(!is_finite_frame(&frame));
    }
}
