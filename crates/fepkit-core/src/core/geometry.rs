use super::models::state::PeriodicBox;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use std::collections::BTreeMap;

/// Minimum-image displacement `ri - rj` under an orthorhombic box.
///
/// Only the box diagonal is used; off-diagonal elements are ignored.
#[inline]
pub fn delta_r(ri: &Vector3<f64>, rj: &Vector3<f64>, periodic_box: &PeriodicBox) -> Vector3<f64> {
    let mut diff = ri - rj;
    for k in 0..3 {
        let length = periodic_box[(k, k)];
        if length > 0.0 {
            diff[k] -= length * (diff[k] / length + 0.5).floor();
        }
    }
    diff
}

/// Geometric centre of the box spanned by its column vectors.
pub fn compute_box_center(periodic_box: &PeriodicBox) -> Vector3<f64> {
    periodic_box.column_sum() * 0.5
}

pub fn box_volume(periodic_box: &PeriodicBox) -> f64 {
    periodic_box.determinant().abs()
}

/// Unweighted centroid of the selected atoms. Returns `None` for an empty selection.
pub fn centroid(coords: &[Vector3<f64>], idxs: &[usize]) -> Option<Vector3<f64>> {
    if idxs.is_empty() {
        return None;
    }
    let sum = idxs
        .iter()
        .fold(Vector3::zeros(), |acc, &i| acc + coords[i]);
    Some(sum / idxs.len() as f64)
}

/// Wraps a single point into `[0, L)` along each box diagonal.
pub fn wrap_into_box(x: &Vector3<f64>, periodic_box: &PeriodicBox) -> Vector3<f64> {
    let mut wrapped = *x;
    for k in 0..3 {
        let length = periodic_box[(k, k)];
        if length > 0.0 {
            wrapped[k] -= length * (wrapped[k] / length).floor();
        }
    }
    wrapped
}

/// Connected components of the bond graph over `n_atoms` particles.
///
/// Atoms that appear in no bond form singleton groups. Groups are ordered by their
/// smallest member and the members of each group are sorted, so the result is stable.
pub fn get_group_indices(bonds: &[[usize; 2]], n_atoms: usize) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..n_atoms).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for &[a, b] in bonds {
        if a >= n_atoms || b >= n_atoms {
            continue;
        }
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            parent[hi] = lo;
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n_atoms {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }
    groups.into_values().collect()
}

/// Translates each group so that its centroid lies inside the box.
///
/// Groups are moved rigidly, so bonded molecules are never split across a boundary.
pub fn image_frame(
    group_idxs: &[Vec<usize>],
    frame: &[Vector3<f64>],
    periodic_box: &PeriodicBox,
) -> Vec<Vector3<f64>> {
    let mut imaged = frame.to_vec();
    for group in group_idxs {
        let Some(center) = centroid(frame, group) else {
            continue;
        };
        let shift = wrap_into_box(&center, periodic_box) - center;
        for &i in group {
            imaged[i] += shift;
        }
    }
    imaged
}

/// Rotates `points` rigidly about `pivot`.
pub fn rotate_about(
    points: &[Vector3<f64>],
    pivot: &Vector3<f64>,
    rotation: &UnitQuaternion<f64>,
) -> Vec<Vector3<f64>> {
    points
        .iter()
        .map(|p| pivot + rotation.transform_vector(&(p - pivot)))
        .collect()
}

/// Angle in radians at vertex `j` of the triangle `i-j-k`.
pub fn bond_angle(xi: &Vector3<f64>, xj: &Vector3<f64>, xk: &Vector3<f64>) -> f64 {
    let a = xi - xj;
    let b = xk - xj;
    let cos = (a.dot(&b) / (a.norm() * b.norm())).clamp(-1.0, 1.0);
    cos.acos()
}

/// Unit rotation about `axis` by `angle` radians.
pub fn axis_angle(axis: &Vector3<f64>, angle: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Unit::new_normalize(*axis), angle)
}
