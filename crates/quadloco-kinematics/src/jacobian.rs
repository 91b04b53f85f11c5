//! Geometric Jacobian helpers for revolute leg chains.

use nalgebra::{Matrix3, Vector3};

use quadloco_core::types::MOTORS_PER_LEG;

/// Linear Jacobian of a 3-joint revolute chain.
///
/// Origins, axes and the foot position must be expressed in one frame.
/// Column `i` is `axis_i × (foot - origin_i)`.
pub fn compute_leg_jacobian(
    origins: &[Vector3<f64>; MOTORS_PER_LEG],
    axes: &[Vector3<f64>; MOTORS_PER_LEG],
    foot: &Vector3<f64>,
) -> Matrix3<f64> {
    let mut j = Matrix3::zeros();
    for i in 0..MOTORS_PER_LEG {
        let column = axes[i].cross(&(foot - origins[i]));
        j.set_column(i, &column);
    }
    j
}

/// Joint torques that realize `force` at the foot: `τ = Jᵀ F`.
pub fn jacobian_transpose_torques(jacobian: &Matrix3<f64>, force: &Vector3<f64>) -> Vector3<f64> {
    jacobian.transpose() * force
}
