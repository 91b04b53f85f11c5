//! Contact force QP, solved with Clarabel.
//!
//! Decision variables are the twelve ground reaction forces acting on the
//! robot, `f = [f_FR, f_FL, f_RR, f_RL]`, expressed in the control frame. The
//! body is treated as one rigid body with massless legs:
//!
//! ```text
//! ddq = A f + g        A = [ I/m          ...  I/m          ]
//!                          [ I_c^-1 [r_0]x ... I_c^-1 [r_3]x ]
//! ```
//!
//! Cost: `||A f + g - ddq_des||^2_W + lambda ||f||^2`, i.e.
//! `P = A^T W A + lambda I`, `q = A^T W (g - ddq_des)`.
//!
//! Subject to:
//! - Unloaded legs: `f = 0` (equality)
//! - Friction pyramid: `|fx| <= mu fz`, `|fy| <= mu fz`
//! - Normal force bounds: `f_min <= fz <= f_max`
//! - Optional acceleration box: `min_ddq <= A f + g <= max_ddq`

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use log::debug;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3, Vector6};

use quadloco_core::config::{RobotParams, StanceConfig};
use quadloco_core::types::{GRAVITY, NUM_LEGS};

const NUM_FORCES: usize = 3 * NUM_LEGS;

/// Gravity as a 6-dof body acceleration `[x, y, z, roll, pitch, yaw]`.
pub fn gravity_acceleration() -> Vector6<f64> {
    Vector6::new(0.0, 0.0, -GRAVITY, 0.0, 0.0, 0.0)
}

/// One tick's worth of QP data, all in the control frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceProblem {
    /// Foot positions relative to the base origin.
    pub foot_positions: [Vector3<f64>; NUM_LEGS],
    /// Inverse body inertia.
    pub inertia_inv: Matrix3<f64>,
    pub ddq_desired: Vector6<f64>,
    /// Legs allowed to carry load.
    pub loaded: [bool; NUM_LEGS],
    /// Normal force bounds per leg (N).
    pub fz_min: [f64; NUM_LEGS],
    pub fz_max: [f64; NUM_LEGS],
}

/// Static QP weights and limits.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceQp {
    mass: f64,
    friction_coeff: f64,
    regularization: f64,
    acc_weight: Vector6<f64>,
    min_ddq: Vector6<f64>,
    max_ddq: Vector6<f64>,
    max_iters: u32,
}

impl ForceQp {
    pub fn new(robot: &RobotParams, stance: &StanceConfig) -> Self {
        Self {
            mass: robot.mass,
            friction_coeff: robot.friction_coeff,
            regularization: stance.regularization,
            acc_weight: Vector6::from(stance.acc_weight),
            min_ddq: Vector6::from(stance.min_ddq),
            max_ddq: Vector6::from(stance.max_ddq),
            max_iters: stance.max_solver_iters,
        }
    }

    /// Map from stacked foot forces to body acceleration (without gravity).
    pub fn dynamics_matrix(&self, problem: &ForceProblem) -> DMatrix<f64> {
        let mut a = DMatrix::zeros(6, NUM_FORCES);
        let linear = Matrix3::identity() / self.mass;
        for (leg, r) in problem.foot_positions.iter().enumerate() {
            a.fixed_view_mut::<3, 3>(0, 3 * leg).copy_from(&linear);
            a.fixed_view_mut::<3, 3>(3, 3 * leg)
                .copy_from(&(problem.inertia_inv * r.cross_matrix()));
        }
        a
    }

    /// Solve for foot forces. `None` when Clarabel does not converge.
    pub fn solve(
        &self,
        problem: &ForceProblem,
        acceleration_box: bool,
    ) -> Option<[Vector3<f64>; NUM_LEGS]> {
        let a = self.dynamics_matrix(problem);
        let g = DVector::from_column_slice(gravity_acceleration().as_slice());
        let ddq = DVector::from_column_slice(problem.ddq_desired.as_slice());
        let w = DMatrix::from_diagonal(&DVector::from_column_slice(self.acc_weight.as_slice()));

        let at_w = a.transpose() * &w;
        let p = &at_w * &a + DMatrix::identity(NUM_FORCES, NUM_FORCES) * self.regularization;
        let q = &at_w * (&g - &ddq);

        let (a_all, b_all, n_eq, n_ineq) = self.build_constraints(problem, &a, acceleration_box);

        let p_csc = dmatrix_to_csc_upper_tri(&p);
        let a_csc = dmatrix_to_csc(&a_all);
        let mut cones: Vec<SupportedConeT<f64>> = Vec::with_capacity(2);
        if n_eq > 0 {
            cones.push(ZeroConeT(n_eq));
        }
        if n_ineq > 0 {
            cones.push(NonnegativeConeT(n_ineq));
        }

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.max_iters)
            .verbose(false)
            .tol_gap_abs(1e-6)
            .tol_gap_rel(1e-6)
            .tol_feas(1e-6)
            .build()
            .ok()?;

        let q_slice: Vec<f64> = q.iter().copied().collect();
        let b_slice: Vec<f64> = b_all.iter().copied().collect();

        let mut solver =
            match DefaultSolver::new(&p_csc, &q_slice, &a_csc, &b_slice, &cones, settings) {
                Ok(solver) => solver,
                Err(err) => {
                    debug!("force QP setup failed: {err:?}");
                    return None;
                }
            };
        solver.solve();
        let sol = &solver.solution;
        if !matches!(sol.status, SolverStatus::Solved | SolverStatus::AlmostSolved) {
            debug!("force QP not solved: {:?}", sol.status);
            return None;
        }

        Some(std::array::from_fn(|leg| {
            Vector3::new(sol.x[3 * leg], sol.x[3 * leg + 1], sol.x[3 * leg + 2])
        }))
    }

    /// Stack all constraints, equalities first.
    ///
    /// Clarabel's nonnegative cone reads `A z + s = b, s >= 0`, so every
    /// inequality row is written as `a^T f <= b`.
    fn build_constraints(
        &self,
        problem: &ForceProblem,
        dynamics: &DMatrix<f64>,
        acceleration_box: bool,
    ) -> (DMatrix<f64>, DVector<f64>, usize, usize) {
        let n_loaded = problem.loaded.iter().filter(|&&l| l).count();
        let n_eq = 3 * (NUM_LEGS - n_loaded);
        let n_box = if acceleration_box { 12 } else { 0 };
        let n_ineq = 6 * n_loaded + n_box;

        let mut a_all = DMatrix::zeros(n_eq + n_ineq, NUM_FORCES);
        let mut b_all = DVector::zeros(n_eq + n_ineq);
        let mut row = 0;

        // --- Unloaded legs carry no force ---
        for (leg, &loaded) in problem.loaded.iter().enumerate() {
            if !loaded {
                for j in 0..3 {
                    a_all[(row, 3 * leg + j)] = 1.0;
                    row += 1;
                }
            }
        }

        // --- Friction pyramid and normal force bounds ---
        let mu = self.friction_coeff;
        for (leg, &loaded) in problem.loaded.iter().enumerate() {
            if !loaded {
                continue;
            }
            let (fx, fy, fz) = (3 * leg, 3 * leg + 1, 3 * leg + 2);
            for (idx, sign) in [(fx, 1.0), (fx, -1.0), (fy, 1.0), (fy, -1.0)] {
                a_all[(row, idx)] = sign;
                a_all[(row, fz)] = -mu;
                row += 1;
            }

            // -fz <= -f_min
            a_all[(row, fz)] = -1.0;
            b_all[row] = -problem.fz_min[leg];
            row += 1;

            // fz <= f_max
            a_all[(row, fz)] = 1.0;
            b_all[row] = problem.fz_max[leg];
            row += 1;
        }

        // --- Acceleration box ---
        if acceleration_box {
            let g = gravity_acceleration();
            for i in 0..6 {
                for j in 0..NUM_FORCES {
                    a_all[(row, j)] = dynamics[(i, j)];
                    a_all[(row + 1, j)] = -dynamics[(i, j)];
                }
                b_all[row] = self.max_ddq[i] - g[i];
                b_all[row + 1] = g[i] - self.min_ddq[i];
                row += 2;
            }
        }

        debug_assert_eq!(row, n_eq + n_ineq, "constraint count mismatch");
        (a_all, b_all, n_eq, n_ineq)
    }
}

/// Convert a nalgebra `DMatrix<f64>` to a Clarabel `CscMatrix<f64>` (full matrix).
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Upper triangle of a symmetric `DMatrix<f64>` as a Clarabel `CscMatrix<f64>`.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..=j.min(nrows - 1) {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}
