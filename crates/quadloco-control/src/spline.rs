//! Swing foot trajectory generators.
//!
//! Two families share one surface, dispatched by [`SwingTrajectoryGenerator`]:
//!
//! - **Polynomial**: independent cubic or quintic segments for x and y over
//!   the whole swing, and two half-arcs for z (liftoff to apex, apex to
//!   touchdown) so the vertical velocity is exactly zero at the apex.
//! - **Curve**: one clamped B-spline through normalized control points
//!   `[progress, lateral offset, clearance fraction]`, mapped onto the step.
//!
//! All times are absolute on whatever clock the caller uses for
//! `set_parameters`; evaluation outside the swing window reports `ok = false`
//! and returns the clamped boundary sample.

use nalgebra::{Matrix3, Vector3};

use quadloco_core::error::ConfigError;
use quadloco_core::types::{SplineInfo, SplineKind, StepParameters};

/// Windows shorter than this are treated as instantaneous.
const MIN_DURATION: f64 = 1e-9;

/// Samples used to locate the clearance peak of a B-spline profile.
const PEAK_SEARCH_SAMPLES: usize = 200;

/// One evaluation of a swing trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectorySample {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub acceleration: Vector3<f64>,
    /// False when the query time lay outside the swing window.
    pub ok: bool,
}

// ---------------------------------------------------------------------------
// PolySegment
// ---------------------------------------------------------------------------

/// Boundary condition of a 1-D segment: position, velocity, acceleration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Boundary {
    pub p: f64,
    pub v: f64,
    pub a: f64,
}

impl Boundary {
    pub const fn at_rest(p: f64) -> Self {
        Self { p, v: 0.0, a: 0.0 }
    }
}

/// 1-D polynomial on `[start, start + duration]`, stored in normalized time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolySegment {
    start: f64,
    duration: f64,
    coeffs: [f64; 6],
}

impl PolySegment {
    /// Segment matching position and velocity at both ends.
    pub fn cubic(start: f64, duration: f64, from: Boundary, to: Boundary) -> Self {
        if duration < MIN_DURATION {
            return Self::constant(start, to.p);
        }
        let (v0, v1) = (from.v * duration, to.v * duration);
        let dp = to.p - from.p;
        Self {
            start,
            duration,
            coeffs: [
                from.p,
                v0,
                3.0 * dp - 2.0 * v0 - v1,
                -2.0 * dp + v0 + v1,
                0.0,
                0.0,
            ],
        }
    }

    /// Segment matching position, velocity and acceleration at both ends.
    pub fn quintic(start: f64, duration: f64, from: Boundary, to: Boundary) -> Self {
        if duration < MIN_DURATION {
            return Self::constant(start, to.p);
        }
        let t2 = duration * duration;
        let (v0, v1) = (from.v * duration, to.v * duration);
        let (a0, a1) = (from.a * t2, to.a * t2);
        let dp = to.p - from.p;
        Self {
            start,
            duration,
            coeffs: [
                from.p,
                v0,
                0.5 * a0,
                10.0 * dp - 6.0 * v0 - 4.0 * v1 - 0.5 * (3.0 * a0 - a1),
                -15.0 * dp + 8.0 * v0 + 7.0 * v1 + 0.5 * (3.0 * a0 - 2.0 * a1),
                6.0 * dp - 3.0 * v0 - 3.0 * v1 - 0.5 * (a0 - a1),
            ],
        }
    }

    fn constant(start: f64, p: f64) -> Self {
        Self {
            start,
            duration: 0.0,
            coeffs: [p, 0.0, 0.0, 0.0, 0.0, 0.0],
        }
    }

    /// Build a cubic or quintic segment by degree.
    fn with_degree(degree: usize, start: f64, duration: f64, from: Boundary, to: Boundary) -> Self {
        if degree == 3 {
            Self::cubic(start, duration, from, to)
        } else {
            Self::quintic(start, duration, from, to)
        }
    }

    /// Position, velocity and acceleration at `t`, clamped to the segment.
    pub fn evaluate(&self, t: f64) -> Boundary {
        if self.duration < MIN_DURATION {
            return Boundary::at_rest(self.coeffs[0]);
        }
        let s = ((t - self.start) / self.duration).clamp(0.0, 1.0);
        let c = &self.coeffs;
        let p = c[0] + s * (c[1] + s * (c[2] + s * (c[3] + s * (c[4] + s * c[5]))));
        let dp = c[1] + s * (2.0 * c[2] + s * (3.0 * c[3] + s * (4.0 * c[4] + s * 5.0 * c[5])));
        let ddp = 2.0 * c[2] + s * (6.0 * c[3] + s * (12.0 * c[4] + s * 20.0 * c[5]));
        Boundary {
            p,
            v: dp / self.duration,
            a: ddp / (self.duration * self.duration),
        }
    }
}

// ---------------------------------------------------------------------------
// PolynomialTrajectory
// ---------------------------------------------------------------------------

/// Per-axis polynomial swing trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialTrajectory {
    degree: usize,
    initial_time: f64,
    duration: f64,
    /// Liftoff height, kept for the apex rule when re-targeting.
    initial_z: f64,
    penetration: f64,
    x: PolySegment,
    y: PolySegment,
    z_up: PolySegment,
    z_down: PolySegment,
}

impl PolynomialTrajectory {
    fn new(degree: usize) -> Self {
        let idle = PolySegment::constant(0.0, 0.0);
        Self {
            degree,
            initial_time: 0.0,
            duration: 0.0,
            initial_z: 0.0,
            penetration: 0.0,
            x: idle,
            y: idle,
            z_up: idle,
            z_down: idle,
        }
    }

    fn apex_time(&self) -> f64 {
        self.initial_time + 0.5 * self.duration
    }

    fn set_parameters(
        &mut self,
        initial_time: f64,
        initial_pos: &Vector3<f64>,
        target_pos: &Vector3<f64>,
        step: &StepParameters,
    ) {
        self.initial_time = initial_time;
        self.duration = step.duration.max(0.0);
        self.initial_z = initial_pos.z;
        self.penetration = step.penetration;

        let d = self.degree;
        let (t0, dur, half) = (initial_time, self.duration, 0.5 * self.duration);
        let apex = initial_pos.z.max(target_pos.z) + step.height;
        let touchdown_z = target_pos.z - step.penetration;

        self.x = PolySegment::with_degree(
            d,
            t0,
            dur,
            Boundary::at_rest(initial_pos.x),
            Boundary::at_rest(target_pos.x),
        );
        self.y = PolySegment::with_degree(
            d,
            t0,
            dur,
            Boundary::at_rest(initial_pos.y),
            Boundary::at_rest(target_pos.y),
        );
        self.z_up = PolySegment::with_degree(
            d,
            t0,
            half,
            Boundary::at_rest(initial_pos.z),
            Boundary::at_rest(apex),
        );
        self.z_down = PolySegment::with_degree(
            d,
            t0 + half,
            dur - half,
            Boundary::at_rest(apex),
            Boundary::at_rest(touchdown_z),
        );
    }

    fn evaluate(&self, t: f64) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        let x = self.x.evaluate(t);
        let y = self.y.evaluate(t);
        let z = if t < self.z_down.start {
            self.z_up.evaluate(t)
        } else {
            self.z_down.evaluate(t)
        };
        (
            Vector3::new(x.p, y.p, z.p),
            Vector3::new(x.v, y.v, z.v),
            Vector3::new(x.a, y.a, z.a),
        )
    }

    /// Rebuild from the state at `current_time` towards a new target,
    /// keeping apex and touchdown times.
    fn update_spline(&mut self, current_time: f64, target_pos: &Vector3<f64>, height: f64) {
        let (p, v, a) = self.evaluate(current_time);
        let d = self.degree;
        let end = self.initial_time + self.duration;
        let remaining = end - current_time;
        let apex_time = self.apex_time();
        let apex = self.initial_z.max(target_pos.z) + height;
        let touchdown_z = target_pos.z - self.penetration;

        let from = |i: usize| Boundary {
            p: p[i],
            v: v[i],
            a: a[i],
        };
        self.x = PolySegment::with_degree(d, current_time, remaining, from(0), Boundary::at_rest(target_pos.x));
        self.y = PolySegment::with_degree(d, current_time, remaining, from(1), Boundary::at_rest(target_pos.y));

        if current_time < apex_time {
            self.z_up = PolySegment::with_degree(
                d,
                current_time,
                apex_time - current_time,
                from(2),
                Boundary::at_rest(apex),
            );
            self.z_down = PolySegment::with_degree(
                d,
                apex_time,
                end - apex_time,
                Boundary::at_rest(apex),
                Boundary::at_rest(touchdown_z),
            );
        } else {
            self.z_down = PolySegment::with_degree(
                d,
                current_time,
                remaining,
                from(2),
                Boundary::at_rest(touchdown_z),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// BSplineCurve
// ---------------------------------------------------------------------------

/// Clamped B-spline curve in R^3 evaluated with de Boor's algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct BSplineCurve {
    degree: usize,
    knots: Vec<f64>,
    points: Vec<Vector3<f64>>,
}

impl BSplineCurve {
    pub fn new(degree: usize, knots: Vec<f64>, points: Vec<Vector3<f64>>) -> Result<Self, ConfigError> {
        if degree == 0 || points.len() <= degree {
            return Err(ConfigError::UnsupportedSpline(format!(
                "B-spline of degree {degree} with {} control points",
                points.len()
            )));
        }
        if knots.len() != points.len() + degree + 1 {
            return Err(ConfigError::UnsupportedSpline(format!(
                "expected {} knots, got {}",
                points.len() + degree + 1,
                knots.len()
            )));
        }
        Ok(Self {
            degree,
            knots,
            points,
        })
    }

    fn from_info(info: &SplineInfo) -> Result<Self, ConfigError> {
        let points = info.control_points.iter().map(|p| Vector3::from(*p)).collect();
        Self::new(info.degree, info.knots.clone(), points)
    }

    /// First parameter value of the valid domain.
    fn domain_start(&self) -> f64 {
        self.knots[self.degree]
    }

    /// Last parameter value of the valid domain.
    fn domain_end(&self) -> f64 {
        self.knots[self.points.len()]
    }

    fn find_span(&self, u: f64) -> usize {
        let n = self.points.len() - 1;
        if u >= self.knots[n + 1] {
            // Last non-degenerate span.
            let mut k = n;
            while k > self.degree && self.knots[k] >= self.knots[n + 1] {
                k -= 1;
            }
            return k;
        }
        let mut k = self.degree;
        while k < n && u >= self.knots[k + 1] {
            k += 1;
        }
        k
    }

    pub fn evaluate(&self, u: f64) -> Vector3<f64> {
        let u = u.clamp(self.domain_start(), self.domain_end());
        let p = self.degree;
        let k = self.find_span(u);
        let mut d: Vec<Vector3<f64>> = (0..=p).map(|j| self.points[j + k - p]).collect();
        for r in 1..=p {
            for j in (r..=p).rev() {
                let i = j + k - p;
                let denom = self.knots[i + p + 1 - r] - self.knots[i];
                let alpha = if denom.abs() < f64::EPSILON {
                    0.0
                } else {
                    (u - self.knots[i]) / denom
                };
                d[j] = d[j - 1] * (1.0 - alpha) + d[j] * alpha;
            }
        }
        d[p]
    }

    /// Derivative curve, `None` for a piecewise-constant curve.
    pub fn derivative(&self) -> Option<Self> {
        let p = self.degree;
        if p == 0 {
            return None;
        }
        let pf = p as f64;
        let points = self
            .points
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                let denom = self.knots[i + p + 1] - self.knots[i + 1];
                if denom.abs() < f64::EPSILON {
                    Vector3::zeros()
                } else {
                    (w[1] - w[0]) * (pf / denom)
                }
            })
            .collect::<Vec<_>>();
        let knots = self.knots[1..self.knots.len() - 1].to_vec();
        Some(Self {
            degree: p - 1,
            knots,
            points,
        })
    }
}

// ---------------------------------------------------------------------------
// CurveTrajectory
// ---------------------------------------------------------------------------

/// Single B-spline swing curve with a cubic splice correction for re-targets.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveTrajectory {
    curve: BSplineCurve,
    velocity_curve: Option<BSplineCurve>,
    acceleration_curve: Option<BSplineCurve>,
    /// Largest clearance coordinate along the curve.
    clearance_peak: f64,
    initial_time: f64,
    duration: f64,
    initial_pos: Vector3<f64>,
    penetration: f64,
    /// Columns map normalized `[progress, lateral, clearance]` to metres.
    scale: Matrix3<f64>,
    /// Offset blended out between a re-target and touchdown.
    correction: Option<[PolySegment; 3]>,
}

impl CurveTrajectory {
    fn new(info: &SplineInfo) -> Result<Self, ConfigError> {
        let curve = BSplineCurve::from_info(info)?;
        let velocity_curve = curve.derivative();
        let acceleration_curve = velocity_curve.as_ref().and_then(BSplineCurve::derivative);
        let (lo, hi) = (curve.domain_start(), curve.domain_end());
        let clearance_peak = (0..=PEAK_SEARCH_SAMPLES)
            .map(|i| {
                let u = lo + (hi - lo) * i as f64 / PEAK_SEARCH_SAMPLES as f64;
                curve.evaluate(u).z
            })
            .fold(f64::NEG_INFINITY, f64::max);
        Ok(Self {
            curve,
            velocity_curve,
            acceleration_curve,
            clearance_peak,
            initial_time: 0.0,
            duration: 0.0,
            initial_pos: Vector3::zeros(),
            penetration: 0.0,
            scale: Matrix3::zeros(),
            correction: None,
        })
    }

    fn set_parameters(
        &mut self,
        initial_time: f64,
        initial_pos: &Vector3<f64>,
        target_pos: &Vector3<f64>,
        step: &StepParameters,
    ) {
        self.initial_time = initial_time;
        self.duration = step.duration.max(0.0);
        self.initial_pos = *initial_pos;
        self.penetration = step.penetration;
        self.correction = None;
        self.rescale(target_pos, step.height);
    }

    fn rescale(&mut self, target_pos: &Vector3<f64>, height: f64) {
        let touchdown = Vector3::new(target_pos.x, target_pos.y, target_pos.z - self.penetration);
        let stride = touchdown - self.initial_pos;
        let horizontal = Vector3::new(stride.x, stride.y, 0.0);
        let lateral = if horizontal.norm() > 1e-9 {
            Vector3::z().cross(&horizontal.normalize())
        } else {
            Vector3::y()
        };
        let clearance = if self.clearance_peak > f64::EPSILON {
            height / self.clearance_peak
        } else {
            0.0
        };
        self.scale = Matrix3::from_columns(&[stride, lateral, Vector3::z() * clearance]);
    }

    fn normalized_progress(&self, t: f64) -> f64 {
        let (lo, hi) = (self.curve.domain_start(), self.curve.domain_end());
        if self.duration < MIN_DURATION {
            return hi;
        }
        let s = ((t - self.initial_time) / self.duration).clamp(0.0, 1.0);
        lo + s * (hi - lo)
    }

    fn nominal(&self, t: f64) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        let u = self.normalized_progress(t);
        let span = self.curve.domain_end() - self.curve.domain_start();
        let du_dt = if self.duration < MIN_DURATION {
            0.0
        } else {
            span / self.duration
        };
        let position = self.initial_pos + self.scale * self.curve.evaluate(u);
        let velocity = self
            .velocity_curve
            .as_ref()
            .map_or_else(Vector3::zeros, |c| self.scale * c.evaluate(u) * du_dt);
        let acceleration = self
            .acceleration_curve
            .as_ref()
            .map_or_else(Vector3::zeros, |c| self.scale * c.evaluate(u) * du_dt * du_dt);
        (position, velocity, acceleration)
    }

    fn evaluate(&self, t: f64) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        let (mut p, mut v, mut a) = self.nominal(t);
        if let Some(correction) = &self.correction {
            for (i, seg) in correction.iter().enumerate() {
                let c = seg.evaluate(t);
                p[i] += c.p;
                v[i] += c.v;
                a[i] += c.a;
            }
        }
        (p, v, a)
    }

    fn update_spline(&mut self, current_time: f64, target_pos: &Vector3<f64>, height: f64) {
        let (p_old, v_old, _) = self.evaluate(current_time);
        self.rescale(target_pos, height);
        let (p_new, v_new, _) = self.nominal(current_time);
        let remaining = self.initial_time + self.duration - current_time;
        let offset = |i: usize| {
            PolySegment::cubic(
                current_time,
                remaining,
                Boundary {
                    p: p_old[i] - p_new[i],
                    v: v_old[i] - v_new[i],
                    a: 0.0,
                },
                Boundary::at_rest(0.0),
            )
        };
        self.correction = Some([offset(0), offset(1), offset(2)]);
    }
}

// ---------------------------------------------------------------------------
// SwingTrajectoryGenerator
// ---------------------------------------------------------------------------

/// Swing trajectory generator, one variant per interpolation family.
#[derive(Debug, Clone, PartialEq)]
pub enum SwingTrajectoryGenerator {
    Polynomial(PolynomialTrajectory),
    Curve(CurveTrajectory),
}

impl SwingTrajectoryGenerator {
    pub fn new(info: &SplineInfo) -> Result<Self, ConfigError> {
        match info.kind {
            SplineKind::Polynomial if matches!(info.degree, 3 | 5) => {
                Ok(Self::Polynomial(PolynomialTrajectory::new(info.degree)))
            }
            SplineKind::Polynomial => Err(ConfigError::UnsupportedSpline(format!(
                "polynomial degree {}",
                info.degree
            ))),
            SplineKind::BSpline => Ok(Self::Curve(CurveTrajectory::new(info)?)),
        }
    }

    pub fn initial_time(&self) -> f64 {
        match self {
            Self::Polynomial(p) => p.initial_time,
            Self::Curve(c) => c.initial_time,
        }
    }

    pub fn duration(&self) -> f64 {
        match self {
            Self::Polynomial(p) => p.duration,
            Self::Curve(c) => c.duration,
        }
    }

    pub fn set_parameters(
        &mut self,
        initial_time: f64,
        initial_pos: &Vector3<f64>,
        target_pos: &Vector3<f64>,
        step: &StepParameters,
    ) {
        match self {
            Self::Polynomial(p) => p.set_parameters(initial_time, initial_pos, target_pos, step),
            Self::Curve(c) => c.set_parameters(initial_time, initial_pos, target_pos, step),
        }
    }

    /// Sample at absolute time `t`.
    pub fn generate_trajectory(&self, t: f64) -> TrajectorySample {
        let start = self.initial_time();
        let end = start + self.duration();
        let ok = (start..=end).contains(&t);
        let t = t.clamp(start, end);
        let (position, velocity, acceleration) = match self {
            Self::Polynomial(p) => p.evaluate(t),
            Self::Curve(c) => c.evaluate(t),
        };
        TrajectorySample {
            position,
            velocity,
            acceleration,
            ok,
        }
    }

    /// Re-target in flight, splicing at `current_time` and keeping the
    /// touchdown time. Returns false and leaves the trajectory untouched when
    /// `current_time` is not inside `[initial_time, touchdown)`.
    pub fn update_spline(&mut self, current_time: f64, target_pos: &Vector3<f64>, height: f64) -> bool {
        let start = self.initial_time();
        let end = start + self.duration();
        if !(start..end).contains(&current_time) || end - current_time < MIN_DURATION {
            return false;
        }
        match self {
            Self::Polynomial(p) => p.update_spline(current_time, target_pos, height),
            Self::Curve(c) => c.update_spline(current_time, target_pos, height),
        }
        true
    }
}
