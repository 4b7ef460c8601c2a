//! The catalog of basis functions a term can be built from.
//!
//! Every basis is a pure function `f(x, p)` of the abscissa and the term's own parameter
//! slice. The slice is guaranteed by the evaluator to have exactly [`Basis::arity`] values.

use crate::data::Histogram;
use crate::error::Error;
use num_complex::Complex64;
use std::{f64::consts::PI, fmt, str::FromStr, sync::Arc};

/// Highest supported polynomial degree (`pol9`).
pub const MAX_POLY_DEGREE: usize = 9;

/// ħc in GeV fm, converts k* in GeV/c to fm⁻¹.
const HBARC: f64 = 0.197_326_980;

/// A basis function kind.
#[derive(Clone, Debug)]
pub enum Basis {
    /// `p0 + p1*x + ... + pn*x^n`.
    Polynomial(usize),
    /// Normalised Gaussian, parameters `[norm, mean, sigma]`.
    Gaussian,
    /// Lednicky–Lyuboshitz correlation function with two source radii.
    ///
    /// Parameters `[re_f0, im_f0, d0, r1, r2, w, norm]`.
    Lednicky,
    /// A sampled curve scaled by a normalisation parameter.
    Template(Template),
    /// An external continuous function scaled by a normalisation parameter.
    Curve(Curve),
}

impl Basis {
    /// The number of parameters the basis consumes.
    pub fn arity(&self) -> usize {
        match self {
            Basis::Polynomial(deg) => deg + 1,
            Basis::Gaussian => 3,
            Basis::Lednicky => 7,
            Basis::Template(_) | Basis::Curve(_) => 1,
        }
    }

    /// Evaluate the basis at `x`. `p` must hold exactly [`Basis::arity`] values.
    pub fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
        debug_assert_eq!(p.len(), self.arity());
        match self {
            Basis::Polynomial(_) => polynomial(x, p),
            Basis::Gaussian => gaussian(x, p[0], p[1], p[2]),
            Basis::Lednicky => lednicky(x, p),
            Basis::Template(t) => p[0] * t.hist.interpolate(x),
            Basis::Curve(c) => p[0] * (c.f)(x * c.scale),
        }
    }
}

impl FromStr for Basis {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let unknown = || Error::UnknownBasis { kind: s.to_string() };
        match s {
            "gaus" => Ok(Basis::Gaussian),
            "lednicky" => Ok(Basis::Lednicky),
            _ => {
                let deg = s
                    .strip_prefix("pol")
                    .and_then(|d| d.parse::<usize>().ok())
                    .ok_or_else(unknown)?;
                if deg > MAX_POLY_DEGREE || s.len() != 4 {
                    return Err(unknown());
                }
                Ok(Basis::Polynomial(deg))
            }
        }
    }
}

impl fmt::Display for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Basis::Polynomial(d) => write!(f, "pol{d}"),
            Basis::Gaussian => write!(f, "gaus"),
            Basis::Lednicky => write!(f, "lednicky"),
            Basis::Template(_) => write!(f, "template"),
            Basis::Curve(_) => write!(f, "curve"),
        }
    }
}

/// Histogram template adapter.
#[derive(Clone, Debug)]
pub struct Template {
    hist: Arc<Histogram>,
}

impl Template {
    pub fn new(hist: Histogram) -> Self {
        Self {
            hist: Arc::new(hist),
        }
    }
}

/// External curve adapter.
///
/// Evaluates `f(x * scale)`.
#[derive(Clone)]
pub struct Curve {
    f: Arc<dyn Fn(f64) -> f64 + Send + Sync>,
    scale: f64,
}

impl Curve {
    pub fn new<F>(f: F, scale: f64) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            scale,
        }
    }
}

impl fmt::Debug for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Curve").field("scale", &self.scale).finish()
    }
}

fn polynomial(x: f64, p: &[f64]) -> f64 {
    p.iter().rev().fold(0., |acc, c| acc * x + c)
}

fn gaussian(x: f64, norm: f64, mean: f64, sigma: f64) -> f64 {
    let z = (x - mean) / sigma;
    norm / ((2. * PI).sqrt() * sigma) * (-0.5 * z * z).exp()
}

fn lednicky(x: f64, p: &[f64]) -> f64 {
    let f0 = Complex64::new(p[0], p[1]);
    let (d0, r1, r2, w, norm) = (p[2], p[3], p[4], p[5], p[6]);
    let k = x / HBARC;
    norm * (w * lednicky_single(k, f0, d0, r1) + (1. - w) * lednicky_single(k, f0, d0, r2))
}

/// Single-radius Lednicky–Lyuboshitz correlation, `k` in fm⁻¹.
fn lednicky_single(k: f64, f0: Complex64, d0: f64, r: f64) -> f64 {
    let inv = f0.inv() + Complex64::new(0.5 * d0 * k * k, -k);
    let f = inv.inv();
    let z = 2. * k * r;
    let sqrt_pi = PI.sqrt();

    1. + 0.5 * f.norm_sqr() / (r * r) * (1. - d0 / (2. * sqrt_pi * r))
        + 2. * f.re / (sqrt_pi * r) * f1(z)
        - f.im / r * f2(z)
}

fn f1(z: f64) -> f64 {
    if z.abs() < 1e-8 {
        1.
    } else {
        dawson(z) / z
    }
}

fn f2(z: f64) -> f64 {
    if z.abs() < 1e-8 {
        0.
    } else {
        (1. - (-z * z).exp()) / z
    }
}

/// Dawson's integral `exp(-x²) ∫₀ˣ exp(t²) dt` (Rybicki's method, ~2e-7 accuracy).
pub(crate) fn dawson(x: f64) -> f64 {
    const H: f64 = 0.4;
    const NMAX: usize = 6;
    const A1: f64 = 2. / 3.;
    const A2: f64 = 0.4;
    const A3: f64 = 2. / 7.;

    if x.abs() < 0.2 {
        let x2 = x * x;
        return x * (1. - A1 * x2 * (1. - A2 * x2 * (1. - A3 * x2)));
    }

    let xx = x.abs();
    let n0 = 2. * (0.5 * xx / H).round();
    let xp = xx - n0 * H;
    let mut e1 = (2. * xp * H).exp();
    let e2 = e1 * e1;
    let mut d1 = n0 + 1.;
    let mut d2 = d1 - 2.;
    let mut sum = 0.;
    for i in 0..NMAX {
        let c = (-((2. * i as f64 + 1.) * H).powi(2)).exp();
        sum += c * (e1 / d1 + 1. / (d2 * e1));
        d1 += 2.;
        d2 -= 2.;
        e1 *= e2;
    }

    (1. / PI.sqrt()) * x.signum() * (-xp * xp).exp() * sum
}
