use crate::{data::Histogram, expr::Program, registry::ParamSpec};
use miette::*;
use rmpfit::{MPError, MPFitter, MPPar, MPResult};
use serde::*;
use std::cell::RefCell;

/// Something a model can be fitted to and drawn from.
pub trait Observable {
    /// Fit `program` to the observable, starting from `params`.
    fn fit(&self, program: &Program, params: &[ParamSpec], opts: &FitOptions) -> Result<Fit>;

    /// The observable's points, restricted to `range` if given.
    fn draw(&self, range: Option<(f64, f64)>) -> Graph;
}

/// A labelled sequence of `(x, y)` points.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

/// Options controlling a fit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FitOptions {
    /// Only points with `xmin <= x <= xmax` are used.
    pub range: Option<(f64, f64)>,
    /// Suppress warning reports.
    pub quiet: bool,
    /// Ignore point errors, weighting every point equally.
    pub unit_weights: bool,
    /// Run the minimizer a second time from the converged point.
    pub improve: bool,
}

impl FitOptions {
    /// Parse an option string such as `"RQ"`.
    ///
    /// `R` restricts the fit to `[xmin, xmax]`, which must then both be given.
    pub fn parse(opts: &str, xmin: Option<f64>, xmax: Option<f64>) -> Result<Self> {
        let mut o = FitOptions::default();
        let mut use_range = false;

        for c in opts.chars().filter(|c| !c.is_whitespace()) {
            match c.to_ascii_uppercase() {
                'R' => use_range = true,
                'Q' => o.quiet = true,
                'W' => o.unit_weights = true,
                'M' => o.improve = true,
                _ => bail!("unknown fit option '{}' in '{}'", c, opts),
            }
        }

        o.range = match (xmin, xmax) {
            (Some(lo), Some(hi)) if use_range => {
                ensure!(lo < hi, "fit range [{lo}, {hi}] is empty");
                Some((lo, hi))
            }
            (Some(_), Some(_)) => None,
            (None, None) if use_range => bail!("option R requires a fit range"),
            (None, None) => None,
            _ => bail!("both xmin and xmax must be specified"),
        };

        Ok(o)
    }

    fn contains(&self, x: f64) -> bool {
        self.range.map_or(true, |(lo, hi)| (lo..=hi).contains(&x))
    }
}

/// The result of a fit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fit {
    /// The names of the parameters.
    pub parameter_names: Vec<String>,
    /// The fitted values of the parameters, in registration order.
    pub parameter_values: Vec<f64>,

    /// The standard error of each parameter. Zero for fixed parameters.
    pub xerrs: Vec<f64>,

    /// Whether each parameter was held fixed, either by `lower > upper` or by equal bounds.
    pub fixed: Vec<bool>,

    /// Number of points used.
    pub n: u64,

    /// Sum of squared weighted residuals.
    pub chi2: f64,

    /// Degrees of freedom: points minus free parameters.
    pub ndf: i64,
}

impl Fit {
    /// Reduced chi squared, `NaN` without degrees of freedom.
    pub fn chi2_ndf(&self) -> f64 {
        if self.ndf > 0 {
            self.chi2 / self.ndf as f64
        } else {
            f64::NAN
        }
    }
}

struct Fitter<'a> {
    program: &'a Program,
    /// Full parameter vector; fixed entries are never overwritten.
    base: Vec<f64>,
    /// Indices of free parameters in `base`.
    free: Vec<usize>,
    /// `(x, y, err)`
    points: Vec<(f64, f64, f64)>,
    /// Reused full vector for minimizer callbacks. Only `free` indices are written.
    scratch: RefCell<Vec<f64>>,
}

impl<'a> Fitter<'a> {
    fn new(
        program: &'a Program,
        base: Vec<f64>,
        free: Vec<usize>,
        points: Vec<(f64, f64, f64)>,
    ) -> Self {
        Self {
            program,
            scratch: RefCell::new(base.clone()),
            base,
            free,
            points,
        }
    }

    fn expand(&self, free: &[f64]) -> Vec<f64> {
        let mut full = self.base.clone();
        for (i, v) in self.free.iter().zip(free) {
            full[*i] = *v;
        }
        full
    }

    fn chi2(&self, full: &[f64]) -> Result<f64> {
        let mut sum = 0.;
        for (x, y, e) in &self.points {
            let f = self
                .program
                .evaluate(full, *x)
                .map_err(crate::Error::from)?;
            sum += ((y - f) / e).powi(2);
        }
        Ok(sum)
    }
}

impl MPFitter for Fitter<'_> {
    fn number_of_points(&self) -> usize {
        self.points.len()
    }

    fn eval(&self, params: &[f64], deviates: &mut [f64]) -> MPResult<()> {
        let mut full = self.scratch.borrow_mut();
        for (i, v) in self.free.iter().zip(params) {
            full[*i] = *v;
        }

        for (d, (x, y, e)) in deviates.iter_mut().zip(&self.points) {
            let f = self
                .program
                .evaluate(&full, *x)
                .map_err(|_| MPError::Eval)?;

            if f.is_finite() {
                *d = (y - f) / e;
            } else {
                *d = 1e13; // very large deviation
            }
        }

        Ok(())
    }
}

/// Fit a program to `(x, y, err)` points.
///
/// Only free parameters are handed to the minimizer. Fixed parameters (`lower > upper`) and
/// pinned ones (`lower == upper`) keep their initial value on every evaluation.
pub fn fit_points<I>(
    program: &Program,
    params: &[ParamSpec],
    points: I,
    opts: &FitOptions,
) -> Result<Fit>
where
    I: IntoIterator<Item = (f64, f64, f64)>,
{
    ensure!(
        params.len() == program.params_len(),
        "program needs {} parameters but {} were specified",
        program.params_len(),
        params.len()
    );
    program.verify().map_err(crate::Error::from)?;

    let points: Vec<_> = points
        .into_iter()
        .filter(|(x, _, _)| opts.contains(*x))
        .map(|(x, y, e)| {
            let e = if opts.unit_weights || !(e > 0.) { 1. } else { e };
            (x, y, e)
        })
        .collect();

    ensure!(!points.is_empty(), "no points to fit inside the fit range");

    let base: Vec<f64> = params.iter().map(|p| p.initial).collect();
    let free: Vec<usize> = params
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.is_free().then_some(i))
        .collect();
    let limits: Vec<MPPar> = free
        .iter()
        .map(|i| MPPar {
            limited_low: true,
            limited_up: true,
            limit_low: params[*i].lower,
            limit_up: params[*i].upper,
            ..Default::default()
        })
        .collect();

    let fitter = Fitter::new(program, base, free, points);

    let mut x: Vec<f64> = fitter.free.iter().map(|i| fitter.base[*i]).collect();
    let mut xerror = vec![0.; x.len()];

    if !x.is_empty() {
        let runs = if opts.improve { 2 } else { 1 };
        for _ in 0..runs {
            let status = fitter
                .mpfit(&mut x, Some(limits.as_slice()), &Default::default())
                .map_err(|e| miette!("{}", e))
                .wrap_err("failed to fit the model to the input data")?;
            xerror = status.xerror;
        }
    }

    let values = fitter.expand(&x);
    let chi2 = fitter.chi2(&values)?;

    let mut xerrs = vec![0.; params.len()];
    for (i, e) in fitter.free.iter().zip(xerror) {
        xerrs[*i] = e;
    }

    Ok(Fit {
        parameter_names: params.iter().map(|p| p.name.clone()).collect(),
        parameter_values: values,
        xerrs,
        fixed: params.iter().map(|p| !p.is_free()).collect(),
        n: fitter.points.len() as u64,
        chi2,
        ndf: fitter.points.len() as i64 - fitter.free.len() as i64,
    })
}

impl Observable for Histogram {
    fn fit(&self, program: &Program, params: &[ParamSpec], opts: &FitOptions) -> Result<Fit> {
        fit_points(program, params, self.bins(), opts)
    }

    fn draw(&self, range: Option<(f64, f64)>) -> Graph {
        Graph {
            label: "data".to_string(),
            points: self
                .bins()
                .filter(|(x, _, _)| range.map_or(true, |(lo, hi)| (lo..=hi).contains(x)))
                .map(|(x, y, _)| (x, y))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        basis::Basis,
        expr::{compile, tokenize, Layout},
        registry::Registry,
    };
    use approx::assert_abs_diff_eq;

    #[test]
    fn parse_options() {
        let o = FitOptions::parse("rq", Some(0.), Some(1.)).unwrap();
        assert_eq!(o.range, Some((0., 1.)));
        assert!(o.quiet && !o.unit_weights && !o.improve);

        let o = FitOptions::parse("MW", Some(0.), Some(1.)).unwrap();
        assert_eq!(o.range, None);
        assert!(o.improve && o.unit_weights);

        assert!(FitOptions::parse("", None, None).unwrap() == FitOptions::default());
    }

    #[test]
    fn parse_options_errors() {
        let e = FitOptions::parse("R+", Some(0.), Some(1.)).unwrap_err();
        assert_eq!(e.to_string(), "unknown fit option '+' in 'R+'");
        let e = FitOptions::parse("R", Some(0.), None).unwrap_err();
        assert_eq!(e.to_string(), "both xmin and xmax must be specified");
        assert!(FitOptions::parse("R", None, None).is_err());
        assert!(FitOptions::parse("R", Some(1.), Some(0.)).is_err());
    }

    #[test]
    fn unused_range_is_not_validated() {
        let o = FitOptions::parse("Q", Some(1.), Some(0.)).unwrap();
        assert_eq!(o.range, None);
        assert!(o.quiet);
        assert_eq!(FitOptions::parse("", Some(2.), Some(2.)).unwrap().range, None);
    }

    fn line_registry(slope_fixed: bool) -> Registry {
        let mut reg = Registry::new();
        let slope = if slope_fixed {
            ParamSpec::fixed("bg.slope", 2.)
        } else {
            ParamSpec::new("bg.slope", 1., -10., 10.)
        };
        reg.register(
            "bg",
            Basis::Polynomial(1),
            vec![ParamSpec::new("bg.c", 0., -10., 10.), slope],
        )
        .unwrap();
        reg
    }

    fn line_points() -> Vec<(f64, f64, f64)> {
        (0..20)
            .map(|i| i as f64 * 0.1)
            .enumerate()
            .map(|(i, x)| (x, 1.5 + 2. * x + 0.01 * (7. * i as f64).sin(), 0.1))
            .collect()
    }

    #[test]
    fn fits_a_line() {
        let reg = line_registry(false);
        let p = compile(&tokenize("bg"), &reg, Layout::Global).unwrap();
        let fit = fit_points(&p, reg.params(), line_points(), &Default::default()).unwrap();

        assert_eq!(fit.n, 20);
        assert_eq!(fit.ndf, 18);
        assert_abs_diff_eq!(fit.parameter_values[0], 1.5, epsilon = 0.02);
        assert_abs_diff_eq!(fit.parameter_values[1], 2., epsilon = 0.02);
        assert!(fit.chi2 < 0.2, "{}", fit.chi2);
    }

    #[test]
    fn fixed_parameter_never_moves() {
        let reg = line_registry(true);
        let p = compile(&tokenize("bg"), &reg, Layout::Global).unwrap();

        let mut points = line_points();
        // pull towards a steeper slope the fixed parameter cannot follow
        for (x, y, _) in points.iter_mut() {
            *y += *x;
        }

        let fitter = Fitter::new(&p, reg.initial_values(), vec![0], points.clone());
        let mut deviates = vec![0.; points.len()];
        for trial in [-3., 0., 4.5, 100.] {
            let full = fitter.expand(&[trial]);
            assert_eq!(full, vec![trial, 2.]);

            fitter.eval(&[trial], &mut deviates).ok().unwrap();
            assert_eq!(*fitter.scratch.borrow(), vec![trial, 2.]);
            let (x, y, e) = points[3];
            assert_eq!(deviates[3], (y - (trial + 2. * x)) / e);
        }

        let fit = fit_points(&p, reg.params(), points, &Default::default()).unwrap();
        assert_eq!(fit.parameter_values[1], 2.);
        assert_eq!(fit.xerrs[1], 0.);
        assert_eq!(fit.fixed, vec![false, true]);
        assert_eq!(fit.ndf, 19);
    }

    #[test]
    fn equal_bounds_are_pinned() {
        let mut reg = Registry::new();
        reg.register(
            "bg",
            Basis::Polynomial(1),
            vec![ParamSpec::new("c", 1., 1., 1.), ParamSpec::new("slope", 1., -10., 10.)],
        )
        .unwrap();
        let p = compile(&tokenize("bg"), &reg, Layout::Global).unwrap();

        let fit = fit_points(&p, reg.params(), line_points(), &Default::default()).unwrap();
        assert_eq!(fit.parameter_values[0], 1.);
        assert_eq!(fit.xerrs[0], 0.);
        assert_eq!(fit.fixed, vec![true, false]);
        assert_eq!(fit.ndf, 19);
        // slope absorbs the offset mismatch: 1.5 + 2x against 1 + sx
        assert!(fit.parameter_values[1] > 2., "{}", fit.parameter_values[1]);
    }

    #[test]
    fn range_restricts_points() {
        let reg = line_registry(false);
        let p = compile(&tokenize("bg"), &reg, Layout::Global).unwrap();
        let opts = FitOptions::parse("R", Some(0.45), Some(1.05)).unwrap();
        let fit = fit_points(&p, reg.params(), line_points(), &opts).unwrap();
        assert_eq!(fit.n, 6);

        let opts = FitOptions::parse("R", Some(10.), Some(11.)).unwrap();
        assert!(fit_points(&p, reg.params(), line_points(), &opts).is_err());
    }

    #[test]
    fn all_fixed_skips_minimizer() {
        let mut reg = Registry::new();
        reg.register("c", Basis::Polynomial(0), vec![ParamSpec::fixed("c", 1.)])
            .unwrap();
        let p = compile(&tokenize("c"), &reg, Layout::Global).unwrap();
        let fit = fit_points(&p, reg.params(), [(0., 2., 1.), (1., 3., 1.)], &Default::default())
            .unwrap();
        assert_eq!(fit.parameter_values, vec![1.]);
        assert_abs_diff_eq!(fit.chi2, 5.);
    }

    #[test]
    fn malformed_program_fails_before_minimizer() {
        let reg = line_registry(false);
        let p = compile(&tokenize("bg +"), &reg, Layout::Global).unwrap();
        let e = fit_points(&p, reg.params(), line_points(), &Default::default()).unwrap_err();
        assert!(e.to_string().contains("fewer than two operands"), "{e}");
    }

    #[test]
    fn histogram_draw_range() {
        let h = Histogram::new(vec![0., 1., 2.], vec![3., 4., 5.], vec![1.; 3]).unwrap();
        let g = h.draw(Some((0.5, 2.)));
        assert_eq!(g.points, vec![(1., 4.), (2., 5.)]);
    }
}
