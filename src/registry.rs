//! Named terms and the flat parameter layout they define.
//!
//! Terms are appended in registration order, and that order alone fixes the offset of each
//! term's slice in the flat parameter vector: the `k`-th term starts at the sum of the
//! arities of terms `0..k`.

use crate::{
    basis::Basis,
    error::{Error, ParameterOutOfRangeWarning},
    expr::is_identifier,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One scalar parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "init")]
    pub initial: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, initial: f64, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            initial,
            lower,
            upper,
        }
    }

    /// A parameter held at `value` for the whole fit.
    pub fn fixed(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value, 1., -1.)
    }

    /// A parameter is fixed when `lower > upper`.
    pub fn is_fixed(&self) -> bool {
        self.lower > self.upper
    }

    /// Whether a minimizer may move this parameter. Bounds with `lower == upper` pin it
    /// just like a fixed parameter.
    pub fn is_free(&self) -> bool {
        self.lower < self.upper
    }
}

/// A registered term.
#[derive(Debug)]
pub struct Term {
    name: String,
    basis: Basis,
    offset: usize,
}

impl Term {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn basis(&self) -> &Basis {
        &self.basis
    }

    pub fn arity(&self) -> usize {
        self.basis.arity()
    }

    /// Offset of this term's slice in the global parameter vector.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
        self.basis.evaluate(x, p)
    }
}

/// Ordered, append-only table of terms.
#[derive(Debug, Default)]
pub struct Registry {
    terms: Vec<Arc<Term>>,
    params: Vec<ParamSpec>,
    warnings: Vec<ParameterOutOfRangeWarning>,
    frozen: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a term and its parameters.
    ///
    /// Bounded parameters with an initial value outside `[lower, upper]` are moved to the
    /// range midpoint and a warning is recorded.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        basis: Basis,
        params: Vec<ParamSpec>,
    ) -> Result<(), Error> {
        let name = name.into();

        if self.frozen {
            return Err(Error::RegistryFrozen { name });
        }
        if !is_identifier(&name) {
            return Err(Error::InvalidTermName { name });
        }
        if self.get(&name).is_some() {
            return Err(Error::DuplicateTerm { name });
        }
        if params.len() != basis.arity() {
            return Err(Error::ArityMismatch {
                name,
                expected: basis.arity(),
                found: params.len(),
            });
        }

        let offset = self.params.len();
        for mut p in params {
            if !p.is_fixed() && !(p.lower..=p.upper).contains(&p.initial) {
                let clamped = 0.5 * (p.lower + p.upper);
                self.warnings.push(ParameterOutOfRangeWarning {
                    term: name.clone(),
                    param: p.name.clone(),
                    initial: p.initial,
                    lower: p.lower,
                    upper: p.upper,
                    clamped,
                });
                p.initial = clamped;
            }
            self.params.push(p);
        }

        self.terms.push(Arc::new(Term {
            name,
            basis,
            offset,
        }));

        Ok(())
    }

    /// Find a term by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Term>> {
        self.terms.iter().find(|t| t.name == name)
    }

    pub fn terms(&self) -> &[Arc<Term>] {
        &self.terms
    }

    /// Flat parameter specs, in registration order.
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Total length of the flat parameter vector.
    pub fn params_len(&self) -> usize {
        self.params.len()
    }

    /// Parameter names qualified by their term, `term.param`.
    pub fn qualified_names(&self) -> Vec<String> {
        self.terms
            .iter()
            .flat_map(|t| {
                self.params[t.offset..t.offset + t.arity()]
                    .iter()
                    .map(move |p| format!("{}.{}", t.name, p.name))
            })
            .collect()
    }

    /// Initial values of all parameters.
    pub fn initial_values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.initial).collect()
    }

    /// Warnings recorded during registration.
    pub fn warnings(&self) -> &[ParameterOutOfRangeWarning] {
        &self.warnings
    }

    /// Reject any further registration.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Borrow a term's slice out of a global parameter vector.
    pub fn slice<'a>(&self, term: &Term, params: &'a [f64]) -> Option<&'a [f64]> {
        params.get(term.offset..term.offset + term.arity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn specs(n: usize) -> Vec<ParamSpec> {
        (0..n).map(|i| ParamSpec::new(format!("p{i}"), 0., -1., 1.)).collect()
    }

    #[test]
    fn offsets_follow_registration_order() {
        let kinds = ["pol0", "pol3", "gaus", "lednicky", "pol9", "pol1", "gaus"];

        for _ in 0..50 {
            let mut order: Vec<usize> = (0..kinds.len()).collect();
            fastrand::shuffle(&mut order);

            let mut reg = Registry::new();
            for i in &order {
                let basis = Basis::from_str(kinds[*i]).unwrap();
                let n = basis.arity();
                reg.register(format!("t{i}"), basis, specs(n)).unwrap();
            }

            let mut expected = 0;
            for t in reg.terms() {
                assert_eq!(t.offset(), expected, "term {}", t.name());
                expected += t.arity();
            }
            assert_eq!(reg.params_len(), expected);
        }
    }

    #[test]
    fn duplicate_name() {
        let mut reg = Registry::new();
        reg.register("bg", Basis::Polynomial(0), specs(1)).unwrap();
        let e = reg.register("bg", Basis::Gaussian, specs(3)).unwrap_err();
        assert!(matches!(e, Error::DuplicateTerm { name } if name == "bg"));
        assert_eq!(reg.terms().len(), 1);
        assert_eq!(reg.params_len(), 1);
    }

    #[test]
    fn names_must_be_identifiers() {
        let mut reg = Registry::new();
        for name in ["1x", "a b", "bg+", "", "x.y"] {
            let e = reg.register(name, Basis::Polynomial(0), specs(1)).unwrap_err();
            assert!(matches!(e, Error::InvalidTermName { .. }), "{name:?}: {e:?}");
        }
        assert!(reg.terms().is_empty());

        for name in ["bg", "_sig2", "pol0", "Λ"] {
            reg.register(name, Basis::Polynomial(0), specs(1)).unwrap();
        }
        assert_eq!(reg.params_len(), 4);
    }

    #[test]
    fn arity_mismatch() {
        let mut reg = Registry::new();
        let e = reg.register("sig", Basis::Gaussian, specs(2)).unwrap_err();
        assert!(matches!(
            e,
            Error::ArityMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));
        assert!(reg.terms().is_empty());
    }

    #[test]
    fn frozen_registry() {
        let mut reg = Registry::new();
        reg.register("a", Basis::Polynomial(0), specs(1)).unwrap();
        reg.freeze();
        let e = reg.register("b", Basis::Polynomial(0), specs(1)).unwrap_err();
        assert!(matches!(e, Error::RegistryFrozen { name } if name == "b"));
    }

    #[test]
    fn out_of_range_initial_is_clamped() {
        let mut reg = Registry::new();
        reg.register(
            "sig",
            Basis::Gaussian,
            vec![
                ParamSpec::new("norm", 20., 0., 10.),
                ParamSpec::new("mean", 0., -1., 1.),
                ParamSpec::new("sigma", f64::NAN, 1., 3.),
            ],
        )
        .unwrap();

        assert_eq!(reg.initial_values()[..2], [5., 0.]);
        assert_eq!(reg.initial_values()[2], 2.);
        let w = reg.warnings();
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].param, "norm");
        assert_eq!(w[0].clamped, 5.);
        assert_eq!(w[1].param, "sigma");
    }

    #[test]
    fn fixed_params_are_not_clamped() {
        let mut reg = Registry::new();
        reg.register("bg", Basis::Polynomial(0), vec![ParamSpec::fixed("c", 42.)])
            .unwrap();
        assert!(reg.params()[0].is_fixed());
        assert!(!reg.params()[0].is_free());
        assert_eq!(reg.initial_values(), vec![42.]);
        assert!(reg.warnings().is_empty());
    }

    #[test]
    fn equal_bounds_pin_the_parameter() {
        let mut reg = Registry::new();
        reg.register(
            "bg",
            Basis::Polynomial(1),
            vec![ParamSpec::new("c", 1., 1., 1.), ParamSpec::new("s", 4., 2., 2.)],
        )
        .unwrap();

        let p = reg.params();
        assert!(!p[0].is_fixed() && !p[0].is_free());
        assert_eq!(reg.initial_values(), vec![1., 2.]);
        assert_eq!(reg.warnings().len(), 1);
    }

    #[test]
    fn slices() {
        let mut reg = Registry::new();
        reg.register("bg", Basis::Polynomial(0), specs(1)).unwrap();
        reg.register("sig", Basis::Gaussian, specs(3)).unwrap();
        let p = [2., 5., 1., 0.5];
        let sig = reg.get("sig").unwrap();
        assert_eq!(reg.slice(sig, &p), Some(&p[1..4]));
        assert_eq!(reg.slice(sig, &p[..3]), None);
        assert_eq!(
            reg.qualified_names(),
            vec!["bg.p0", "sig.p0", "sig.p1", "sig.p2"]
        );
    }
}
