//! A composite model: registered terms, a compiled formula, and fitted values.

use crate::{
    basis::Basis,
    component::{compile_component, Component},
    error::{Error, ParameterOutOfRangeWarning},
    expr::{compile, tokenize, Layout, Program},
    registry::{ParamSpec, Registry},
    solve::{Fit, FitOptions, Graph, Observable},
};
use serde::{Deserialize, Serialize};

/// A labelled sub-formula drawn after a fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub label: String,
    pub formula: String,
}

impl Recipe {
    pub fn new(label: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            formula: formula.into(),
        }
    }
}

/// Terms can only be added while the model is [`Stage::Building`]; the first compile moves it
/// to [`Stage::Compiled`] for good.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    Building,
    Compiled,
}

/// A model owns its registry. Separate models never share terms.
#[derive(Debug, Default)]
pub struct Model {
    registry: Registry,
    program: Option<Program>,
    fit: Option<Fit>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        if self.registry.is_frozen() {
            Stage::Compiled
        } else {
            Stage::Building
        }
    }

    /// Register a term.
    ///
    /// ```rust
    /// use termfit::{Model, ParamSpec};
    ///
    /// let mut model = Model::new();
    /// model
    ///     .add("bg", "pol0".parse().unwrap(), vec![ParamSpec::fixed("c", 2.)])
    ///     .unwrap();
    /// assert!(model.add("bg", "gaus".parse().unwrap(), vec![]).is_err());
    /// ```
    pub fn add(
        &mut self,
        name: impl Into<String>,
        basis: Basis,
        params: Vec<ParamSpec>,
    ) -> Result<(), Error> {
        self.registry.register(name, basis, params)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn warnings(&self) -> &[ParameterOutOfRangeWarning] {
        self.registry.warnings()
    }

    /// Compile `formula` against the global parameter layout.
    ///
    /// Freezes the registry. Any previous fit is discarded.
    pub fn compile(&mut self, formula: &str) -> Result<&Program, Error> {
        let program = compile(&tokenize(formula), &self.registry, Layout::Global)?;
        self.registry.freeze();
        self.fit = None;
        Ok(self.program.insert(program))
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    /// Evaluate the compiled formula.
    pub fn evaluate(&self, params: &[f64], x: f64) -> Result<f64, Error> {
        let program = self.program.as_ref().ok_or(Error::NotCompiled)?;
        Ok(program.evaluate(params, x)?)
    }

    /// Compile `formula` and fit it to `obs`.
    ///
    /// Parse and structural errors are reported before the minimizer runs.
    pub fn fit<O: Observable + ?Sized>(
        &mut self,
        obs: &O,
        formula: &str,
        opts: &FitOptions,
    ) -> miette::Result<&Fit> {
        self.compile(formula)?;
        let program = self.program.as_ref().ok_or(Error::NotCompiled)?;
        program.verify().map_err(Error::from)?;

        let mut fit = obs.fit(program, self.registry.params(), opts)?;
        fit.parameter_names = self.registry.qualified_names();
        Ok(self.fit.insert(fit))
    }

    /// The last fit result.
    pub fn result(&self) -> Option<&Fit> {
        self.fit.as_ref()
    }

    /// Fitted parameter values.
    pub fn fitted(&self) -> Result<&[f64], Error> {
        self.fit
            .as_ref()
            .map(|f| f.parameter_values.as_slice())
            .ok_or(Error::NotFitted)
    }

    /// A standalone curve for `recipe` at the fitted values.
    pub fn component(&self, recipe: &str) -> Result<Component, Error> {
        compile_component(recipe, &self.registry, self.fitted()?)
    }

    /// Sample each recipe, and the full model, at `xs`.
    ///
    /// The full model comes first, labelled `model`.
    pub fn draw(&self, recipes: &[Recipe], xs: &[f64]) -> Result<Vec<Graph>, Error> {
        let program = self.program.as_ref().ok_or(Error::NotCompiled)?;
        let full = Recipe::new("model", program.formula());

        std::iter::once(&full)
            .chain(recipes)
            .map(|r| -> Result<Graph, Error> {
                let c = self.component(&r.formula)?;
                Ok(Graph {
                    label: r.label.clone(),
                    points: xs.iter().map(|x| (*x, c.eval(*x))).collect(),
                })
            })
            .collect()
    }
}

/// `n` evenly spaced points across `[lo, hi]`.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![0.5 * (lo + hi)],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n).map(|i| lo + step * i as f64).collect()
        }
    }
}
