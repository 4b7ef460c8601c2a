//! Standalone curves for pieces of a fitted model.

use crate::{
    error::Error,
    expr::{compile, tokenize, Layout, Program},
    registry::Registry,
};

/// A sub-formula bound to already fitted parameter values.
#[derive(Debug, Clone)]
pub struct Component {
    program: Program,
    params: Vec<f64>,
}

/// Compile `recipe` against a local parameter layout filled from `fitted`.
///
/// Only the terms the recipe references contribute to the local vector.
pub fn compile_component(
    recipe: &str,
    registry: &Registry,
    fitted: &[f64],
) -> Result<Component, Error> {
    let program = compile(&tokenize(recipe), registry, Layout::Local)?;
    program.verify()?;
    let params = program.bind(fitted)?;
    Ok(Component { program, params })
}

impl Component {
    /// The local parameter vector.
    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Evaluate the component at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        // stack shape and vector length were checked on construction
        self.program
            .evaluate(&self.params, x)
            .unwrap_or(f64::NAN)
    }

    pub fn into_fn(self) -> impl Fn(f64) -> f64 {
        move |x| self.eval(x)
    }
}
