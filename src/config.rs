use crate::{
    basis::{Basis, Template},
    data::CsvReader,
    model::{Model, Recipe},
    registry::ParamSpec,
};
use miette::*;
use serde::*;
use std::{
    fs,
    io::BufReader,
    path::{Path, PathBuf},
};

/// A fit described as JSON.
///
/// ```json
/// {
///   "fit_range": [0.0, 2.0],
///   "terms": [
///     { "name": "bg", "func": "pol0", "params": [{ "name": "c", "init": 2, "lower": 1, "upper": -1 }] },
///     { "name": "tmpl", "file": "tmpl.csv", "unit_mult": 1000, "params": [{ "name": "n", "init": 1, "lower": 0, "upper": 5 }] }
///   ],
///   "model": "bg + tmpl",
///   "options": "R",
///   "draw": [{ "label": "template", "formula": "tmpl" }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FitConfig {
    #[serde(default)]
    pub fit_range: Option<(f64, f64)>,
    pub terms: Vec<TermConfig>,
    pub model: String,
    #[serde(default)]
    pub options: String,
    #[serde(default)]
    pub draw: Vec<Recipe>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TermConfig {
    pub name: String,
    /// A basis function name, such as `pol2` or `gaus`.
    #[serde(default)]
    pub func: Option<String>,
    /// A CSV histogram used as a template.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Multiplier applied to the template abscissa.
    #[serde(default = "one")]
    pub unit_mult: f64,
    pub params: Vec<ParamSpec>,
}

fn one() -> f64 {
    1.
}

impl FitConfig {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .into_diagnostic()
            .wrap_err("failed to parse fit configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to open '{}'", path.display()))?;
        Self::from_json(&s).wrap_err_with(|| format!("in '{}'", path.display()))
    }

    /// Register every term into a new model.
    ///
    /// Relative template paths are resolved against `base`.
    pub fn build_model(&self, base: &Path) -> Result<Model> {
        let mut model = Model::new();

        for t in &self.terms {
            let basis = t
                .basis(base)
                .wrap_err_with(|| format!("in term '{}'", t.name))?;
            model.add(t.name.clone(), basis, t.params.clone())?;
        }

        Ok(model)
    }
}

impl TermConfig {
    fn basis(&self, base: &Path) -> Result<Basis> {
        match (&self.func, &self.file) {
            (Some(func), None) => Ok(func.parse::<Basis>()?),
            (None, Some(file)) => {
                let path = base.join(file);
                let hist = CsvReader::new(BufReader::new(
                    fs::File::open(&path)
                        .into_diagnostic()
                        .wrap_err_with(|| format!("failed to open '{}'", path.display()))?,
                ))
                .into_histogram()
                .wrap_err_with(|| format!("in '{}'", path.display()))?;

                Ok(Basis::Template(Template::new(hist.change_units(self.unit_mult)?)))
            }
            (Some(_), Some(_)) => bail!("a term takes either 'func' or 'file', not both"),
            (None, None) => bail!("a term needs one of 'func' or 'file'"),
        }
    }
}
