use clap::{Parser, ValueEnum};
use miette::*;
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

pub mod basis;
mod component;
mod config;
mod data;
mod error;
pub mod expr;
mod model;
mod registry;
mod solve;

pub use basis::{Basis, Curve, Template};
pub use component::{compile_component, Component};
pub use config::{FitConfig, TermConfig};
pub use data::{CsvReader, Headers, Histogram};
pub use error::{Error, EvalError, ParameterOutOfRangeWarning};
pub use model::{linspace, Model, Recipe, Stage};
pub use registry::{ParamSpec, Registry, Term};
pub use solve::{fit_points, Fit, FitOptions, Graph, Observable};

/// CLI model fitting tool.
/// Compose a model from named terms and fit it to a histogram.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct App {
    /// Path to the JSON fit configuration.
    pub config: PathBuf,

    /// Path to the input CSV histogram (x, y and optional err columns).
    /// If left blank, stdin is read.
    pub data: Option<PathBuf>,

    /// The output format to write to stdout.
    #[arg(short, long, default_value_t, value_enum)]
    pub out: Output,

    /// Do not output the fitting statistics along with parameters.
    #[arg(short, long)]
    pub no_stats: bool,

    /// Instead of the fit table, write the model and each draw recipe sampled at this many
    /// points as CSV.
    #[arg(long, value_name = "N")]
    pub draw: Option<usize>,
}

#[derive(Debug, Copy, Clone, ValueEnum, Default)]
pub enum Output {
    /// Rich table view.
    #[default]
    Table,

    /// Plain, space separated table.
    Plain,

    /// JSON fit result.
    Json,
}

impl App {
    pub fn run(self) -> Result<()> {
        let App {
            config,
            data,
            out,
            no_stats,
            draw,
        } = self;

        let cfg = FitConfig::load(&config)?;
        let base = config.parent().unwrap_or(Path::new("."));

        let with_path_ctx = || {
            data.as_ref()
                .map(|p| format!("in '{}'", p.display()))
                .unwrap_or_else(|| "from stdin".into())
        };

        let hist = match &data {
            Some(path) => CsvReader::new(io::BufReader::new(
                fs::File::open(path)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to open '{}'", path.display()))?,
            )),
            None => {
                eprintln!("Reading CSV from stdin");
                CsvReader::new(io::stdin())
            }
        }
        .into_histogram()
        .wrap_err_with(with_path_ctx)?;

        let (xmin, xmax) = cfg.fit_range.unzip();
        let opts = FitOptions::parse(&cfg.options, xmin, xmax)?;

        let mut model = cfg
            .build_model(base)
            .wrap_err_with(|| format!("in '{}'", config.display()))?;

        if !opts.quiet {
            for w in model.warnings() {
                eprintln!("{:?}", Report::new(w.clone()));
            }
        }

        model
            .fit(&hist, &cfg.model, &opts)
            .wrap_err_with(with_path_ctx)?;

        match draw {
            Some(n) => {
                let (lo, hi) = opts.range.unwrap_or_else(|| hist.range());
                let graphs = model.draw(&cfg.draw, &linspace(lo, hi, n))?;
                write_graphs(&graphs).into_diagnostic()
            }
            None => {
                let fitted = model.result().ok_or(Error::NotFitted)?;
                match out {
                    Output::Table => write_table(fitted, !no_stats).into_diagnostic(),
                    Output::Plain => write_plain(fitted, !no_stats).into_diagnostic(),
                    Output::Json => {
                        let w = &mut io::stdout();
                        serde_json::to_writer_pretty(&mut *w, fitted).into_diagnostic()?;
                        writeln!(w).into_diagnostic()
                    }
                }
            }
        }
    }
}

fn formatter() -> numfmt::Formatter {
    "[~4]".parse::<numfmt::Formatter>().expect("just fine")
}

fn write_table(x: &Fit, write_stats: bool) -> io::Result<()> {
    use comfy_table::{Cell, CellAlignment as CA, Row, Table};

    let w = &mut io::stdout();

    let mut nfmtr = formatter();

    let mut table = Table::new();

    table.set_header(["Parameter", "Value", "Standard Error", "Status"]);

    for (((p, v), e), fixed) in x
        .parameter_names
        .iter()
        .zip(&x.parameter_values)
        .zip(&x.xerrs)
        .zip(&x.fixed)
    {
        let mut row = Row::new();
        row.add_cell(Cell::new(p))
            .add_cell(Cell::new(nfmtr.fmt(*v)).set_alignment(CA::Right))
            .add_cell(Cell::new(nfmtr.fmt(*e)).set_alignment(CA::Right))
            .add_cell(Cell::new(if *fixed { "fixed" } else { "free" }));
        table.add_row(row);
    }

    table.load_preset(comfy_table::presets::UTF8_HORIZONTAL_ONLY);

    writeln!(w, "{table}")?;

    if write_stats {
        write_stats_lines(w, x)?;
    }

    Ok(())
}

fn write_plain(x: &Fit, write_stats: bool) -> io::Result<()> {
    let w = &mut io::stdout();
    let mut nfmtr = formatter();

    writeln!(w, "parameter value error status")?;
    for (((p, v), e), fixed) in x
        .parameter_names
        .iter()
        .zip(&x.parameter_values)
        .zip(&x.xerrs)
        .zip(&x.fixed)
    {
        write!(w, "{p} {} ", nfmtr.fmt(*v))?;
        writeln!(
            w,
            "{} {}",
            nfmtr.fmt(*e),
            if *fixed { "fixed" } else { "free" }
        )?;
    }

    if write_stats {
        write_stats_lines(w, x)?;
    }

    Ok(())
}

fn write_stats_lines(w: &mut impl Write, x: &Fit) -> io::Result<()> {
    let mut nfmtr = formatter();
    writeln!(w, "  Number of points: {}", x.n)?;
    writeln!(w, "  Chi-squared: {}", nfmtr.fmt(x.chi2))?;
    writeln!(w, "  Degrees of freedom: {}", x.ndf)?;
    writeln!(w, "  Chi-squared / ndf: {}", nfmtr.fmt(x.chi2_ndf()))?;
    Ok(())
}

fn write_graphs(graphs: &[Graph]) -> io::Result<()> {
    let mut wtr = csv::Writer::from_writer(io::stdout());

    let mut header = vec!["x"];
    header.extend(graphs.iter().map(|g| g.label.as_str()));
    wtr.write_record(&header)?;

    let n = graphs.first().map_or(0, |g| g.points.len());
    for i in 0..n {
        let mut record = vec![graphs[0].points[i].0.to_string()];
        record.extend(graphs.iter().map(|g| g.points[i].1.to_string()));
        wtr.write_record(&record)?;
    }

    wtr.flush()
}
