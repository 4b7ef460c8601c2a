use miette::*;
use std::io::Read;

/// CSV column headers.
pub struct Headers(Vec<String>);

impl Headers {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn find_ignore_case(&self, s: &str) -> Option<usize> {
        self.find_match(|x| x.eq_ignore_ascii_case(s))
    }

    pub fn find_match<P>(&self, predicate: P) -> Option<usize>
    where
        P: Fn(&str) -> bool,
    {
        self.0
            .iter()
            .enumerate()
            .find_map(|(i, x)| predicate(x).then_some(i))
    }
}

impl<T: AsRef<str>> FromIterator<T> for Headers {
    fn from_iter<I: IntoIterator<Item = T>>(i: I) -> Self {
        Headers(
            i.into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .collect(),
        )
    }
}

/// A binned observable: bin centres with contents and errors.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    x: Vec<f64>,
    y: Vec<f64>,
    err: Vec<f64>,
}

impl Histogram {
    /// Bin centres must be strictly increasing.
    pub fn new(x: Vec<f64>, y: Vec<f64>, err: Vec<f64>) -> Result<Self> {
        ensure!(!x.is_empty(), "histogram has no bins");
        ensure!(
            x.len() == y.len() && x.len() == err.len(),
            "histogram columns differ in length: {} centres, {} contents, {} errors",
            x.len(),
            y.len(),
            err.len()
        );
        if let Some(i) = x.windows(2).position(|w| !(w[0] < w[1])) {
            bail!("bin centres must be strictly increasing (row index {})", i + 1);
        }

        Ok(Self { x, y, err })
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Iterate over `(centre, content, error)`.
    pub fn bins(&self) -> impl ExactSizeIterator<Item = (f64, f64, f64)> + '_ {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.err)
            .map(|((x, y), e)| (*x, *y, *e))
    }

    /// The range spanned by the bin centres.
    pub fn range(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Linear interpolation between adjacent bin centres.
    ///
    /// Outside the centre range the first or last bin content is returned. A NaN abscissa
    /// gives NaN.
    pub fn interpolate(&self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }
        let n = self.x.len();
        if x <= self.x[0] {
            return self.y[0];
        }
        if x >= self.x[n - 1] {
            return self.y[n - 1];
        }

        // first centre strictly greater than x, 1 <= hi < n
        let hi = self.x.partition_point(|c| *c <= x);
        let (x0, x1) = (self.x[hi - 1], self.x[hi]);
        let (y0, y1) = (self.y[hi - 1], self.y[hi]);
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }

    /// A copy with the abscissa multiplied by `multiplier`.
    pub fn change_units(&self, multiplier: f64) -> Result<Self> {
        ensure!(
            multiplier > 0. && multiplier.is_finite(),
            "unit multiplier must be positive and finite, got {multiplier}"
        );
        Ok(Self {
            x: self.x.iter().map(|x| x * multiplier).collect(),
            y: self.y.clone(),
            err: self.err.clone(),
        })
    }
}

pub struct CsvReader {
    rdr: csv::Reader<Box<dyn Read>>,
    cols: Option<Headers>,
}

impl CsvReader {
    pub fn new<R: Read + 'static>(rdr: R) -> Self {
        Self {
            rdr: csv::Reader::from_reader(Box::new(rdr)),
            cols: None,
        }
    }

    fn read_headers(&mut self) -> Result<()> {
        let hdrs = self
            .rdr
            .headers()
            .into_diagnostic()
            .wrap_err("failed to read CSV header row")?;

        ensure!(!hdrs.is_empty(), "headers row is empty");

        self.cols = Some(hdrs.iter().collect());
        Ok(())
    }

    pub fn headers(&mut self) -> Result<&Headers> {
        if self.cols.is_none() {
            self.read_headers()?;
        }

        self.cols
            .as_ref()
            .ok_or_else(|| miette!("headers should be initialised"))
    }

    pub fn into_histogram(self) -> Result<Histogram> {
        Histogram::try_from(self)
    }
}

impl TryFrom<CsvReader> for Histogram {
    type Error = miette::Report;

    fn try_from(mut rdr: CsvReader) -> Result<Histogram> {
        let hdrs = rdr.headers()?;
        let col = |name: &str| {
            hdrs.find_ignore_case(name)
                .ok_or_else(|| miette!("could not find column '{}' in headers", name))
        };
        let xi = col("x")?;
        let yi = col("y")?;
        let ei = hdrs
            .find_ignore_case("err")
            .or_else(|| hdrs.find_ignore_case("yerr"));
        let width = hdrs.len();

        let (mut x, mut y, mut err) = (Vec::new(), Vec::new(), Vec::new());

        for (i, row) in rdr.rdr.records().enumerate() {
            let row = row
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read row {} in CSV", i + 1))?;

            ensure!(
                row.len() == width,
                "row index {} does not have the same length as the headers",
                i + 1
            );

            let cell = |j: usize| {
                row[j]
                    .trim()
                    .parse::<f64>()
                    .into_diagnostic()
                    .wrap_err_with(|| format!("in column index {j}"))
                    .wrap_err_with(|| format!("in row index {}", i + 1))
            };

            x.push(cell(xi)?);
            let yv = cell(yi)?;
            y.push(yv);
            err.push(match ei {
                Some(j) => cell(j)?,
                None => yv.abs().sqrt(),
            });
        }

        Histogram::new(x, y, err)
    }
}
