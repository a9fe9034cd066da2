//! # Portfolio Data
//!
//! $$
//! r_{t,i} = \frac{P_{t,i}}{P_{t-1,i}} - 1, \qquad
//! \rho_{ij} = \frac{\sum_t (r_{t,i}-\bar r_i)(r_{t,j}-\bar r_j)}{\sqrt{\sum_t (r_{t,i}-\bar r_i)^2 \sum_t (r_{t,j}-\bar r_j)^2}}
//! $$
//!
//! Aligned price history, percentage returns and correlation helpers.

use std::collections::HashSet;
use std::io::Read;

use chrono::NaiveDate;
use csv::ReaderBuilder;
use csv::Trim;
use nalgebra::DMatrix;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;
use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;

/// Copy an `ndarray` view into a column-major `nalgebra` matrix.
pub(crate) fn to_matrix(view: ArrayView2<'_, f64>) -> DMatrix<f64> {
  DMatrix::from_fn(view.nrows(), view.ncols(), |i, j| view[[i, j]])
}

/// Unbiased (`T - 1`) covariance between the columns of `x`.
pub(crate) fn column_covariance(x: &DMatrix<f64>) -> DMatrix<f64> {
  let (t, n) = x.shape();
  if t < 2 {
    return DMatrix::zeros(n, n);
  }

  let mut centered = x.clone();
  for mut col in centered.column_iter_mut() {
    let mean = col.mean();
    col.add_scalar_mut(-mean);
  }

  let scale = 1.0 / (t - 1) as f64;
  DMatrix::from_fn(n, n, |i, j| centered.column(i).dot(&centered.column(j)) * scale)
}

/// Pearson correlation between the columns of `x`.
///
/// A column without variance is reported as uncorrelated with every other column.
pub fn correlation_matrix(x: &DMatrix<f64>) -> DMatrix<f64> {
  let cov = column_covariance(x);
  let sd = cov.diagonal().map(f64::sqrt);

  DMatrix::from_fn(cov.nrows(), cov.ncols(), |i, j| {
    if i == j {
      return 1.0;
    }
    let denom = sd[i] * sd[j];
    if denom < 1e-15 {
      0.0
    } else {
      (cov[(i, j)] / denom).clamp(-1.0, 1.0)
    }
  })
}

/// Adjusted close prices indexed by date (rows) and instrument (columns).
///
/// Rows are kept sorted by date with no duplicates. Missing prices are stored as `NaN`.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSeries {
  dates: Vec<NaiveDate>,
  symbols: Vec<String>,
  prices: Array2<f64>,
}

impl PriceSeries {
  /// Build a price series from a `dates x symbols` matrix.
  ///
  /// Rows are reordered by date. Non-finite entries become missing values.
  pub fn new(dates: Vec<NaiveDate>, symbols: Vec<String>, prices: Array2<f64>) -> Result<Self> {
    if symbols.is_empty() {
      return Err(PortfolioError::validation("empty symbol set"));
    }

    let mut seen = HashSet::with_capacity(symbols.len());
    for s in &symbols {
      if !seen.insert(s.as_str()) {
        return Err(PortfolioError::validation(format!("duplicate symbol `{s}`")));
      }
    }

    if prices.nrows() != dates.len() || prices.ncols() != symbols.len() {
      return Err(PortfolioError::validation(format!(
        "price matrix is {}x{}, expected {}x{}",
        prices.nrows(),
        prices.ncols(),
        dates.len(),
        symbols.len()
      )));
    }

    if let Some(p) = prices.iter().find(|p| p.is_finite() && **p <= 0.0) {
      return Err(PortfolioError::validation(format!(
        "prices must be positive, found {p}"
      )));
    }

    let mut order: Vec<usize> = (0..dates.len()).collect();
    order.sort_by_key(|&i| dates[i]);
    for w in order.windows(2) {
      if dates[w[0]] == dates[w[1]] {
        return Err(PortfolioError::data(format!(
          "duplicate date {}",
          dates[w[0]]
        )));
      }
    }

    let dates = order.iter().map(|&i| dates[i]).collect();
    let prices = prices
      .select(Axis(0), &order)
      .mapv(|p| if p.is_finite() { p } else { f64::NAN });

    Ok(Self {
      dates,
      symbols,
      prices,
    })
  }

  /// Build a price series from named columns sharing one date index.
  pub fn from_columns(dates: Vec<NaiveDate>, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
    let n_rows = dates.len();
    let mut prices = Array2::from_elem((n_rows, columns.len()), f64::NAN);
    let mut symbols = Vec::with_capacity(columns.len());

    for (j, (symbol, values)) in columns.into_iter().enumerate() {
      if values.len() != n_rows {
        return Err(PortfolioError::validation(format!(
          "column `{symbol}` has {} prices for {n_rows} dates",
          values.len()
        )));
      }
      for (i, v) in values.into_iter().enumerate() {
        prices[[i, j]] = v;
      }
      symbols.push(symbol);
    }

    Self::new(dates, symbols, prices)
  }

  /// Read a wide price table: a date column (`YYYY-MM-DD`) followed by one column per
  /// symbol. Empty cells are missing prices.
  pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
    let mut reader = ReaderBuilder::new()
      .has_headers(true)
      .trim(Trim::All)
      .from_reader(reader);

    let headers = reader
      .headers()
      .map_err(|e| PortfolioError::data(format!("unreadable price header: {e}")))?
      .clone();
    if headers.len() < 2 {
      return Err(PortfolioError::validation(
        "price table needs a date column and at least one symbol",
      ));
    }
    let symbols: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut dates = Vec::new();
    let mut values = Vec::new();
    for (row, record) in reader.records().enumerate() {
      let record =
        record.map_err(|e| PortfolioError::data(format!("price row {}: {e}", row + 1)))?;
      let raw_date = record.get(0).unwrap_or_default();
      let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
        .map_err(|e| PortfolioError::data(format!("bad date `{raw_date}`: {e}")))?;
      dates.push(date);

      for j in 0..symbols.len() {
        let cell = record.get(j + 1).unwrap_or_default();
        let price = if cell.is_empty() {
          f64::NAN
        } else {
          cell.parse::<f64>().map_err(|e| {
            PortfolioError::data(format!("bad price `{cell}` for `{}` on {date}: {e}", symbols[j]))
          })?
        };
        values.push(price);
      }
    }

    let prices = Array2::from_shape_vec((dates.len(), symbols.len()), values)
      .map_err(|e| PortfolioError::data(e.to_string()))?;
    debug!(
      dates = dates.len(),
      instruments = symbols.len(),
      "read price table"
    );
    Self::new(dates, symbols, prices)
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn symbols(&self) -> &[String] {
    &self.symbols
  }

  pub fn prices(&self) -> ArrayView2<'_, f64> {
    self.prices.view()
  }

  pub fn n_observations(&self) -> usize {
    self.dates.len()
  }

  pub fn n_instruments(&self) -> usize {
    self.symbols.len()
  }

  pub fn position(&self, symbol: &str) -> Option<usize> {
    self.symbols.iter().position(|s| s == symbol)
  }

  pub fn column(&self, symbol: &str) -> Option<ArrayView1<'_, f64>> {
    self.position(symbol).map(|j| self.prices.column(j))
  }

  /// Restrict the series to `symbols`, in the given order.
  pub fn select(&self, symbols: &[&str]) -> Result<Self> {
    let idx = symbols
      .iter()
      .map(|s| {
        self
          .position(s)
          .ok_or_else(|| PortfolioError::validation(format!("unknown symbol `{s}`")))
      })
      .collect::<Result<Vec<_>>>()?;

    Self::new(
      self.dates.clone(),
      symbols.iter().map(|s| s.to_string()).collect(),
      self.prices.select(Axis(1), &idx),
    )
  }

  /// Drop every date on which at least one instrument has no price.
  pub fn drop_missing(&self) -> Self {
    let keep: Vec<usize> = (0..self.n_observations())
      .filter(|&i| self.prices.row(i).iter().all(|p| p.is_finite()))
      .collect();

    if keep.len() < self.n_observations() {
      debug!(
        dropped = self.n_observations() - keep.len(),
        "dropped dates with missing prices"
      );
    }

    Self {
      dates: keep.iter().map(|&i| self.dates[i]).collect(),
      symbols: self.symbols.clone(),
      prices: self.prices.select(Axis(0), &keep),
    }
  }

  /// Simple percentage returns between consecutive dates.
  ///
  /// The result has one row fewer than the price matrix; a return is `NaN` when either
  /// endpoint price is missing.
  pub fn pct_returns(&self) -> Array2<f64> {
    let t = self.n_observations();
    let n = self.n_instruments();
    let mut out = Array2::from_elem((t.saturating_sub(1), n), f64::NAN);

    for i in 1..t {
      for j in 0..n {
        let prev = self.prices[[i - 1, j]];
        let cur = self.prices[[i, j]];
        if prev.is_finite() && cur.is_finite() {
          out[[i - 1, j]] = cur / prev - 1.0;
        }
      }
    }

    out
  }

  /// Complete percentage-return matrix: instruments without any return are dropped first,
  /// then every period with a missing return.
  pub fn returns_frame(&self) -> ReturnsFrame {
    let raw = self.pct_returns();

    let cols: Vec<usize> = (0..raw.ncols())
      .filter(|&j| raw.column(j).iter().any(|r| r.is_finite()))
      .collect();
    if cols.len() < raw.ncols() {
      debug!(
        dropped = raw.ncols() - cols.len(),
        "dropped instruments without returns"
      );
    }

    let raw = raw.select(Axis(1), &cols);
    let rows: Vec<usize> = (0..raw.nrows())
      .filter(|&i| raw.row(i).iter().all(|r| r.is_finite()))
      .collect();

    ReturnsFrame {
      symbols: cols.iter().map(|&j| self.symbols[j].clone()).collect(),
      returns: raw.select(Axis(0), &rows),
    }
  }

  /// Symbols of the `n` instruments whose prices have the lowest mean correlation
  /// with the rest of the universe, ordered from least to most correlated.
  pub fn select_low_correlation(&self, n: usize) -> Result<Vec<String>> {
    let complete = self.drop_missing();
    if complete.n_observations() < 2 {
      return Err(PortfolioError::data(
        "need at least 2 complete dates to rank correlations",
      ));
    }

    let corr = correlation_matrix(&to_matrix(complete.prices.view()));

    let mut ranked: Vec<(usize, f64)> = corr
      .row_iter()
      .enumerate()
      .map(|(i, row)| (i, row.mean()))
      .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    Ok(
      ranked
        .into_iter()
        .take(n)
        .map(|(i, _)| self.symbols[i].clone())
        .collect(),
    )
  }
}

/// Complete (no missing values) matrix of periodic percentage returns.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnsFrame {
  symbols: Vec<String>,
  returns: Array2<f64>,
}

impl ReturnsFrame {
  pub fn symbols(&self) -> &[String] {
    &self.symbols
  }

  pub fn returns(&self) -> ArrayView2<'_, f64> {
    self.returns.view()
  }

  pub fn n_periods(&self) -> usize {
    self.returns.nrows()
  }

  pub fn n_instruments(&self) -> usize {
    self.returns.ncols()
  }

  /// Returns as a `periods x instruments` matrix.
  pub fn matrix(&self) -> DMatrix<f64> {
    to_matrix(self.returns.view())
  }

  pub fn correlation(&self) -> DMatrix<f64> {
    correlation_matrix(&self.matrix())
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use nalgebra::DVector;

  use super::*;

  fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
  }

  #[test]
  fn rows_are_sorted_by_date() {
    let series = PriceSeries::from_columns(
      vec![day(3), day(1), day(2)],
      vec![("AAA".into(), vec![12.0, 10.0, 11.0])],
    )
    .unwrap();

    assert_eq!(series.dates(), &[day(1), day(2), day(3)]);
    assert_eq!(series.column("AAA").unwrap().to_vec(), vec![10.0, 11.0, 12.0]);
  }

  #[test]
  fn duplicate_dates_are_rejected() {
    let err = PriceSeries::from_columns(
      vec![day(1), day(1)],
      vec![("AAA".into(), vec![10.0, 11.0])],
    )
    .unwrap_err();
    assert!(matches!(err, PortfolioError::Data(_)));
  }

  #[test]
  fn empty_symbol_set_is_a_validation_error() {
    let err = PriceSeries::from_columns(vec![day(1)], vec![]).unwrap_err();
    assert!(matches!(err, PortfolioError::Validation(_)));
  }

  #[test]
  fn pct_returns_leave_gaps_missing() {
    let series = PriceSeries::from_columns(
      vec![day(1), day(2), day(3)],
      vec![
        ("AAA".into(), vec![100.0, 110.0, 121.0]),
        ("BBB".into(), vec![50.0, f64::NAN, 55.0]),
      ],
    )
    .unwrap();

    let r = series.pct_returns();
    assert_eq!(r.nrows(), 2);
    assert_abs_diff_eq!(r[[0, 0]], 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(r[[1, 0]], 0.1, epsilon = 1e-12);
    assert!(r[[0, 1]].is_nan());
    assert!(r[[1, 1]].is_nan());
  }

  #[test]
  fn returns_frame_drops_empty_instruments_and_incomplete_rows() {
    let series = PriceSeries::from_columns(
      vec![day(1), day(2), day(3), day(4)],
      vec![
        ("AAA".into(), vec![100.0, 101.0, 102.0, 103.0]),
        ("BBB".into(), vec![50.0, 51.0, f64::NAN, 52.0]),
        ("CCC".into(), vec![f64::NAN; 4]),
      ],
    )
    .unwrap();

    let frame = series.returns_frame();
    assert_eq!(frame.symbols(), &["AAA".to_string(), "BBB".to_string()]);
    assert_eq!(frame.n_periods(), 1);
  }

  #[test]
  fn drop_missing_keeps_complete_dates() {
    let series = PriceSeries::from_columns(
      vec![day(1), day(2), day(3)],
      vec![
        ("AAA".into(), vec![1.0, 2.0, 3.0]),
        ("BBB".into(), vec![1.0, f64::NAN, 3.0]),
      ],
    )
    .unwrap();

    let clean = series.drop_missing();
    assert_eq!(clean.dates(), &[day(1), day(3)]);
  }

  #[test]
  fn low_correlation_selection_prefers_the_odd_one_out() {
    let series = PriceSeries::from_columns(
      (1..=6).map(day).collect(),
      vec![
        ("UP1".into(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        ("UP2".into(), vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.5]),
        ("UP3".into(), vec![3.0, 3.5, 4.0, 4.6, 5.0, 5.5]),
        ("DOWN".into(), vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0]),
      ],
    )
    .unwrap();

    let picked = series.select_low_correlation(1).unwrap();
    assert_eq!(picked, vec!["DOWN".to_string()]);
  }

  #[test]
  fn correlation_matrix_is_symmetric_with_unit_diagonal() {
    let x = DMatrix::from_column_slice(3, 2, &[1.0, 2.0, 4.0, 3.0, 1.0, 0.5]);
    let corr = correlation_matrix(&x);
    assert_eq!(corr[(0, 0)], 1.0);
    assert_eq!(corr[(0, 1)], corr[(1, 0)]);
    assert!(corr[(0, 1)] < 0.0);
  }

  #[test]
  fn perfectly_linear_columns_have_unit_correlation() {
    let x = DMatrix::from_columns(&[
      DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]),
      DVector::from_vec(vec![3.0, 5.0, 7.0, 9.0]),
      DVector::from_vec(vec![5.0, 5.0, 5.0, 5.0]),
    ]);
    let corr = correlation_matrix(&x);
    assert_abs_diff_eq!(corr[(0, 1)], 1.0, epsilon = 1e-12);
    assert_eq!(corr[(0, 2)], 0.0);
    assert_eq!(corr[(2, 2)], 1.0);
  }

  #[test]
  fn column_covariance_uses_unbiased_denominator() {
    let x = DMatrix::from_column_slice(3, 2, &[1.0, 2.0, 3.0, 2.0, 4.0, 6.0]);
    let cov = column_covariance(&x);
    assert_abs_diff_eq!(cov[(0, 0)], 1.0, epsilon = 1e-15);
    assert_abs_diff_eq!(cov[(0, 1)], 2.0, epsilon = 1e-15);
    assert_abs_diff_eq!(cov[(1, 1)], 4.0, epsilon = 1e-15);
    assert_eq!(cov[(0, 1)], cov[(1, 0)]);
  }

  #[test]
  fn reads_wide_csv_with_gaps() {
    let csv = "date,AAA,BBB\n2024-01-02,101,50\n2024-01-01,100,\n2024-01-03,102,51\n";
    let series = PriceSeries::from_csv_reader(csv.as_bytes()).unwrap();

    assert_eq!(series.symbols(), &["AAA".to_string(), "BBB".to_string()]);
    assert_eq!(series.dates()[0], day(1));
    assert!(series.prices()[[0, 1]].is_nan());
    assert_eq!(series.prices()[[2, 0]], 102.0);
  }

  #[test]
  fn csv_with_bad_price_is_a_data_error() {
    let csv = "date,AAA\n2024-01-01,abc\n";
    assert!(matches!(
      PriceSeries::from_csv_reader(csv.as_bytes()),
      Err(PortfolioError::Data(_))
    ));
  }
}
