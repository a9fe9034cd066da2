//! # Return and Risk Estimators
//!
//! $$
//! \hat\mu_i = f\cdot\frac{1}{T}\sum_{t=1}^{T} r_{t,i},\qquad
//! \hat\Sigma_{LW} = f\cdot\left[(1-\delta)S + \delta\,\bar\sigma^2 I\right]
//! $$
//!
//! Annualized mean historical returns and Ledoit-Wolf shrunk covariance.

use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::data::PriceSeries;
use super::data::ReturnsFrame;
use super::data::column_covariance;
use super::matrix::CovarianceMatrix;
use crate::error::PortfolioError;
use crate::error::Result;

/// Trading periods per year for daily data.
pub const TRADING_DAYS: usize = 252;

/// Shrinkage intensities tried, in order, when the Ledoit-Wolf estimate cannot be factorised.
const SHRINKAGE_LADDER: [f64; 5] = [0.1, 0.25, 0.5, 0.75, 1.0];

/// Annualized expected return per instrument.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpectedReturns {
  symbols: Vec<String>,
  values: DVector<f64>,
}

impl ExpectedReturns {
  pub fn new(symbols: Vec<String>, values: DVector<f64>) -> Result<Self> {
    if symbols.is_empty() {
      return Err(PortfolioError::validation("empty symbol set"));
    }
    if symbols.len() != values.len() {
      return Err(PortfolioError::validation(format!(
        "{} symbols for {} expected returns",
        symbols.len(),
        values.len()
      )));
    }
    if values.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::data("expected returns must be finite"));
    }
    Ok(Self { symbols, values })
  }

  pub fn symbols(&self) -> &[String] {
    &self.symbols
  }

  pub fn values(&self) -> &DVector<f64> {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn get(&self, symbol: &str) -> Option<f64> {
    let i = self.symbols.iter().position(|s| s == symbol)?;
    Some(self.values[i])
  }

  pub fn min(&self) -> f64 {
    self.values.min()
  }

  pub fn max(&self) -> f64 {
    self.values.max()
  }
}

/// Mean historical return estimator.
#[derive(Clone, Copy, Debug)]
pub struct ReturnsEstimator {
  frequency: usize,
}

impl Default for ReturnsEstimator {
  fn default() -> Self {
    Self::new(TRADING_DAYS)
  }
}

impl ReturnsEstimator {
  pub fn new(frequency: usize) -> Self {
    Self { frequency }
  }

  /// Arithmetic mean of simple returns, scaled by the number of periods per year.
  ///
  /// Each instrument needs at least two prices and one pair of consecutive prices.
  pub fn estimate(&self, prices: &PriceSeries) -> Result<ExpectedReturns> {
    let returns = prices.pct_returns();
    let mut mu = DVector::zeros(prices.n_instruments());

    for (j, symbol) in prices.symbols().iter().enumerate() {
      let observed = prices
        .prices()
        .column(j)
        .iter()
        .filter(|p| p.is_finite())
        .count();
      if observed == 0 {
        return Err(PortfolioError::data(format!("`{symbol}` has no prices")));
      }
      if observed < 2 {
        return Err(PortfolioError::data(format!(
          "`{symbol}` has {observed} price point, need at least 2"
        )));
      }

      let valid: Vec<f64> = returns
        .column(j)
        .iter()
        .cloned()
        .filter(|r| r.is_finite())
        .collect();
      if valid.is_empty() {
        return Err(PortfolioError::data(format!(
          "`{symbol}` has no consecutive prices to form a return"
        )));
      }

      mu[j] = valid.iter().sum::<f64>() / valid.len() as f64 * self.frequency as f64;
    }

    ExpectedReturns::new(prices.symbols().to_vec(), mu)
  }
}

/// Ledoit-Wolf estimate together with the intensity that was finally applied.
#[derive(Clone, Debug)]
pub struct ShrunkCovariance {
  pub matrix: CovarianceMatrix,
  /// Intensity suggested by the analytic Ledoit-Wolf formula.
  pub analytic_shrinkage: f64,
  /// Intensity actually applied (raised when the analytic one did not yield a definite matrix).
  pub shrinkage: f64,
  /// Number of return observations used.
  pub observations: usize,
}

/// Covariance model a strategy estimates risk with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CovarianceKind {
  #[default]
  LedoitWolf,
  /// Unshrunk sample covariance over the dates where every instrument has a return.
  Sample,
}

/// Shrunk covariance estimator.
#[derive(Clone, Copy, Debug)]
pub struct CovarianceEstimator {
  frequency: usize,
}

impl Default for CovarianceEstimator {
  fn default() -> Self {
    Self::new(TRADING_DAYS)
  }
}

impl CovarianceEstimator {
  pub fn new(frequency: usize) -> Self {
    Self { frequency }
  }

  /// Ledoit-Wolf shrinkage towards the constant-variance target `σ̄²I`.
  pub fn ledoit_wolf(&self, prices: &PriceSeries) -> Result<ShrunkCovariance> {
    let frame = complete_returns(prices)?;
    let (t, p) = (frame.nrows(), frame.ncols());

    if t < p {
      warn!(
        observations = t,
        instruments = p,
        "fewer observations than instruments, sample covariance is rank deficient"
      );
    }

    let means: Vec<f64> = (0..p).map(|j| frame.column(j).mean()).collect();
    let x = DMatrix::from_fn(t, p, |i, j| frame[(i, j)] - means[j]);

    let (sample, mu, analytic) = ledoit_wolf_shrinkage(&x);
    let target = DMatrix::<f64>::identity(p, p) * mu;
    let shrink = |delta: f64| (&sample * (1.0 - delta) + &target * delta) * self.frequency as f64;

    let mut shrinkage = analytic;
    let mut shrunk = shrink(shrinkage);
    if shrunk.clone().cholesky().is_none() {
      let mut repaired = false;
      for &delta in SHRINKAGE_LADDER.iter().filter(|&&d| d > analytic) {
        let candidate = shrink(delta);
        if candidate.clone().cholesky().is_some() {
          warn!(
            analytic = analytic,
            applied = delta,
            "raised shrinkage intensity to obtain a positive definite covariance"
          );
          shrinkage = delta;
          shrunk = candidate;
          repaired = true;
          break;
        }
      }
      if !repaired {
        return Err(PortfolioError::numerical(
          "covariance is singular even at full shrinkage (returns have no variance)",
        ));
      }
    }

    debug!(shrinkage, observations = t, "ledoit-wolf covariance");

    Ok(ShrunkCovariance {
      matrix: CovarianceMatrix::new(prices.symbols().to_vec(), shrunk)?,
      analytic_shrinkage: analytic,
      shrinkage,
      observations: t,
    })
  }

  /// Covariance of every instrument in `prices` under `kind`.
  pub fn estimate(&self, kind: CovarianceKind, prices: &PriceSeries) -> Result<CovarianceMatrix> {
    match kind {
      CovarianceKind::LedoitWolf => Ok(self.ledoit_wolf(prices)?.matrix),
      CovarianceKind::Sample => {
        let x = complete_returns(prices)?;
        if x.nrows() < 2 {
          return Err(PortfolioError::data(format!(
            "need at least 2 return observations, got {}",
            x.nrows()
          )));
        }
        debug!(observations = x.nrows(), "sample covariance");
        let values = column_covariance(&x) * self.frequency as f64;
        CovarianceMatrix::new(prices.symbols().to_vec(), values)
      }
    }
  }

  /// Unshrunk annualized sample covariance (`n - 1` denominator) of a complete return frame.
  pub fn sample(&self, frame: &ReturnsFrame) -> Result<CovarianceMatrix> {
    sample_covariance(frame, self.frequency)
  }
}

/// Returns on dates where every instrument has a return.
fn complete_returns(prices: &PriceSeries) -> Result<DMatrix<f64>> {
  let raw = prices.pct_returns();
  let rows: Vec<usize> = (0..raw.nrows())
    .filter(|&i| raw.row(i).iter().all(|r| r.is_finite()))
    .collect();

  if rows.is_empty() {
    return Err(PortfolioError::data(
      "no period has a return for every instrument",
    ));
  }

  Ok(DMatrix::from_fn(rows.len(), raw.ncols(), |i, j| {
    raw[[rows[i], j]]
  }))
}

/// Analytic Ledoit-Wolf intensity for demeaned observations `x` (`T x p`).
///
/// Returns the maximum-likelihood sample covariance, the mean variance and the intensity.
fn ledoit_wolf_shrinkage(x: &DMatrix<f64>) -> (DMatrix<f64>, f64, f64) {
  let t = x.nrows() as f64;
  let p = x.ncols() as f64;

  let xtx = x.transpose() * x;
  let sample = &xtx / t;
  let trace = sample.trace();
  let mu = trace / p;

  let x2 = x.component_mul(x);
  let beta_ = (x2.transpose() * &x2).sum();
  let delta_ = xtx.component_mul(&xtx).sum() / (t * t);

  let beta = (beta_ / t - delta_) / (p * t);
  let delta = (delta_ - 2.0 * mu * trace + p * mu * mu) / p;

  let shrinkage = if delta <= 0.0 {
    0.0
  } else {
    (beta.min(delta) / delta).clamp(0.0, 1.0)
  };

  (sample, mu, shrinkage)
}

/// Annualized sample covariance of a complete return frame.
pub fn sample_covariance(frame: &ReturnsFrame, frequency: usize) -> Result<CovarianceMatrix> {
  if frame.n_periods() < 2 {
    return Err(PortfolioError::data(format!(
      "need at least 2 return observations, got {}",
      frame.n_periods()
    )));
  }

  let values = column_covariance(&frame.matrix()) * frequency as f64;
  CovarianceMatrix::new(frame.symbols().to_vec(), values)
}
