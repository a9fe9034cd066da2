//! # Risk Tolerance
//!
//! $$
//! \rho = 0.5\,(1-\tfrac{\text{age}}{100}) + 0.3\,s_f + 0.2\,a_r,\qquad
//! r^\* = \min\mu + (\max\mu-\min\mu)\,\rho\,k
//! $$
//!
//! Maps an investor profile to a risk-tolerance scalar and that scalar to a target
//! return on the long-only frontier.

use impl_new_derive::ImplNew;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::config::PortfolioConfig;
use super::estimators::CovarianceEstimator;
use super::estimators::ExpectedReturns;
use super::estimators::ReturnsEstimator;
use super::matrix::CovarianceMatrix;
use super::mean_variance::MeanVarianceOptimizer;
use super::types::Allocation;
use super::types::AllocationRequest;
use super::types::OptimizedPortfolio;
use super::types::SolvePath;
use super::types::Strategy;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::traits::AllocationStrategy;

/// Weighted blend of the three profile factors.
pub fn calculate_risk_tolerance(age: f64, financial_state: f64, risk_aversion: f64) -> f64 {
  let age_factor = 1.0 - age / 100.0;
  age_factor * 0.5 + financial_state * 0.3 + risk_aversion * 0.2
}

/// Risk tolerance in `[0, 1]`; higher accepts more risk.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct RiskTolerance(f64);

impl RiskTolerance {
  pub fn new(value: f64) -> Result<Self> {
    if !(0.0..=1.0).contains(&value) {
      return Err(PortfolioError::validation(format!(
        "risk tolerance must lie in [0, 1], got {value}"
      )));
    }
    Ok(Self(value))
  }

  pub fn value(self) -> f64 {
    self.0
  }
}

impl TryFrom<f64> for RiskTolerance {
  type Error = PortfolioError;

  fn try_from(value: f64) -> Result<Self> {
    Self::new(value)
  }
}

impl From<RiskTolerance> for f64 {
  fn from(rt: RiskTolerance) -> Self {
    rt.0
  }
}

/// Investor profile. `financial_state` and `risk_aversion` are pre-normalized to `[0, 1]`.
#[derive(ImplNew, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
  /// Age in years.
  pub age: f64,
  pub financial_state: f64,
  pub risk_aversion: f64,
}

impl RiskProfile {
  pub fn risk_tolerance(&self) -> Result<RiskTolerance> {
    if !(0.0..=100.0).contains(&self.age) {
      return Err(PortfolioError::validation(format!(
        "age must lie in [0, 100], got {}",
        self.age
      )));
    }
    for (name, v) in [
      ("financial state", self.financial_state),
      ("risk aversion", self.risk_aversion),
    ] {
      if !(0.0..=1.0).contains(&v) {
        return Err(PortfolioError::validation(format!(
          "{name} must lie in [0, 1], got {v}"
        )));
      }
    }

    let rt = calculate_risk_tolerance(self.age, self.financial_state, self.risk_aversion);
    // Bounded inputs keep `rt` in [0, 1] up to rounding.
    RiskTolerance::new(rt.clamp(0.0, 1.0))
  }
}

/// Turns a risk tolerance into a target-return mean-variance solve.
#[derive(Clone, Copy, Debug)]
pub struct RiskToleranceCalibrator {
  target_return_factor: f64,
}

impl Default for RiskToleranceCalibrator {
  fn default() -> Self {
    Self {
      target_return_factor: 0.75,
    }
  }
}

impl RiskToleranceCalibrator {
  pub fn new(target_return_factor: f64) -> Self {
    Self {
      target_return_factor,
    }
  }

  pub fn target_return(&self, mu: &ExpectedReturns, risk_tolerance: RiskTolerance) -> f64 {
    let (lo, hi) = (mu.min(), mu.max());
    lo + (hi - lo) * risk_tolerance.value() * self.target_return_factor
  }

  /// Minimum-volatility portfolio at the calibrated target return.
  pub fn optimize(
    &self,
    mu: &ExpectedReturns,
    cov: &CovarianceMatrix,
    risk_tolerance: RiskTolerance,
    risk_free_rate: f64,
    max_iterations: usize,
  ) -> Result<(Allocation, f64)> {
    let target = self.target_return(mu, risk_tolerance);
    debug!(
      risk_tolerance = risk_tolerance.value(),
      target_return = target,
      "calibrated target return"
    );

    let allocation = MeanVarianceOptimizer::new(mu, cov)?
      .with_risk_free_rate(risk_free_rate)
      .with_max_iterations(max_iterations)
      .efficient_return(target)?;
    Ok((allocation, target))
  }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RiskToleranceStrategy;

impl AllocationStrategy for RiskToleranceStrategy {
  fn strategy(&self) -> Strategy {
    Strategy::RiskTolerance
  }

  fn allocate(
    &self,
    request: &AllocationRequest,
    config: &PortfolioConfig,
  ) -> Result<OptimizedPortfolio> {
    let risk_tolerance = request.risk_tolerance.ok_or_else(|| {
      PortfolioError::validation("risk-tolerance strategy needs a risk tolerance")
    })?;

    let mu = ReturnsEstimator::new(config.frequency).estimate(&request.prices)?;
    let cov = CovarianceEstimator::new(config.frequency)
      .estimate(config.risk_tolerance_covariance, &request.prices)?;
    let (allocation, target_return) = RiskToleranceCalibrator::new(config.target_return_factor)
      .optimize(
        &mu,
        &cov,
        risk_tolerance,
        config.risk_free_rate,
        config.max_iterations,
      )?;

    OptimizedPortfolio::new(
      self.strategy().tag(),
      allocation,
      Some(SolvePath::EfficientReturn { target_return }),
    )
  }
}
