//! # Portfolio Config
//!
//! $$
//! \theta = (f,\ r_f,\ \tau,\ \delta,\ \sigma^\*,\ k,\ \dots)
//! $$
//!
//! Engine-wide parameters: annualization, risk-free rate, Black-Litterman priors,
//! solver limits and weight post-processing. Partial JSON documents fill the
//! remaining fields from [`PortfolioConfig::default`].

use serde::Deserialize;
use serde::Serialize;

use super::black_litterman::DEFAULT_RISK_AVERSION;
use super::black_litterman::DEFAULT_TAU;
use super::estimators::CovarianceKind;
use super::estimators::TRADING_DAYS;
use super::mean_variance::MeanVarianceMode;
use crate::error::PortfolioError;
use crate::error::Result;

/// Engine parameters shared by every strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
  /// Return periods per year.
  pub frequency: usize,
  pub risk_free_rate: f64,
  /// Black-Litterman prior confidence.
  pub tau: f64,
  /// Black-Litterman `δ` when the request carries no risk tolerance.
  pub risk_aversion: f64,
  /// Volatility target of the Black-Litterman efficient-risk fallback.
  pub fallback_target_volatility: f64,
  pub target_return_factor: f64,
  /// Risk model of the risk-tolerance strategy.
  pub risk_tolerance_covariance: CovarianceKind,
  pub mean_variance_mode: MeanVarianceMode,
  /// Interior-point iteration cap per quadratic program.
  pub max_iterations: usize,
  pub weight_cutoff: f64,
  pub weight_decimals: u32,
  /// Run `all` on the rayon pool.
  pub parallel: bool,
}

impl Default for PortfolioConfig {
  fn default() -> Self {
    Self {
      frequency: TRADING_DAYS,
      risk_free_rate: 0.0,
      tau: DEFAULT_TAU,
      risk_aversion: DEFAULT_RISK_AVERSION,
      fallback_target_volatility: 0.30,
      target_return_factor: 0.75,
      risk_tolerance_covariance: CovarianceKind::LedoitWolf,
      mean_variance_mode: MeanVarianceMode::MinVolatility,
      max_iterations: 1000,
      weight_cutoff: 1e-4,
      weight_decimals: 5,
      parallel: true,
    }
  }
}

impl PortfolioConfig {
  pub fn validate(&self) -> Result<()> {
    let invalid = |msg: &str| Err(PortfolioError::validation(msg));

    if self.frequency == 0 {
      return invalid("frequency must be positive");
    }
    if !self.risk_free_rate.is_finite() {
      return invalid("risk-free rate must be finite");
    }
    if !(self.tau.is_finite() && self.tau > 0.0) {
      return invalid("tau must be positive");
    }
    if !(self.risk_aversion.is_finite() && self.risk_aversion > 0.0) {
      return invalid("risk aversion must be positive");
    }
    if !(self.fallback_target_volatility.is_finite() && self.fallback_target_volatility > 0.0) {
      return invalid("fallback target volatility must be positive");
    }
    if !(self.target_return_factor.is_finite() && (0.0..=1.0).contains(&self.target_return_factor))
    {
      return invalid("target return factor must lie in [0, 1]");
    }
    if self.max_iterations == 0 {
      return invalid("max iterations must be positive");
    }
    if !(self.weight_cutoff.is_finite() && self.weight_cutoff >= 0.0) {
      return invalid("weight cutoff must be non-negative");
    }
    Ok(())
  }
}
