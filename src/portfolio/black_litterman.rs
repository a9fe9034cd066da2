//! # Black-Litterman
//!
//! $$
//! \pi=\delta\Sigma\mathbf{w}_{mkt}+r_f,\qquad
//! M=\left[(\tau\Sigma)^{-1}+P^\top\Omega^{-1}P\right]^{-1}
//! $$
//!
//! $$
//! \mu_{post}=M\left[(\tau\Sigma)^{-1}\pi+P^\top\Omega^{-1}Q\right],\qquad
//! \Sigma_{post}=\Sigma+M
//! $$
//!
//! Market-implied prior fused with absolute views. `P` selects one instrument per view
//! and `Ω = τ·diag(PΣPᵀ)`. Without any applicable view the posterior is the prior itself.

use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::config::PortfolioConfig;
use super::estimators::CovarianceEstimator;
use super::estimators::ExpectedReturns;
use super::matrix::spd_inverse;
use super::matrix::CovarianceMatrix;
use super::mean_variance::MeanVarianceOptimizer;
use super::risk_tolerance::RiskTolerance;
use super::types::Allocation;
use super::types::AllocationRequest;
use super::types::OptimizedPortfolio;
use super::types::SolvePath;
use super::types::Strategy;
use super::types::Weights;
use super::views::ViewSet;
use crate::error::ErrorKind;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::traits::AllocationStrategy;

/// Default prior confidence.
pub const DEFAULT_TAU: f64 = 0.05;
/// Default risk-aversion coefficient when no risk tolerance is given.
pub const DEFAULT_RISK_AVERSION: f64 = 2.0;
/// Risk tolerances below this are clamped before inverting into `δ`.
const MIN_RISK_TOLERANCE: f64 = 0.01;

/// Prior and posterior moments.
#[derive(Clone, Debug)]
pub struct Posterior {
  /// Market-implied returns `π`.
  pub prior: ExpectedReturns,
  pub returns: ExpectedReturns,
  pub covariance: CovarianceMatrix,
  /// Number of views that matched a known symbol.
  pub views_applied: usize,
}

#[derive(Clone, Debug)]
pub struct BlackLittermanFuser<'a> {
  cov: &'a CovarianceMatrix,
  tau: f64,
  risk_aversion: f64,
  risk_free_rate: f64,
  market_weights: Option<&'a Weights>,
  max_iterations: usize,
}

impl<'a> BlackLittermanFuser<'a> {
  pub fn new(cov: &'a CovarianceMatrix) -> Self {
    Self {
      cov,
      tau: DEFAULT_TAU,
      risk_aversion: DEFAULT_RISK_AVERSION,
      risk_free_rate: 0.0,
      market_weights: None,
      max_iterations: 1000,
    }
  }

  pub fn with_tau(mut self, tau: f64) -> Self {
    self.tau = tau;
    self
  }

  pub fn with_risk_aversion(mut self, delta: f64) -> Self {
    self.risk_aversion = delta;
    self
  }

  /// `δ = 1 / rt`, with `rt` floored at 0.01.
  pub fn with_risk_tolerance(mut self, risk_tolerance: RiskTolerance) -> Self {
    self.risk_aversion = 1.0 / risk_tolerance.value().max(MIN_RISK_TOLERANCE);
    self
  }

  pub fn with_risk_free_rate(mut self, risk_free_rate: f64) -> Self {
    self.risk_free_rate = risk_free_rate;
    self
  }

  /// Market-capitalization weights; equal weights are used otherwise.
  pub fn with_market_weights(mut self, weights: &'a Weights) -> Self {
    self.market_weights = Some(weights);
    self
  }

  pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
    self.max_iterations = max_iterations;
    self
  }

  pub fn risk_aversion(&self) -> f64 {
    self.risk_aversion
  }

  fn market_weights(&self) -> Result<DVector<f64>> {
    let n = self.cov.len();
    let Some(weights) = self.market_weights else {
      return Ok(DVector::from_element(n, 1.0 / n as f64));
    };

    let w = weights.to_vector(self.cov.symbols());
    if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
      return Err(PortfolioError::validation(
        "market weights must be finite and non-negative",
      ));
    }
    let total = w.sum();
    if total <= 0.0 {
      return Err(PortfolioError::validation(
        "market weights do not cover any instrument",
      ));
    }
    Ok(w / total)
  }

  /// CAPM-implied equilibrium returns `π = δΣw_mkt + r_f`.
  pub fn implied_prior(&self) -> Result<ExpectedReturns> {
    if !(self.risk_aversion.is_finite() && self.risk_aversion > 0.0) {
      return Err(PortfolioError::validation(
        "risk aversion must be positive",
      ));
    }

    let w = self.market_weights()?;
    let pi = (self.cov.values() * w) * self.risk_aversion
      + DVector::from_element(self.cov.len(), self.risk_free_rate);
    ExpectedReturns::new(self.cov.symbols().to_vec(), pi)
  }

  /// Fuse the prior with `views`. `None` and an empty set both return the prior unchanged.
  pub fn posterior(&self, views: Option<&ViewSet>) -> Result<Posterior> {
    if !(self.tau.is_finite() && self.tau > 0.0) {
      return Err(PortfolioError::validation("tau must be positive"));
    }

    let prior = self.implied_prior()?;
    let symbols = self.cov.symbols();

    let applicable: Vec<(usize, f64)> = views
      .into_iter()
      .flat_map(|v| v.iter())
      .filter_map(|(symbol, &q)| match symbols.iter().position(|s| s == symbol) {
        Some(i) => Some((i, q)),
        None => {
          warn!(symbol = %symbol, "ignoring view on a symbol outside the universe");
          None
        }
      })
      .collect();

    if applicable.is_empty() {
      debug!("no applicable views, posterior equals the implied prior");
      return Ok(Posterior {
        returns: prior.clone(),
        prior,
        covariance: self.cov.clone(),
        views_applied: 0,
      });
    }

    let n = symbols.len();
    let k = applicable.len();
    let sigma = self.cov.values();

    let mut p = DMatrix::zeros(k, n);
    let mut q = DVector::zeros(k);
    let mut omega_inv = DMatrix::zeros(k, k);
    for (row, &(i, view)) in applicable.iter().enumerate() {
      p[(row, i)] = 1.0;
      q[row] = view;
      let omega = self.tau * sigma[(i, i)];
      if omega <= 0.0 {
        return Err(PortfolioError::numerical(format!(
          "view on `{}` has zero uncertainty (instrument has no variance)",
          symbols[i]
        )));
      }
      omega_inv[(row, row)] = 1.0 / omega;
    }

    let tau_sigma_inv = spd_inverse(&(sigma * self.tau))?;
    let pt_omega_inv = p.transpose() * &omega_inv;
    let m = spd_inverse(&(&tau_sigma_inv + &pt_omega_inv * &p))?;

    let mu_post = &m * (&tau_sigma_inv * prior.values() + &pt_omega_inv * &q);
    let sigma_post = sigma + &m;

    info!(views = k, tau = self.tau, "black-litterman posterior");

    Ok(Posterior {
      returns: ExpectedReturns::new(symbols.to_vec(), mu_post)?,
      covariance: CovarianceMatrix::new(symbols.to_vec(), sigma_post)?,
      prior,
      views_applied: k,
    })
  }

  fn optimizer<'p>(&self, posterior: &'p Posterior) -> Result<MeanVarianceOptimizer<'p>> {
    Ok(
      MeanVarianceOptimizer::new(&posterior.returns, &posterior.covariance)?
        .with_risk_free_rate(self.risk_free_rate)
        .with_max_iterations(self.max_iterations),
    )
  }

  /// Maximum-Sharpe portfolio on the posterior.
  pub fn solve_max_sharpe(&self, posterior: &Posterior) -> Result<Allocation> {
    self.optimizer(posterior)?.max_sharpe()
  }

  /// Highest-return posterior portfolio at `target_volatility`.
  pub fn solve_efficient_risk(
    &self,
    posterior: &Posterior,
    target_volatility: f64,
  ) -> Result<Allocation> {
    self.optimizer(posterior)?.efficient_risk(target_volatility)
  }

  /// Max-Sharpe, then exactly one efficient-risk attempt if that solve is infeasible
  /// or does not converge. Estimation errors are returned as-is.
  pub fn solve(
    &self,
    posterior: &Posterior,
    fallback_target_volatility: f64,
  ) -> Result<(Allocation, SolvePath)> {
    match self.solve_max_sharpe(posterior) {
      Ok(allocation) => Ok((allocation, SolvePath::MaxSharpe)),
      Err(e) if e.kind() == ErrorKind::Optimization => {
        warn!(
          error = %e,
          target_volatility = fallback_target_volatility,
          "max-sharpe solve failed, falling back to efficient risk"
        );
        let allocation = self.solve_efficient_risk(posterior, fallback_target_volatility)?;
        Ok((
          allocation,
          SolvePath::EfficientRiskFallback {
            target_volatility: fallback_target_volatility,
            reason: e.to_string(),
          },
        ))
      }
      Err(e) => Err(e),
    }
  }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BlackLittermanStrategy;

impl AllocationStrategy for BlackLittermanStrategy {
  fn strategy(&self) -> Strategy {
    Strategy::BlackLitterman
  }

  fn allocate(
    &self,
    request: &AllocationRequest,
    config: &PortfolioConfig,
  ) -> Result<OptimizedPortfolio> {
    let cov = CovarianceEstimator::new(config.frequency).ledoit_wolf(&request.prices)?;

    let mut fuser = BlackLittermanFuser::new(&cov.matrix)
      .with_tau(config.tau)
      .with_risk_aversion(config.risk_aversion)
      .with_risk_free_rate(config.risk_free_rate)
      .with_max_iterations(config.max_iterations);
    if let Some(rt) = request.risk_tolerance {
      fuser = fuser.with_risk_tolerance(rt);
    }
    if let Some(w) = request.market_weights.as_ref() {
      fuser = fuser.with_market_weights(w);
    }

    let posterior = fuser.posterior(request.views.as_ref())?;
    let (allocation, path) = fuser.solve(&posterior, config.fallback_target_volatility)?;

    OptimizedPortfolio::new(self.strategy().tag(), allocation, Some(path))
  }
}
