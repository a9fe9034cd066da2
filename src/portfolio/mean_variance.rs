//! # Mean-Variance Optimization
//!
//! $$
//! \min_{\mathbf{w}}\ \mathbf{w}^\top\Sigma\mathbf{w}
//! \quad\text{s.t.}\quad \mathbf{1}^\top\mathbf{w}=1,\ \mathbf{w}\ge 0\ [,\ \mu^\top\mathbf{w}=r^\*]
//! $$
//!
//! Long-only efficient frontier solves: minimum volatility, target return,
//! maximum Sharpe ratio and target volatility.

use std::cell::RefCell;

use nalgebra::DMatrix;
use nalgebra::DVector;
use roots::SimpleConvergency;
use roots::find_root_brent;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::trace;

use super::config::PortfolioConfig;
use super::estimators::CovarianceEstimator;
use super::estimators::ExpectedReturns;
use super::estimators::ReturnsEstimator;
use super::matrix::CovarianceMatrix;
use super::types::Allocation;
use super::types::AllocationRequest;
use super::types::OptimizedPortfolio;
use super::types::Performance;
use super::types::SolvePath;
use super::types::Strategy;
use super::types::Weights;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::traits::AllocationStrategy;

/// Returns closer than this are treated as equal.
const RETURN_TOL: f64 = 1e-12;

/// Gap and feasibility tolerance handed to the interior-point solver.
const SOLVER_TOL: f64 = 1e-9;

/// Objective of a mean-variance solve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeanVarianceMode {
  /// Global minimum-variance long-only portfolio.
  MinVolatility,
  /// Minimum variance with `μᵀw` pinned to the target.
  TargetReturn(f64),
}

impl Default for MeanVarianceMode {
  fn default() -> Self {
    Self::MinVolatility
  }
}

/// Long-only, fully invested mean-variance optimizer.
#[derive(Clone, Debug)]
pub struct MeanVarianceOptimizer<'a> {
  mu: &'a ExpectedReturns,
  cov: &'a CovarianceMatrix,
  risk_free_rate: f64,
  max_iterations: u32,
}

impl<'a> MeanVarianceOptimizer<'a> {
  /// Both inputs must be indexed by the same symbols in the same order.
  pub fn new(mu: &'a ExpectedReturns, cov: &'a CovarianceMatrix) -> Result<Self> {
    if mu.symbols() != cov.symbols() {
      return Err(PortfolioError::validation(
        "expected returns and covariance are indexed by different symbols",
      ));
    }

    Ok(Self {
      mu,
      cov,
      risk_free_rate: 0.0,
      max_iterations: 1000,
    })
  }

  pub fn with_risk_free_rate(mut self, risk_free_rate: f64) -> Self {
    self.risk_free_rate = risk_free_rate;
    self
  }

  /// Interior-point iteration cap for every solve.
  pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
    self.max_iterations = u32::try_from(max_iterations).unwrap_or(u32::MAX);
    self
  }

  fn n(&self) -> usize {
    self.mu.len()
  }

  pub fn optimize(&self, mode: MeanVarianceMode) -> Result<Allocation> {
    match mode {
      MeanVarianceMode::MinVolatility => self.min_volatility(),
      MeanVarianceMode::TargetReturn(target) => self.efficient_return(target),
    }
  }

  /// Realized performance of `w` under this optimizer's inputs.
  pub fn performance(&self, w: &DVector<f64>) -> Performance {
    Performance::compute(w, self.mu, self.cov, self.risk_free_rate)
  }

  fn allocation(&self, w: DVector<f64>) -> Allocation {
    Allocation {
      performance: self.performance(&w),
      weights: Weights::from_vector(self.mu.symbols(), &w),
    }
  }

  /// `min xᵀΣx` subject to `rows · x = rhs` and `x ≥ 0`.
  ///
  /// The equality rows go into a zero cone and `-I` into a non-negative cone,
  /// so the solver sees `A = [rows; -I]`, `b = [rhs; 0]`.
  fn solve_long_only(
    &self,
    sigma: &DMatrix<f64>,
    rows: &DMatrix<f64>,
    rhs: &[f64],
  ) -> Result<DVector<f64>> {
    use clarabel::algebra::*;
    use clarabel::solver::*;

    let n = sigma.ncols();
    let m = rows.nrows();

    // Upper triangle of Σ, column by column.
    let mut p_colptr = vec![0];
    let mut p_rowval = Vec::new();
    let mut p_nzval = Vec::new();
    for j in 0..n {
      for i in 0..=j {
        let v = sigma[(i, j)];
        if v != 0.0 {
          p_rowval.push(i);
          p_nzval.push(v);
        }
      }
      p_colptr.push(p_nzval.len());
    }
    let p = CscMatrix::new(n, n, p_colptr, p_rowval, p_nzval);
    let q = vec![0.0; n];

    let mut a_colptr = vec![0];
    let mut a_rowval = Vec::new();
    let mut a_nzval = Vec::new();
    for j in 0..n {
      for i in 0..m {
        let v = rows[(i, j)];
        if v != 0.0 {
          a_rowval.push(i);
          a_nzval.push(v);
        }
      }
      a_rowval.push(m + j);
      a_nzval.push(-1.0);
      a_colptr.push(a_nzval.len());
    }
    let a = CscMatrix::new(m + n, n, a_colptr, a_rowval, a_nzval);

    let mut b = rhs.to_vec();
    b.resize(m + n, 0.0);
    let cones = [ZeroConeT(m), NonnegativeConeT(n)];

    let settings = DefaultSettingsBuilder::default()
      .max_iter(self.max_iterations)
      .tol_gap_abs(SOLVER_TOL)
      .tol_gap_rel(SOLVER_TOL)
      .tol_feas(SOLVER_TOL)
      .verbose(false)
      .build()
      .map_err(|e| PortfolioError::validation(format!("invalid solver settings: {e}")))?;

    let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings)
      .map_err(|e| PortfolioError::infeasible(format!("solver rejected the problem: {e:?}")))?;
    solver.solve();

    let iterations = solver.solution.iterations as usize;
    match solver.solution.status {
      SolverStatus::Solved | SolverStatus::AlmostSolved => {
        trace!(iterations, status = ?solver.solution.status, "quadratic program solved");
        Ok(DVector::from_iterator(
          n,
          solver.solution.x.iter().map(|&v| v.max(0.0)),
        ))
      }
      SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => Err(
        PortfolioError::infeasible("constraints admit no long-only portfolio"),
      ),
      SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => Err(
        PortfolioError::infeasible("objective is unbounded on the feasible set"),
      ),
      status => {
        debug!(?status, iterations, "quadratic program did not converge");
        Err(PortfolioError::NotConverged { iterations })
      }
    }
  }

  /// Minimum variance over the instruments in `members`, fully invested.
  fn min_volatility_over(&self, members: &[usize]) -> Result<DVector<f64>> {
    let n = self.n();
    let sigma = self.cov.values();
    let mut w = DVector::zeros(n);

    if let [only] = members {
      w[*only] = 1.0;
      return Ok(w);
    }

    let sub = sigma.select_rows(members).select_columns(members);
    let budget = DMatrix::from_element(1, members.len(), 1.0);
    let x = self.solve_long_only(&sub, &budget, &[1.0])?;
    for (k, &i) in members.iter().enumerate() {
      w[i] = x[k];
    }
    Ok(normalized(w))
  }

  /// Global minimum-volatility portfolio.
  pub fn min_volatility(&self) -> Result<Allocation> {
    let members: Vec<usize> = (0..self.n()).collect();
    let w = self.min_volatility_over(&members)?;
    debug!("min-volatility solve");
    Ok(self.allocation(w))
  }

  /// Minimum-volatility portfolio whose expected return equals `target_return`.
  ///
  /// Long-only weights can only reach returns between the smallest and largest
  /// single-instrument expected return; anything outside is infeasible. At either
  /// end of that range only the instruments sitting on it can be held.
  pub fn efficient_return(&self, target_return: f64) -> Result<Allocation> {
    if !target_return.is_finite() {
      return Err(PortfolioError::validation("target return must be finite"));
    }

    let n = self.n();
    let mu = self.mu.values();
    let (lo, hi) = (self.mu.min(), self.mu.max());

    if target_return > hi + RETURN_TOL || target_return < lo - RETURN_TOL {
      return Err(PortfolioError::infeasible(format!(
        "target return {target_return:.6} is outside the achievable range [{lo:.6}, {hi:.6}]"
      )));
    }

    if hi - lo <= RETURN_TOL {
      // Every portfolio has the same expected return, the constraint is redundant.
      return self.min_volatility();
    }

    let target = target_return.clamp(lo, hi);
    let edge = if target >= hi - RETURN_TOL {
      Some(hi)
    } else if target <= lo + RETURN_TOL {
      Some(lo)
    } else {
      None
    };

    let w = match edge {
      Some(end) => {
        let members: Vec<usize> = (0..n).filter(|&i| (mu[i] - end).abs() <= RETURN_TOL).collect();
        self.min_volatility_over(&members)?
      }
      None => {
        let mut rows = DMatrix::zeros(2, n);
        rows.row_mut(0).fill(1.0);
        rows.row_mut(1).copy_from(&mu.transpose());
        normalized(self.solve_long_only(self.cov.values(), &rows, &[1.0, target])?)
      }
    };

    debug!(target_return = target, "efficient-return solve");
    Ok(self.allocation(w))
  }

  /// Tangency (maximum Sharpe ratio) portfolio.
  ///
  /// Solved in the homogenised form `min yᵀΣy` s.t. `(μ - r_f)ᵀy = 1`, `y ≥ 0`,
  /// then `w = y / Σy`.
  pub fn max_sharpe(&self) -> Result<Allocation> {
    let n = self.n();
    let excess = self.mu.values().map(|m| m - self.risk_free_rate);

    if excess.max() <= 0.0 {
      return Err(PortfolioError::infeasible(format!(
        "no instrument has an expected return above the risk-free rate {:.6}",
        self.risk_free_rate
      )));
    }

    let rows = DMatrix::from_row_slice(1, n, excess.as_slice());
    let y = self.solve_long_only(self.cov.values(), &rows, &[1.0])?;
    let total = y.sum();
    if !(total.is_finite() && total > 0.0) {
      return Err(PortfolioError::infeasible("max-Sharpe solution holds no weight"));
    }

    debug!("max-sharpe solve");
    Ok(self.allocation(y / total))
  }

  /// Highest-return portfolio whose volatility does not exceed `target_volatility`.
  ///
  /// The long-only frontier volatility grows monotonically with the target return
  /// above the minimum-volatility point, so the matching return is found by Brent
  /// root finding over [`Self::efficient_return`].
  pub fn efficient_risk(&self, target_volatility: f64) -> Result<Allocation> {
    if !(target_volatility.is_finite() && target_volatility > 0.0) {
      return Err(PortfolioError::validation(
        "target volatility must be positive",
      ));
    }

    let floor = self.min_volatility()?;
    if floor.performance.volatility > target_volatility + 1e-12 {
      return Err(PortfolioError::infeasible(format!(
        "minimum achievable volatility {:.6} exceeds target {target_volatility:.6}",
        floor.performance.volatility
      )));
    }
    if floor.performance.volatility >= target_volatility - 1e-9 {
      return Ok(floor);
    }

    let hi_return = self.mu.max();
    let ceiling = self.efficient_return(hi_return)?;
    if ceiling.performance.volatility <= target_volatility {
      return Ok(ceiling);
    }

    let lo_return = floor.performance.expected_return.min(hi_return);
    let failure = RefCell::new(None);
    let f = |r: f64| match self.efficient_return(r) {
      Ok(a) => a.performance.volatility - target_volatility,
      Err(e) => {
        failure.borrow_mut().get_or_insert(e);
        0.0
      }
    };

    let mut convergency = SimpleConvergency {
      eps: 1e-10,
      max_iter: 100,
    };
    let root = find_root_brent(lo_return, hi_return, f, &mut convergency);

    if let Some(e) = failure.into_inner() {
      return Err(e);
    }
    let target_return =
      root.map_err(|_| PortfolioError::NotConverged { iterations: 100 })?;

    debug!(target_volatility, target_return, "efficient-risk solve");
    self.efficient_return(target_return)
  }
}

/// Clip round-off below zero and rescale onto the budget.
fn normalized(w: DVector<f64>) -> DVector<f64> {
  let w = w.map(|v| v.max(0.0));
  let total = w.sum();
  if total > 0.0 { w / total } else { w }
}

/// Mean-variance strategy on mean historical returns and Ledoit-Wolf covariance.
#[derive(Clone, Copy, Debug, Default)]
pub struct MeanVarianceStrategy;

impl AllocationStrategy for MeanVarianceStrategy {
  fn strategy(&self) -> Strategy {
    Strategy::MeanVariance
  }

  fn allocate(
    &self,
    request: &AllocationRequest,
    config: &PortfolioConfig,
  ) -> Result<OptimizedPortfolio> {
    let mu = ReturnsEstimator::new(config.frequency).estimate(&request.prices)?;
    let cov = CovarianceEstimator::new(config.frequency).ledoit_wolf(&request.prices)?;

    let optimizer = MeanVarianceOptimizer::new(&mu, &cov.matrix)?
      .with_risk_free_rate(config.risk_free_rate)
      .with_max_iterations(config.max_iterations);

    let allocation = optimizer.optimize(config.mean_variance_mode)?;
    let path = match config.mean_variance_mode {
      MeanVarianceMode::MinVolatility => SolvePath::MinVolatility,
      MeanVarianceMode::TargetReturn(target_return) => SolvePath::EfficientReturn { target_return },
    };

    OptimizedPortfolio::new(self.strategy().tag(), allocation, Some(path))
  }
}
