//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\*_s = \operatorname{Optimize}_s(P, V, \rho),\qquad s\in\mathcal S
//! $$
//!
//! Dispatches an allocation request to one or every strategy and hands results to a store.

use rayon::prelude::*;
use tracing::info;
use tracing::warn;

use super::config::PortfolioConfig;
use super::store::PortfolioStore;
use super::types::AllocationRequest;
use super::types::OptimizedPortfolio;
use super::types::Strategy;
use super::types::StrategySelection;
use crate::error::Result;
use crate::error::StoreError;

/// Outcome of one strategy within a run. Failures stay attributed to their strategy.
#[derive(Clone, Debug, PartialEq)]
pub struct StrategyRun {
  pub strategy: Strategy,
  pub result: Result<OptimizedPortfolio>,
}

impl StrategyRun {
  pub fn portfolio(&self) -> Option<&OptimizedPortfolio> {
    self.result.as_ref().ok()
  }

  pub fn is_ok(&self) -> bool {
    self.result.is_ok()
  }
}

/// Entry point for allocation requests.
#[derive(Clone, Debug, Default)]
pub struct PortfolioOptimizer {
  config: PortfolioConfig,
}

impl PortfolioOptimizer {
  pub fn new(config: PortfolioConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self { config })
  }

  pub fn config(&self) -> &PortfolioConfig {
    &self.config
  }

  /// Run a single strategy.
  pub fn optimize(
    &self,
    strategy: Strategy,
    request: &AllocationRequest,
  ) -> Result<OptimizedPortfolio> {
    strategy.allocator().allocate(request, &self.config)
  }

  /// Run the selected strategies. Results are in [`Strategy::ALL`] order regardless of
  /// completion order, and one strategy failing never prevents the others from running.
  pub fn run(&self, selection: StrategySelection, request: &AllocationRequest) -> Vec<StrategyRun> {
    let strategies = selection.strategies();
    let run_one = |&strategy: &Strategy| {
      let result = self.optimize(strategy, request);
      match &result {
        Ok(p) => info!(
          strategy = %strategy,
          expected_return = p.expected_return(),
          volatility = p.volatility(),
          sharpe_ratio = p.sharpe_ratio(),
          "strategy finished"
        ),
        Err(e) => warn!(strategy = %strategy, error = %e, "strategy failed"),
      }
      StrategyRun { strategy, result }
    };

    if self.config.parallel && strategies.len() > 1 {
      strategies.par_iter().map(run_one).collect()
    } else {
      strategies.iter().map(run_one).collect()
    }
  }

  /// Parse `tag` (a strategy tag or `all`) and run it.
  pub fn optimize_tag(&self, tag: &str, request: &AllocationRequest) -> Result<Vec<StrategyRun>> {
    let selection: StrategySelection = tag.parse()?;
    Ok(self.run(selection, request))
  }

  /// Persist every successful portfolio of a run. Returns how many were saved.
  pub fn save_all<S: PortfolioStore + ?Sized>(
    &self,
    store: &S,
    runs: &[StrategyRun],
  ) -> Result<usize, StoreError> {
    let mut saved = 0;
    for portfolio in runs.iter().filter_map(StrategyRun::portfolio) {
      store.save(portfolio)?;
      saved += 1;
    }
    Ok(saved)
  }

  /// Load stored results for `tag`: one strategy's portfolio, or every stored portfolio for `all`.
  pub fn load<S: PortfolioStore + ?Sized>(
    &self,
    store: &S,
    tag: &str,
  ) -> Result<Vec<OptimizedPortfolio>, StoreError> {
    match tag.parse::<StrategySelection>()? {
      StrategySelection::All => store.load_all(),
      StrategySelection::One(strategy) => Ok(store.load(strategy.tag())?.into_iter().collect()),
    }
  }
}
