//! # Traits
//!
//! $$
//! \mathcal{A}:\ (P,\ V,\ \rho)\ \mapsto\ \mathbf{w}
//! $$
//!
//! Contract implemented by every allocation strategy.

use crate::error::Result;
use crate::portfolio::black_litterman::BlackLittermanStrategy;
use crate::portfolio::config::PortfolioConfig;
use crate::portfolio::hrp::HrpStrategy;
use crate::portfolio::mean_variance::MeanVarianceStrategy;
use crate::portfolio::risk_tolerance::RiskToleranceStrategy;
use crate::portfolio::types::AllocationRequest;
use crate::portfolio::types::OptimizedPortfolio;
use crate::portfolio::types::Strategy;

/// An allocation strategy reads the request and produces one named portfolio.
///
/// Implementations must not mutate shared state; the orchestrator may run them
/// concurrently against the same request.
pub trait AllocationStrategy: Send + Sync {
  fn strategy(&self) -> Strategy;

  fn allocate(
    &self,
    request: &AllocationRequest,
    config: &PortfolioConfig,
  ) -> Result<OptimizedPortfolio>;
}

impl Strategy {
  /// The implementation behind this tag.
  pub fn allocator(self) -> &'static dyn AllocationStrategy {
    match self {
      Strategy::MeanVariance => &MeanVarianceStrategy,
      Strategy::BlackLitterman => &BlackLittermanStrategy,
      Strategy::Hrp => &HrpStrategy,
      Strategy::RiskTolerance => &RiskToleranceStrategy,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_tag_maps_to_its_implementation() {
    for s in Strategy::ALL {
      assert_eq!(s.allocator().strategy(), s);
    }
  }
}
