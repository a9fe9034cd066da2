//! # Hierarchical Risk Parity
//!
//! $$
//! d_{ij}=\sqrt{\tfrac12\,(1-\rho_{ij})},\qquad
//! \alpha=1-\frac{V_L}{V_L+V_R}
//! $$
//!
//! Single-linkage clustering on correlation distance, quasi-diagonal ordering of the
//! dendrogram leaves and recursive bisection with inverse-variance cluster risk.
//! No matrix is inverted.
//!
//! Ties between equal distances and the left/right order of merged clusters are broken
//! by the smallest symbol in each cluster, so the weights do not depend on the order
//! in which instruments are supplied.

use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::config::PortfolioConfig;
use super::data::correlation_matrix;
use super::data::PriceSeries;
use super::data::ReturnsFrame;
use super::estimators::sample_covariance;
use super::estimators::ExpectedReturns;
use super::estimators::TRADING_DAYS;
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

/// One agglomeration step. Leaves are `0..n`; the cluster formed at step `k` is `n + k`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Merge {
  pub left: usize,
  pub right: usize,
  pub distance: f64,
  pub size: usize,
}

/// HRP weights together with the clustering that produced them.
#[derive(Clone, Debug)]
pub struct HrpAllocation {
  pub allocation: Allocation,
  /// Instrument symbols in quasi-diagonal order.
  pub order: Vec<String>,
  pub linkage: Vec<Merge>,
}

#[derive(Clone, Copy, Debug)]
pub struct HierarchicalRiskParityOptimizer {
  frequency: usize,
  risk_free_rate: f64,
}

impl Default for HierarchicalRiskParityOptimizer {
  fn default() -> Self {
    Self {
      frequency: TRADING_DAYS,
      risk_free_rate: 0.0,
    }
  }
}

impl HierarchicalRiskParityOptimizer {
  pub fn new(frequency: usize, risk_free_rate: f64) -> Self {
    Self {
      frequency,
      risk_free_rate,
    }
  }

  pub fn optimize(&self, prices: &PriceSeries) -> Result<HrpAllocation> {
    self.optimize_frame(&prices.returns_frame())
  }

  /// Allocate over a complete percentage-return frame.
  pub fn optimize_frame(&self, frame: &ReturnsFrame) -> Result<HrpAllocation> {
    let n = frame.n_instruments();
    if n < 2 {
      return Err(PortfolioError::data(format!(
        "hierarchical risk parity needs at least 2 instruments with returns, got {n}"
      )));
    }
    if frame.n_periods() < 2 {
      return Err(PortfolioError::data(format!(
        "hierarchical risk parity needs at least 2 complete return periods, got {}",
        frame.n_periods()
      )));
    }

    let symbols = frame.symbols();
    let returns = frame.matrix();
    let dist = correlation_matrix(&returns).map(|c| ((1.0 - c) / 2.0).clamp(0.0, 1.0).sqrt());

    let linkage = single_linkage(&dist, symbols);
    let order = quasi_diagonal_order(&linkage, n);

    let cov = sample_covariance(frame, self.frequency)?;
    let w = bisection_weights(&order, cov.values());
    let w = &w / w.sum();

    let f = self.frequency as f64;
    let mu = ExpectedReturns::new(
      symbols.to_vec(),
      DVector::from_iterator(n, returns.column_iter().map(|c| c.mean() * f)),
    )?;

    debug!(instruments = n, periods = frame.n_periods(), "hrp allocation");

    Ok(HrpAllocation {
      allocation: Allocation {
        performance: Performance::compute(&w, &mu, &cov, self.risk_free_rate),
        weights: Weights::from_vector(symbols, &w),
      },
      order: order.iter().map(|&i| symbols[i].clone()).collect(),
      linkage,
    })
  }
}

/// Single-linkage agglomeration with deterministic, symbol-based tie breaking.
fn single_linkage(dist: &DMatrix<f64>, symbols: &[String]) -> Vec<Merge> {
  let n = dist.nrows();
  let mut d = dist.clone();
  let mut active = vec![true; n];
  let mut node_id: Vec<usize> = (0..n).collect();
  let mut size = vec![1usize; n];
  // Smallest symbol in each slot's cluster. Slot `a` keeps its key when it absorbs `b`.
  let key: Vec<&str> = symbols.iter().map(String::as_str).collect();
  let mut merges = Vec::with_capacity(n.saturating_sub(1));

  for step in 0..n.saturating_sub(1) {
    let live: Vec<usize> = (0..n).filter(|&i| active[i]).collect();
    let best = live
      .iter()
      .enumerate()
      .flat_map(|(k, &i)| live[k + 1..].iter().map(move |&j| (i, j)))
      .map(|(i, j)| if key[i] <= key[j] { (i, j) } else { (j, i) })
      .min_by(|&(a, b), &(c, e)| {
        d[(a, b)]
          .total_cmp(&d[(c, e)])
          .then_with(|| key[a].cmp(key[c]))
          .then_with(|| key[b].cmp(key[e]))
      });

    let Some((a, b)) = best else {
      break;
    };

    merges.push(Merge {
      left: node_id[a],
      right: node_id[b],
      distance: d[(a, b)],
      size: size[a] + size[b],
    });

    node_id[a] = n + step;
    size[a] += size[b];
    active[b] = false;

    let merged = d.column(a).zip_map(&d.column(b), f64::min);
    d.set_column(a, &merged);
    d.set_row(a, &merged.transpose());
  }

  merges
}

/// Dendrogram leaves, left child first.
fn quasi_diagonal_order(linkage: &[Merge], n: usize) -> Vec<usize> {
  if linkage.is_empty() {
    return (0..n).collect();
  }

  let mut order = Vec::with_capacity(n);
  let mut pending = vec![n + linkage.len() - 1];
  while let Some(node) = pending.pop() {
    match node.checked_sub(n) {
      None => order.push(node),
      Some(k) => {
        pending.push(linkage[k].right);
        pending.push(linkage[k].left);
      }
    }
  }
  order
}

/// Unnormalised HRP weights: every split of `order` hands `1 - V_L/(V_L+V_R)` to the left half.
fn bisection_weights(order: &[usize], cov: &DMatrix<f64>) -> DVector<f64> {
  let mut w = DVector::from_element(cov.nrows(), 1.0);
  let mut pending = vec![order];

  while let Some(cluster) = pending.pop() {
    if cluster.len() < 2 {
      continue;
    }
    let (left, right) = cluster.split_at(cluster.len() / 2);
    let (var_left, var_right) = (cluster_variance(left, cov), cluster_variance(right, cov));

    let denom = var_left + var_right;
    let alpha = if denom > 1e-30 {
      1.0 - var_left / denom
    } else {
      0.5
    };

    for &i in left {
      w[i] *= alpha;
    }
    for &i in right {
      w[i] *= 1.0 - alpha;
    }
    pending.push(right);
    pending.push(left);
  }

  w
}

/// Variance of the inverse-variance portfolio of a cluster.
fn cluster_variance(indices: &[usize], cov: &DMatrix<f64>) -> f64 {
  let sub = cov.select_rows(indices).select_columns(indices);
  let ivp = sub.diagonal().map(|v| if v > 1e-15 { 1.0 / v } else { 0.0 });
  let total = ivp.sum();
  if total < 1e-15 {
    return 0.0;
  }

  let w = ivp / total;
  w.dot(&(&sub * &w))
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HrpStrategy;

impl AllocationStrategy for HrpStrategy {
  fn strategy(&self) -> Strategy {
    Strategy::Hrp
  }

  fn allocate(
    &self,
    request: &AllocationRequest,
    config: &PortfolioConfig,
  ) -> Result<OptimizedPortfolio> {
    let hrp = HierarchicalRiskParityOptimizer::new(config.frequency, config.risk_free_rate)
      .optimize(&request.prices)?;
    OptimizedPortfolio::new(
      self.strategy().tag(),
      hrp.allocation,
      Some(SolvePath::RecursiveBisection),
    )
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::portfolio::fixtures::scenario_prices;
  use crate::portfolio::fixtures::synthetic_prices;

  fn reversed(prices: &PriceSeries) -> PriceSeries {
    let symbols: Vec<&str> = prices.symbols().iter().rev().map(String::as_str).collect();
    prices.select(&symbols).unwrap()
  }

  #[test]
  fn weights_are_long_only_and_fully_invested() {
    let hrp = HierarchicalRiskParityOptimizer::default()
      .optimize(&synthetic_prices(90, 6))
      .unwrap();

    assert_abs_diff_eq!(hrp.allocation.weights.sum(), 1.0, epsilon = 1e-12);
    assert!(hrp.allocation.weights.iter().all(|(_, &w)| w > 0.0));
    assert_eq!(hrp.order.len(), 6);
    assert_eq!(hrp.linkage.len(), 5);
    assert_eq!(hrp.linkage.last().unwrap().size, 6);
  }

  #[test]
  fn weights_do_not_depend_on_instrument_order() {
    let prices = synthetic_prices(90, 7);
    let a = HierarchicalRiskParityOptimizer::default()
      .optimize(&prices)
      .unwrap();
    let b = HierarchicalRiskParityOptimizer::default()
      .optimize(&reversed(&prices))
      .unwrap();

    assert_eq!(a.order, b.order);
    for (symbol, w) in a.allocation.weights.iter() {
      assert_abs_diff_eq!(*w, b.allocation.weights.get(symbol).unwrap(), epsilon = 1e-12);
    }
  }

  #[test]
  fn identical_instruments_tie_deterministically() {
    // AAA and CCC have the same returns up to rounding.
    let prices = scenario_prices();
    let a = HierarchicalRiskParityOptimizer::default()
      .optimize(&prices)
      .unwrap();
    let b = HierarchicalRiskParityOptimizer::default()
      .optimize(&reversed(&prices))
      .unwrap();

    assert!(a.linkage[0].distance < 1e-6);
    assert_eq!(a.order, vec!["AAA", "CCC", "BBB"]);
    assert_eq!(a.order, b.order);
    for (symbol, w) in a.allocation.weights.iter() {
      assert_abs_diff_eq!(*w, b.allocation.weights.get(symbol).unwrap(), epsilon = 1e-12);
    }
  }

  #[test]
  fn two_uncorrelated_assets_get_inverse_variance_weights() {
    let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.01]);
    let w = bisection_weights(&[0, 1], &cov);
    assert_abs_diff_eq!(w[0], 0.2, epsilon = 1e-15);
    assert_abs_diff_eq!(w[1], 0.8, epsilon = 1e-15);
  }

  #[test]
  fn cluster_variance_uses_inverse_variance_mix() {
    let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.01, 0.04]);
    // equal variances: w = (0.5, 0.5)
    assert_abs_diff_eq!(
      cluster_variance(&[0, 1], &cov),
      0.25 * (0.04 + 0.04 + 2.0 * 0.01),
      epsilon = 1e-15
    );
  }

  #[test]
  fn bisection_splits_follow_the_leaf_order() {
    // Order [2, 0, 1]: first split {2} vs {0, 1}, then {0} vs {1}.
    let cov = DMatrix::from_row_slice(3, 3, &[0.04, 0.0, 0.0, 0.0, 0.04, 0.0, 0.0, 0.0, 0.02]);
    let w = bisection_weights(&[2, 0, 1], &cov);

    // {0, 1} has cluster variance 0.02, same as {2}.
    assert_abs_diff_eq!(w[2], 0.5, epsilon = 1e-15);
    assert_abs_diff_eq!(w[0], 0.25, epsilon = 1e-15);
    assert_abs_diff_eq!(w[1], 0.25, epsilon = 1e-15);
  }

  #[test]
  fn leaves_come_out_left_child_first() {
    let linkage = vec![
      Merge {
        left: 1,
        right: 2,
        distance: 0.1,
        size: 2,
      },
      Merge {
        left: 0,
        right: 3,
        distance: 0.4,
        size: 3,
      },
    ];
    assert_eq!(quasi_diagonal_order(&linkage, 3), vec![0, 1, 2]);
    assert_eq!(quasi_diagonal_order(&[], 2), vec![0, 1]);
  }

  #[test]
  fn single_instrument_is_a_data_error() {
    let prices = scenario_prices().select(&["AAA"]).unwrap();
    let err = HierarchicalRiskParityOptimizer::default()
      .optimize(&prices)
      .unwrap_err();
    assert!(matches!(err, PortfolioError::Data(_)));
  }

  #[test]
  fn instruments_without_returns_are_dropped_before_counting() {
    let base = scenario_prices();
    let prices = PriceSeries::from_columns(
      base.dates().to_vec(),
      vec![
        ("AAA".into(), vec![100.0, 101.0, 102.0, 103.0]),
        ("ZZZ".into(), vec![f64::NAN; 4]),
      ],
    )
    .unwrap();
    assert!(matches!(
      HierarchicalRiskParityOptimizer::default().optimize(&prices),
      Err(PortfolioError::Data(_))
    ));
  }
}
