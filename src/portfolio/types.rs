//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Strategy tags, weights, performance figures and the optimized portfolio record.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;

use super::data::PriceSeries;
use super::estimators::ExpectedReturns;
use super::matrix::CovarianceMatrix;
use super::risk_tolerance::RiskTolerance;
use super::views::ViewSet;
use crate::error::PortfolioError;
use crate::error::Result;

/// Tolerance on `Σw = 1`.
pub const WEIGHT_SUM_TOL: f64 = 1e-6;
/// Most negative weight still considered long-only.
pub const LONG_ONLY_TOL: f64 = 1e-9;

/// Supported allocation strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  /// Long-only mean-variance on the Ledoit-Wolf covariance.
  MeanVariance,
  /// Black-Litterman posterior with a max-Sharpe frontier solve.
  BlackLitterman,
  /// Hierarchical Risk Parity (Lopez de Prado).
  Hrp,
  /// Target return derived from the investor's risk tolerance.
  RiskTolerance,
}

impl Strategy {
  /// Every strategy, in the order `all` reports them.
  pub const ALL: [Strategy; 4] = [
    Strategy::MeanVariance,
    Strategy::BlackLitterman,
    Strategy::Hrp,
    Strategy::RiskTolerance,
  ];

  /// Tag used on the command line and as the stored portfolio name.
  pub fn tag(self) -> &'static str {
    match self {
      Self::MeanVariance => "mean-variance",
      Self::BlackLitterman => "black-litterman",
      Self::Hrp => "hrp",
      Self::RiskTolerance => "risk-tolerance",
    }
  }
}

impl Display for Strategy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.tag())
  }
}

impl FromStr for Strategy {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "mean-variance" => Ok(Self::MeanVariance),
      "black-litterman" => Ok(Self::BlackLitterman),
      "hrp" => Ok(Self::Hrp),
      "risk-tolerance" => Ok(Self::RiskTolerance),
      _ => Err(PortfolioError::UnknownStrategy(s.to_string())),
    }
  }
}

/// One strategy or every strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategySelection {
  One(Strategy),
  All,
}

impl StrategySelection {
  pub fn strategies(self) -> Vec<Strategy> {
    match self {
      Self::One(s) => vec![s],
      Self::All => Strategy::ALL.to_vec(),
    }
  }
}

impl FromStr for StrategySelection {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    if s.trim().eq_ignore_ascii_case("all") {
      Ok(Self::All)
    } else {
      s.parse().map(Self::One)
    }
  }
}

/// Portfolio weights keyed by symbol.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weights(BTreeMap<String, f64>);

impl Weights {
  /// Pair `values` with `symbols`. Negative round-off below [`LONG_ONLY_TOL`] is clipped to zero.
  pub fn from_vector(symbols: &[String], values: &DVector<f64>) -> Self {
    Self(
      symbols
        .iter()
        .zip(values.iter())
        .map(|(s, &w)| {
          let w = if w < 0.0 && w >= -LONG_ONLY_TOL { 0.0 } else { w };
          (s.clone(), w)
        })
        .collect(),
    )
  }

  pub fn from_map(map: BTreeMap<String, f64>) -> Self {
    Self(map)
  }

  pub fn get(&self, symbol: &str) -> Option<f64> {
    self.0.get(symbol).copied()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn sum(&self) -> f64 {
    self.0.values().sum()
  }

  pub fn as_map(&self) -> &BTreeMap<String, f64> {
    &self.0
  }

  /// Dense vector in `symbols` order; missing symbols get zero weight.
  pub fn to_vector(&self, symbols: &[String]) -> DVector<f64> {
    DVector::from_iterator(
      symbols.len(),
      symbols.iter().map(|s| self.get(s).unwrap_or(0.0)),
    )
  }

  /// Presentation copy: weights below `cutoff` become zero, the rest are rounded to `decimals`.
  ///
  /// The result is not renormalized.
  pub fn clean(&self, cutoff: f64, decimals: u32) -> Self {
    let scale = 10f64.powi(decimals as i32);
    Self(
      self
        .0
        .iter()
        .map(|(s, &w)| {
          let w = if w.abs() < cutoff { 0.0 } else { w };
          (s.clone(), (w * scale).round() / scale)
        })
        .collect(),
    )
  }

  /// Check the fully-invested, long-only invariant.
  pub fn validate(&self) -> Result<()> {
    if self.0.is_empty() {
      return Err(PortfolioError::validation("portfolio has no weights"));
    }
    if let Some((s, w)) = self.0.iter().find(|(_, w)| !w.is_finite()) {
      return Err(PortfolioError::numerical(format!("weight of `{s}` is {w}")));
    }
    if let Some((s, w)) = self.0.iter().find(|(_, &w)| w < -LONG_ONLY_TOL) {
      return Err(PortfolioError::numerical(format!(
        "weight of `{s}` is negative ({w})"
      )));
    }
    let sum = self.sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOL {
      return Err(PortfolioError::numerical(format!("weights sum to {sum}")));
    }
    Ok(())
  }
}

/// Expected return, volatility and Sharpe ratio of a weight vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
  pub expected_return: f64,
  pub volatility: f64,
  /// `(expected_return - risk_free) / volatility`, zero when volatility vanishes.
  pub sharpe_ratio: f64,
}

impl Performance {
  pub fn compute(
    w: &DVector<f64>,
    mu: &ExpectedReturns,
    cov: &CovarianceMatrix,
    risk_free_rate: f64,
  ) -> Self {
    let expected_return = w.dot(mu.values());
    let volatility = cov.quadratic_form(w).max(0.0).sqrt();
    let sharpe_ratio = if volatility > 1e-15 {
      (expected_return - risk_free_rate) / volatility
    } else {
      0.0
    };

    Self {
      expected_return,
      volatility,
      sharpe_ratio,
    }
  }

  pub fn is_finite(&self) -> bool {
    self.expected_return.is_finite() && self.volatility.is_finite() && self.sharpe_ratio.is_finite()
  }
}

/// Weights with their realized performance, before being named.
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
  pub weights: Weights,
  pub performance: Performance,
}

/// How an optimizer arrived at its weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "kebab-case")]
pub enum SolvePath {
  MinVolatility,
  EfficientReturn { target_return: f64 },
  MaxSharpe,
  /// Max-Sharpe was infeasible; solved for the highest return at a fixed volatility instead.
  EfficientRiskFallback { target_volatility: f64, reason: String },
  RecursiveBisection,
}

/// Flat, serializable form of an [`OptimizedPortfolio`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRecord {
  pub name: String,
  pub weights: Weights,
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe_ratio: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub solve_path: Option<SolvePath>,
}

/// Result of one optimizer run. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizedPortfolio {
  name: String,
  weights: Weights,
  performance: Performance,
  solve_path: Option<SolvePath>,
}

impl OptimizedPortfolio {
  /// Build a portfolio, enforcing finite figures and fully-invested long-only weights.
  pub fn new(
    name: impl Into<String>,
    allocation: Allocation,
    solve_path: Option<SolvePath>,
  ) -> Result<Self> {
    let name = name.into();
    if name.trim().is_empty() {
      return Err(PortfolioError::validation("portfolio name is empty"));
    }
    if !allocation.performance.is_finite() {
      return Err(PortfolioError::numerical(format!(
        "portfolio `{name}` has non-finite performance figures"
      )));
    }
    allocation.weights.validate()?;

    Ok(Self {
      name,
      weights: allocation.weights,
      performance: allocation.performance,
      solve_path,
    })
  }

  /// Build from `(name, weights, expected_return, volatility, sharpe_ratio)`.
  pub fn from_tuple(parts: (String, Weights, f64, f64, f64)) -> Result<Self> {
    let (name, weights, expected_return, volatility, sharpe_ratio) = parts;
    Self::new(
      name,
      Allocation {
        weights,
        performance: Performance {
          expected_return,
          volatility,
          sharpe_ratio,
        },
      },
      None,
    )
  }

  /// Build from a stored record.
  pub fn from_record(record: PortfolioRecord) -> Result<Self> {
    Self::new(
      record.name,
      Allocation {
        weights: record.weights,
        performance: Performance {
          expected_return: record.expected_return,
          volatility: record.volatility,
          sharpe_ratio: record.sharpe_ratio,
        },
      },
      record.solve_path,
    )
  }

  pub fn to_record(&self) -> PortfolioRecord {
    PortfolioRecord {
      name: self.name.clone(),
      weights: self.weights.clone(),
      expected_return: self.performance.expected_return,
      volatility: self.performance.volatility,
      sharpe_ratio: self.performance.sharpe_ratio,
      solve_path: self.solve_path.clone(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn weights(&self) -> &Weights {
    &self.weights
  }

  pub fn performance(&self) -> Performance {
    self.performance
  }

  pub fn expected_return(&self) -> f64 {
    self.performance.expected_return
  }

  pub fn volatility(&self) -> f64 {
    self.performance.volatility
  }

  pub fn sharpe_ratio(&self) -> f64 {
    self.performance.sharpe_ratio
  }

  pub fn solve_path(&self) -> Option<&SolvePath> {
    self.solve_path.as_ref()
  }

  pub fn clean_weights(&self, cutoff: f64, decimals: u32) -> Weights {
    self.weights.clean(cutoff, decimals)
  }
}

/// Read-only inputs shared by every strategy of one allocation request.
#[derive(Clone, Debug)]
pub struct AllocationRequest {
  pub prices: PriceSeries,
  /// `None` means no views were supplied; `Some` of an empty set means views were
  /// requested but none apply. Both yield the market-implied prior.
  pub views: Option<ViewSet>,
  pub risk_tolerance: Option<RiskTolerance>,
  /// Market-capitalization weights for the implied prior; equal weights when absent.
  pub market_weights: Option<Weights>,
}

impl AllocationRequest {
  pub fn new(prices: PriceSeries) -> Self {
    Self {
      prices,
      views: None,
      risk_tolerance: None,
      market_weights: None,
    }
  }

  pub fn with_views(mut self, views: ViewSet) -> Self {
    self.views = Some(views);
    self
  }

  pub fn with_risk_tolerance(mut self, risk_tolerance: RiskTolerance) -> Self {
    self.risk_tolerance = Some(risk_tolerance);
    self
  }

  pub fn with_market_weights(mut self, weights: Weights) -> Self {
    self.market_weights = Some(weights);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn weights(pairs: &[(&str, f64)]) -> Weights {
    Weights::from_map(pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect())
  }

  #[test]
  fn strategy_tags_parse_case_insensitively() {
    assert_eq!("HRP".parse::<Strategy>().unwrap(), Strategy::Hrp);
    assert_eq!(
      " Black-Litterman ".parse::<Strategy>().unwrap(),
      Strategy::BlackLitterman
    );
    assert_eq!(
      "all".parse::<StrategySelection>().unwrap(),
      StrategySelection::All
    );
  }

  #[test]
  fn unknown_tag_is_rejected() {
    let err = "momentum".parse::<StrategySelection>().unwrap_err();
    assert_eq!(err, PortfolioError::UnknownStrategy("momentum".into()));
  }

  #[test]
  fn tags_round_trip_through_display() {
    for s in Strategy::ALL {
      assert_eq!(s.to_string().parse::<Strategy>().unwrap(), s);
    }
  }

  #[test]
  fn clean_zeroes_dust_and_rounds() {
    let w = weights(&[("A", 0.123456789), ("B", 0.00004), ("C", 0.876503211)]);
    let clean = w.clean(1e-4, 5);
    assert_eq!(clean.get("A"), Some(0.12346));
    assert_eq!(clean.get("B"), Some(0.0));
    assert_eq!(clean.get("C"), Some(0.8765));
    // raw weights are untouched
    assert_eq!(w.get("B"), Some(0.00004));
  }

  #[test]
  fn validate_enforces_budget_and_long_only() {
    assert!(weights(&[("A", 0.5), ("B", 0.5)]).validate().is_ok());
    assert!(weights(&[("A", 0.6), ("B", 0.5)]).validate().is_err());
    assert!(weights(&[("A", 1.1), ("B", -0.1)]).validate().is_err());
    assert!(weights(&[("A", f64::NAN), ("B", 1.0)]).validate().is_err());
  }

  #[test]
  fn named_constructors_agree() {
    let w = weights(&[("A", 0.25), ("B", 0.75)]);
    let from_tuple =
      OptimizedPortfolio::from_tuple(("hrp".into(), w.clone(), 0.1, 0.2, 0.5)).unwrap();
    let from_record = OptimizedPortfolio::from_record(from_tuple.to_record()).unwrap();

    assert_eq!(from_tuple, from_record);
    assert_eq!(from_record.name(), "hrp");
    assert_eq!(from_record.sharpe_ratio(), 0.5);
  }

  #[test]
  fn non_finite_figures_are_rejected() {
    let w = weights(&[("A", 1.0)]);
    let err = OptimizedPortfolio::from_tuple(("x".into(), w, 0.1, 0.0, f64::INFINITY)).unwrap_err();
    assert!(matches!(err, PortfolioError::Numerical(_)));
  }
}
