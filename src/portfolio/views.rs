//! # Investor Views
//!
//! Absolute per-instrument return views for the Black-Litterman fuser.
//! Sentiment scores arrive in percent and are scaled by [`SENTIMENT_SCALE`].

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::error::Result;

/// Sentiment scores are expressed in percent.
pub const SENTIMENT_SCALE: f64 = 100.0;

/// Symbol to expected-return view.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewSet(BTreeMap<String, f64>);

impl ViewSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_map(views: BTreeMap<String, f64>) -> Result<Self> {
    if let Some((s, v)) = views.iter().find(|(_, v)| !v.is_finite()) {
      return Err(PortfolioError::validation(format!(
        "view on `{s}` is not finite ({v})"
      )));
    }
    Ok(Self(views))
  }

  /// Add or replace the view on `symbol`.
  pub fn with_view(mut self, symbol: impl Into<String>, expected_return: f64) -> Result<Self> {
    let symbol = symbol.into();
    if !expected_return.is_finite() {
      return Err(PortfolioError::validation(format!(
        "view on `{symbol}` is not finite ({expected_return})"
      )));
    }
    self.0.insert(symbol, expected_return);
    Ok(self)
  }

  /// Views from sentiment scores in percent (`2.5` becomes a `0.025` return view).
  pub fn from_sentiment(scores: &BTreeMap<String, f64>) -> Result<Self> {
    Self::from_map(
      scores
        .iter()
        .map(|(s, v)| (s.clone(), v / SENTIMENT_SCALE))
        .collect(),
    )
  }

  pub fn get(&self, symbol: &str) -> Option<f64> {
    self.0.get(symbol).copied()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
    self.0.iter()
  }
}

/// Average the sentiment scores of each symbol, e.g. one score per news headline.
pub fn aggregate_sentiment(scores: &[(String, f64)]) -> BTreeMap<String, f64> {
  let mut acc: BTreeMap<String, (f64, usize)> = BTreeMap::new();
  for (symbol, score) in scores.iter().filter(|(_, s)| s.is_finite()) {
    let entry = acc.entry(symbol.clone()).or_insert((0.0, 0));
    entry.0 += score;
    entry.1 += 1;
  }

  acc
    .into_iter()
    .map(|(s, (sum, n))| (s, sum / n as f64))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sentiment_is_scaled_from_percent() {
    let scores = BTreeMap::from([("AAA".to_string(), 2.5), ("BBB".to_string(), -1.0)]);
    let views = ViewSet::from_sentiment(&scores).unwrap();
    assert_eq!(views.get("AAA"), Some(0.025));
    assert_eq!(views.get("BBB"), Some(-0.01));
    assert_eq!(views.len(), 2);
  }

  #[test]
  fn non_finite_views_are_rejected() {
    assert!(ViewSet::new().with_view("AAA", f64::NAN).is_err());
    let map = BTreeMap::from([("AAA".to_string(), f64::INFINITY)]);
    assert!(ViewSet::from_map(map).is_err());
  }

  #[test]
  fn headlines_are_averaged_per_symbol() {
    let scores = vec![
      ("AAA".to_string(), 1.0),
      ("BBB".to_string(), 4.0),
      ("AAA".to_string(), 3.0),
      ("AAA".to_string(), f64::NAN),
    ];
    let agg = aggregate_sentiment(&scores);
    assert_eq!(agg["AAA"], 2.0);
    assert_eq!(agg["BBB"], 4.0);
  }

  #[test]
  fn deserializes_from_plain_object() {
    let views: ViewSet = serde_json::from_str(r#"{"AAA": 0.05}"#).unwrap();
    assert_eq!(views.get("AAA"), Some(0.05));
  }
}
