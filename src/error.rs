//! # Errors
//!
//! Error taxonomy shared by the estimators, optimizers and the orchestrator.

use thiserror::Error;

/// Category of a [`PortfolioError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
  /// Malformed request: unknown strategy tag, empty universe, bad parameter.
  Validation,
  /// Not enough (or unusable) observations for an estimator or optimizer.
  Data,
  /// Covariance estimation degeneracy that shrinkage could not repair.
  Numerical,
  /// Infeasible or non-converging quadratic program.
  Optimization,
}

/// Allocation engine errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortfolioError {
  #[error("unknown strategy tag `{0}`")]
  UnknownStrategy(String),

  #[error("invalid input: {0}")]
  Validation(String),

  #[error("insufficient data: {0}")]
  Data(String),

  #[error("numerical failure: {0}")]
  Numerical(String),

  #[error("infeasible problem: {0}")]
  Infeasible(String),

  #[error("solver did not converge after {iterations} iterations")]
  NotConverged { iterations: usize },
}

impl PortfolioError {
  /// Taxonomy bucket of this error.
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::UnknownStrategy(_) | Self::Validation(_) => ErrorKind::Validation,
      Self::Data(_) => ErrorKind::Data,
      Self::Numerical(_) => ErrorKind::Numerical,
      Self::Infeasible(_) | Self::NotConverged { .. } => ErrorKind::Optimization,
    }
  }

  pub(crate) fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }

  pub(crate) fn data(msg: impl Into<String>) -> Self {
    Self::Data(msg.into())
  }

  pub(crate) fn numerical(msg: impl Into<String>) -> Self {
    Self::Numerical(msg.into())
  }

  pub(crate) fn infeasible(msg: impl Into<String>) -> Self {
    Self::Infeasible(msg.into())
  }
}

/// Persistence errors raised by [`crate::portfolio::store`] backends.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("store I/O failed: {0}")]
  Io(#[from] std::io::Error),

  #[error("store payload is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Portfolio(#[from] PortfolioError),
}

pub type Result<T, E = PortfolioError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kinds_follow_taxonomy() {
    assert_eq!(
      PortfolioError::UnknownStrategy("x".into()).kind(),
      ErrorKind::Validation
    );
    assert_eq!(PortfolioError::data("short").kind(), ErrorKind::Data);
    assert_eq!(PortfolioError::numerical("psd").kind(), ErrorKind::Numerical);
    assert_eq!(
      PortfolioError::NotConverged { iterations: 10 }.kind(),
      ErrorKind::Optimization
    );
    assert_eq!(
      PortfolioError::infeasible("target").kind(),
      ErrorKind::Optimization
    );
  }

  #[test]
  fn messages_name_the_problem() {
    let err = PortfolioError::UnknownStrategy("momentum".into());
    assert_eq!(err.to_string(), "unknown strategy tag `momentum`");
  }
}
