//! # Covariance Matrix
//!
//! $$
//! \Sigma = \Sigma^\top, \qquad \lambda_{\min}(\Sigma) \ge 0
//! $$
//!
//! Symbol-indexed covariance container with symmetry and definiteness checks.

use nalgebra::DMatrix;
use nalgebra::DVector;

use crate::error::PortfolioError;
use crate::error::Result;

const SYMMETRY_TOL: f64 = 1e-10;

/// Symmetric, positive semi-definite covariance matrix indexed by instrument symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct CovarianceMatrix {
  symbols: Vec<String>,
  values: DMatrix<f64>,
}

impl CovarianceMatrix {
  /// Validate and wrap a covariance matrix.
  ///
  /// The matrix is symmetrized exactly; asymmetry beyond a relative `1e-10` is rejected.
  pub fn new(symbols: Vec<String>, values: DMatrix<f64>) -> Result<Self> {
    let n = symbols.len();
    if n == 0 {
      return Err(PortfolioError::validation("empty symbol set"));
    }
    if values.nrows() != n || values.ncols() != n {
      return Err(PortfolioError::validation(format!(
        "covariance is {}x{}, expected {n}x{n}",
        values.nrows(),
        values.ncols()
      )));
    }
    if values.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::numerical("covariance has non-finite entries"));
    }

    let scale = values.amax().max(1.0);
    for i in 0..n {
      if values[(i, i)] < 0.0 {
        return Err(PortfolioError::numerical(format!(
          "negative variance for `{}`",
          symbols[i]
        )));
      }
      for j in (i + 1)..n {
        if (values[(i, j)] - values[(j, i)]).abs() > SYMMETRY_TOL * scale {
          return Err(PortfolioError::validation(format!(
            "covariance is not symmetric at ({i}, {j})"
          )));
        }
      }
    }

    Ok(Self {
      symbols,
      values: symmetrize(values),
    })
  }

  pub fn symbols(&self) -> &[String] {
    &self.symbols
  }

  pub fn values(&self) -> &DMatrix<f64> {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.symbols.len()
  }

  pub fn is_empty(&self) -> bool {
    self.symbols.is_empty()
  }

  pub fn variance(&self, symbol: &str) -> Option<f64> {
    let i = self.symbols.iter().position(|s| s == symbol)?;
    Some(self.values[(i, i)])
  }

  pub fn get(&self, a: &str, b: &str) -> Option<f64> {
    let i = self.symbols.iter().position(|s| s == a)?;
    let j = self.symbols.iter().position(|s| s == b)?;
    Some(self.values[(i, j)])
  }

  /// Smallest eigenvalue of the (symmetric) matrix.
  pub fn min_eigenvalue(&self) -> f64 {
    self
      .values
      .clone()
      .symmetric_eigen()
      .eigenvalues
      .iter()
      .cloned()
      .fold(f64::INFINITY, f64::min)
  }

  pub fn is_positive_semi_definite(&self, tol: f64) -> bool {
    self.min_eigenvalue() >= -tol
  }

  /// Portfolio variance `wᵀΣw`.
  pub fn quadratic_form(&self, w: &DVector<f64>) -> f64 {
    w.dot(&(&self.values * w))
  }

  /// Inverse through a Cholesky factorisation.
  pub fn inverse(&self) -> Result<DMatrix<f64>> {
    spd_inverse(&self.values)
  }
}

pub(crate) fn symmetrize(m: DMatrix<f64>) -> DMatrix<f64> {
  (&m + m.transpose()) * 0.5
}

/// Inverse of a symmetric positive-definite matrix.
pub(crate) fn spd_inverse(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
  m.clone()
    .cholesky()
    .map(|c| symmetrize(c.inverse()))
    .ok_or_else(|| PortfolioError::numerical("matrix is not positive definite"))
}
