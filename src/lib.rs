//! # Portfolio Allocator
//!
//! Long-only portfolio construction under four strategies: mean-variance on a
//! Ledoit-Wolf covariance, Black-Litterman with sentiment views, hierarchical risk
//! parity and a risk-tolerance targeted frontier solve.

pub mod error;
pub mod portfolio;
pub mod traits;
pub mod visualization;
