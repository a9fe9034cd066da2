//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w},\qquad \mathbf{1}^\top\mathbf{w}=1,\ \mathbf{w}\ge 0
//! $$
//!
//! Return and risk estimation, the four long-only allocation strategies and the
//! orchestration and persistence around them.

pub mod black_litterman;
pub mod config;
pub mod data;
pub mod engine;
pub mod estimators;
pub mod hrp;
pub mod matrix;
pub mod mean_variance;
pub mod risk_tolerance;
pub mod store;
pub mod types;
pub mod views;

#[cfg(test)]
pub(crate) mod fixtures;

pub use black_litterman::BlackLittermanFuser;
pub use black_litterman::Posterior;
pub use config::PortfolioConfig;
pub use data::PriceSeries;
pub use data::ReturnsFrame;
pub use engine::PortfolioOptimizer;
pub use engine::StrategyRun;
pub use estimators::CovarianceEstimator;
pub use estimators::ExpectedReturns;
pub use estimators::ReturnsEstimator;
pub use estimators::ShrunkCovariance;
pub use hrp::HierarchicalRiskParityOptimizer;
pub use matrix::CovarianceMatrix;
pub use mean_variance::MeanVarianceMode;
pub use mean_variance::MeanVarianceOptimizer;
pub use risk_tolerance::RiskProfile;
pub use risk_tolerance::RiskTolerance;
pub use risk_tolerance::RiskToleranceCalibrator;
pub use risk_tolerance::calculate_risk_tolerance;
pub use store::JsonFileStore;
pub use store::MemoryStore;
pub use store::PortfolioStore;
pub use types::AllocationRequest;
pub use types::OptimizedPortfolio;
pub use types::Performance;
pub use types::SolvePath;
pub use types::Strategy;
pub use types::StrategySelection;
pub use types::Weights;
pub use views::ViewSet;
pub use views::aggregate_sentiment;
