//! # Portfolio Store
//!
//! Persistence contract for optimized portfolios plus an in-memory and a JSON-file
//! backend. Weights are stored as a `symbol -> weight` object.

use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::PoisonError;
use std::sync::RwLock;

use tracing::debug;

use super::types::OptimizedPortfolio;
use super::types::PortfolioRecord;
use crate::error::StoreError;

/// Saving a portfolio whose name is already stored replaces it in place; `load_all`
/// returns portfolios in first-insertion order.
pub trait PortfolioStore {
  fn save(&self, portfolio: &OptimizedPortfolio) -> Result<(), StoreError>;

  fn load(&self, name: &str) -> Result<Option<OptimizedPortfolio>, StoreError>;

  fn load_all(&self) -> Result<Vec<OptimizedPortfolio>, StoreError>;
}

fn upsert(records: &mut Vec<PortfolioRecord>, record: PortfolioRecord) {
  match records.iter_mut().find(|r| r.name == record.name) {
    Some(slot) => *slot = record,
    None => records.push(record),
  }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
  records: RwLock<Vec<PortfolioRecord>>,
}

impl PortfolioStore for MemoryStore {
  fn save(&self, portfolio: &OptimizedPortfolio) -> Result<(), StoreError> {
    let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
    upsert(&mut records, portfolio.to_record());
    Ok(())
  }

  fn load(&self, name: &str) -> Result<Option<OptimizedPortfolio>, StoreError> {
    let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
    records
      .iter()
      .find(|r| r.name == name)
      .map(|r| OptimizedPortfolio::from_record(r.clone()).map_err(StoreError::from))
      .transpose()
  }

  fn load_all(&self) -> Result<Vec<OptimizedPortfolio>, StoreError> {
    let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
    records
      .iter()
      .map(|r| OptimizedPortfolio::from_record(r.clone()).map_err(StoreError::from))
      .collect()
  }
}

/// Stores every portfolio in one JSON array file. Writes go through a sibling temp
/// file that is renamed over the target.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
  path: PathBuf,
}

impl JsonFileStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn read(&self) -> Result<Vec<PortfolioRecord>, StoreError> {
    if !self.path.exists() {
      return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(&self.path)?);
    Ok(serde_json::from_reader(reader)?)
  }

  fn write(&self, records: &[PortfolioRecord]) -> Result<(), StoreError> {
    let mut tmp = self.path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut writer = BufWriter::new(File::create(&tmp)?);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&tmp, &self.path)?;
    debug!(path = %self.path.display(), portfolios = records.len(), "wrote portfolio store");
    Ok(())
  }
}

impl PortfolioStore for JsonFileStore {
  fn save(&self, portfolio: &OptimizedPortfolio) -> Result<(), StoreError> {
    let mut records = self.read()?;
    upsert(&mut records, portfolio.to_record());
    self.write(&records)
  }

  fn load(&self, name: &str) -> Result<Option<OptimizedPortfolio>, StoreError> {
    self
      .read()?
      .into_iter()
      .find(|r| r.name == name)
      .map(|r| OptimizedPortfolio::from_record(r).map_err(StoreError::from))
      .transpose()
  }

  fn load_all(&self) -> Result<Vec<OptimizedPortfolio>, StoreError> {
    self
      .read()?
      .into_iter()
      .map(|r| OptimizedPortfolio::from_record(r).map_err(StoreError::from))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::portfolio::types::SolvePath;
  use crate::portfolio::types::Weights;

  fn portfolio(name: &str, w: f64) -> OptimizedPortfolio {
    let weights = Weights::from_map(BTreeMap::from([
      ("AAA".to_string(), w),
      ("BBB".to_string(), 1.0 - w),
    ]));
    OptimizedPortfolio::from_tuple((name.to_string(), weights, 0.123456789, 0.2, 0.61728394))
      .unwrap()
  }

  fn assert_same(a: &OptimizedPortfolio, b: &OptimizedPortfolio) {
    assert_eq!(a.name(), b.name());
    assert_abs_diff_eq!(a.expected_return(), b.expected_return(), epsilon = 1e-12);
    assert_abs_diff_eq!(a.volatility(), b.volatility(), epsilon = 1e-12);
    assert_abs_diff_eq!(a.sharpe_ratio(), b.sharpe_ratio(), epsilon = 1e-12);
    for (s, w) in a.weights().iter() {
      assert_abs_diff_eq!(*w, b.weights().get(s).unwrap(), epsilon = 1e-12);
    }
  }

  #[test]
  fn memory_store_upserts_by_name() {
    let store = MemoryStore::default();
    store.save(&portfolio("hrp", 0.3)).unwrap();
    store.save(&portfolio("mean-variance", 0.5)).unwrap();
    store.save(&portfolio("hrp", 0.4)).unwrap();

    let all = store.load_all().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].name(), "hrp");
    assert_eq!(all[0].weights().get("AAA"), Some(0.4));
    assert!(store.load("black-litterman").unwrap().is_none());
  }

  #[test]
  fn json_store_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("portfolios.json"));
    assert!(store.load_all().unwrap().is_empty());

    let p = portfolio("black-litterman", 0.25);
    store.save(&p).unwrap();
    store.save(&portfolio("hrp", 0.6)).unwrap();

    let loaded = store.load("black-litterman").unwrap().unwrap();
    assert_same(&p, &loaded);
    assert_eq!(store.load_all().unwrap().len(), 2);
  }

  #[test]
  fn json_layout_uses_weight_objects() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("portfolios.json"));
    store.save(&portfolio("hrp", 0.5)).unwrap();

    let raw: serde_json::Value =
      serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
    assert_eq!(raw[0]["name"], "hrp");
    assert_eq!(raw[0]["weights"]["AAA"], 0.5);
    assert!(raw[0].get("solve_path").is_none());
  }

  #[test]
  fn solve_path_survives_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("portfolios.json"));
    let mut record = portfolio("black-litterman", 0.5).to_record();
    record.solve_path = Some(SolvePath::EfficientRiskFallback {
      target_volatility: 0.3,
      reason: "no instrument beats the risk-free rate".into(),
    });
    let p = OptimizedPortfolio::from_record(record).unwrap();

    store.save(&p).unwrap();
    let loaded = store.load("black-litterman").unwrap().unwrap();
    assert_same(&p, &loaded);
    assert_eq!(loaded.solve_path(), p.solve_path());
  }

  #[test]
  fn corrupt_file_is_a_json_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portfolios.json");
    fs::write(&path, "not json").unwrap();
    assert!(matches!(
      JsonFileStore::new(path).load_all(),
      Err(StoreError::Json(_))
    ));
  }
}
