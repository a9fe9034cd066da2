//! Shared price fixtures for unit tests.

use chrono::Duration;
use chrono::NaiveDate;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::Distribution;
use rand_distr::Normal;

use super::data::PriceSeries;

pub(crate) fn day(d: u32) -> NaiveDate {
  NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn dates(t: usize) -> Vec<NaiveDate> {
  let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
  (0..t).map(|i| start + Duration::days(i as i64)).collect()
}

/// The three-instrument, four-period example used throughout the docs.
pub(crate) fn scenario_prices() -> PriceSeries {
  PriceSeries::from_columns(
    dates(4),
    vec![
      ("AAA".into(), vec![100.0, 101.0, 102.0, 103.0]),
      ("BBB".into(), vec![50.0, 49.0, 51.0, 50.0]),
      ("CCC".into(), vec![10.0, 10.1, 10.2, 10.3]),
    ],
  )
  .unwrap()
}

/// Deterministic, non-degenerate prices for `n` instruments over `t` dates.
///
/// Instruments differ in drift, volatility and phase so correlations are mixed.
pub(crate) fn synthetic_prices(t: usize, n: usize) -> PriceSeries {
  let columns = (0..n)
    .map(|j| {
      let drift = 0.0002 * (j as f64 + 1.0) - 0.0004;
      let vol = 0.004 + 0.003 * j as f64;
      let phase = 0.7 * j as f64;
      let freq = 0.9 + 0.37 * j as f64;
      let mut price = 50.0 + 10.0 * j as f64;
      let mut col = Vec::with_capacity(t);
      for i in 0..t {
        col.push(price);
        let shock = (freq * i as f64 + phase).sin() + 0.5 * (2.3 * i as f64 + 1.1 * phase).cos();
        price *= 1.0 + drift + vol * shock;
      }
      (format!("S{j:02}"), col)
    })
    .collect();

  PriceSeries::from_columns(dates(t), columns).unwrap()
}

/// Seeded one-factor universe: `r_ij = β_j f_i + σ_j ε_ij + d_j`.
///
/// Betas, idiosyncratic volatilities and drifts are drawn per instrument, so
/// correlations are positive but uneven and expected returns straddle zero.
pub(crate) fn random_universe(seed: u64, t: usize, n: usize) -> PriceSeries {
  let mut rng = StdRng::seed_from_u64(seed);
  let std_normal = Normal::new(0.0, 1.0).unwrap();
  let market: Vec<f64> = (0..t).map(|_| 0.01 * std_normal.sample(&mut rng)).collect();

  let columns = (0..n)
    .map(|j| {
      let beta = rng.gen_range(0.2..1.5);
      let idio = rng.gen_range(0.005..0.03);
      let drift = rng.gen_range(-0.002..0.003);
      let mut price = rng.gen_range(10.0..200.0);
      let mut col = Vec::with_capacity(t);
      for f in &market {
        col.push(price);
        let r: f64 = drift + beta * f + idio * std_normal.sample(&mut rng);
        price *= 1.0 + r.max(-0.5);
      }
      (format!("R{j:02}"), col)
    })
    .collect();

  PriceSeries::from_columns(dates(t), columns).unwrap()
}
