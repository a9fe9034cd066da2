//! # Visualization
//!
//! $$
//! \{(\sigma_p, \mathbb E[R_p])\}_{p} \mapsto \text{risk/return scatter and summary table}
//! $$
//!
//! Renders strategy results as a plotly risk/return scatter and a prettytable
//! summary of weights and performance figures.

use std::fs;
use std::io;
use std::path::Path;

use plotly::Layout;
use plotly::Plot;
use plotly::Scatter;
use plotly::common::Marker;
use plotly::common::Mode;
use plotly::common::Title;
use plotly::layout::Axis;
use prettytable::Cell;
use prettytable::Row;
use prettytable::Table;

use crate::portfolio::types::OptimizedPortfolio;

/// One row per portfolio with its performance figures and presentation weights.
pub fn comparison_table(portfolios: &[OptimizedPortfolio], cutoff: f64, decimals: u32) -> Table {
  let mut table = Table::new();
  table.set_titles(Row::new(vec![
    Cell::new("portfolio"),
    Cell::new("expected return"),
    Cell::new("volatility"),
    Cell::new("sharpe"),
    Cell::new("weights"),
  ]));

  for p in portfolios {
    let weights = p
      .clean_weights(cutoff, decimals)
      .iter()
      .filter(|(_, &w)| w > 0.0)
      .map(|(s, w)| format!("{s}: {w}"))
      .collect::<Vec<_>>()
      .join("\n");

    table.add_row(Row::new(vec![
      Cell::new(p.name()),
      Cell::new(&format!("{:.4}", p.expected_return())),
      Cell::new(&format!("{:.4}", p.volatility())),
      Cell::new(&format!("{:.4}", p.sharpe_ratio())),
      Cell::new(&weights),
    ]));
  }

  table
}

/// Volatility against expected return, one marker per portfolio.
pub fn risk_return_plot(portfolios: &[OptimizedPortfolio]) -> Plot {
  let mut plot = Plot::new();
  plot.set_layout(
    Layout::new()
      .title("Portfolio risk / return")
      .x_axis(Axis::new().title(Title::from("volatility")))
      .y_axis(Axis::new().title(Title::from("expected return"))),
  );

  for p in portfolios {
    let trace = Scatter::new(vec![p.volatility()], vec![p.expected_return()])
      .mode(Mode::Markers)
      .marker(Marker::new().size(12))
      .name(p.name())
      .hover_text_array(vec![format!(
        "{}<br>sharpe: {:.3}",
        p.name(),
        p.sharpe_ratio()
      )])
      .hover_template("%{hovertext}<extra></extra>");
    plot.add_trace(trace);
  }

  plot
}

/// Write the risk/return scatter as a standalone HTML page.
pub fn write_risk_return_html(portfolios: &[OptimizedPortfolio], path: impl AsRef<Path>) -> io::Result<()> {
  fs::write(path, risk_return_plot(portfolios).to_html())
}
