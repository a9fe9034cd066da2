use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use portfolio_allocator::portfolio::AllocationRequest;
use portfolio_allocator::portfolio::JsonFileStore;
use portfolio_allocator::portfolio::OptimizedPortfolio;
use portfolio_allocator::portfolio::PortfolioConfig;
use portfolio_allocator::portfolio::PortfolioOptimizer;
use portfolio_allocator::portfolio::PriceSeries;
use portfolio_allocator::portfolio::RiskProfile;
use portfolio_allocator::portfolio::ViewSet;
use portfolio_allocator::visualization::comparison_table;
use portfolio_allocator::visualization::write_risk_return_html;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "portfolio-allocator")]
#[command(about = "Long-only portfolio allocation under several strategies")]
struct Cli {
  #[command(subcommand)]
  command: Command,

  /// Engine configuration (JSON); defaults apply to missing fields
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
  /// Optimize portfolios from a price table
  Optimize {
    /// Wide CSV: `date,SYM1,SYM2,...`
    #[arg(short, long)]
    prices: PathBuf,

    /// Strategy tag: mean-variance, black-litterman, hrp, risk-tolerance or all
    #[arg(short, long, default_value = "all")]
    strategy: String,

    /// Sentiment scores in percent as a JSON object `{"SYM": score}`
    #[arg(long)]
    sentiment: Option<PathBuf>,

    /// Investor age in years
    #[arg(long, requires_all = ["financial_state", "risk_aversion"])]
    age: Option<f64>,

    /// Financial state in [0, 1]
    #[arg(long)]
    financial_state: Option<f64>,

    /// Risk aversion in [0, 1]
    #[arg(long)]
    risk_aversion: Option<f64>,

    /// Keep only the n least correlated instruments
    #[arg(long)]
    universe: Option<usize>,

    /// Save results to this JSON store
    #[arg(long)]
    store: Option<PathBuf>,

    /// Write a risk/return scatter to this HTML file
    #[arg(long)]
    plot: Option<PathBuf>,
  },
  /// Show stored portfolios
  Show {
    /// JSON store path
    #[arg(long)]
    store: PathBuf,

    /// Strategy tag or `all`
    #[arg(short, long, default_value = "all")]
    strategy: String,
  },
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer())
    .with(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();
  let config = load_config(cli.config.as_deref())?;
  let engine = PortfolioOptimizer::new(config).context("invalid configuration")?;

  match cli.command {
    Command::Optimize {
      prices,
      strategy,
      sentiment,
      age,
      financial_state,
      risk_aversion,
      universe,
      store,
      plot,
    } => {
      let mut series = load_prices(&prices)?;
      if let Some(n) = universe {
        let picked = series.select_low_correlation(n)?;
        let picked: Vec<&str> = picked.iter().map(String::as_str).collect();
        series = series.select(&picked)?;
        tracing::info!(instruments = ?picked, "selected low-correlation universe");
      }

      let mut request = AllocationRequest::new(series);
      if let Some(path) = sentiment {
        request = request.with_views(load_views(&path)?);
      }
      if let (Some(age), Some(fs), Some(ra)) = (age, financial_state, risk_aversion) {
        let rt = RiskProfile::new(age, fs, ra).risk_tolerance()?;
        tracing::info!(risk_tolerance = rt.value(), "calibrated risk tolerance");
        request = request.with_risk_tolerance(rt);
      }

      let runs = engine.optimize_tag(&strategy, &request)?;
      for run in runs.iter().filter(|r| !r.is_ok()) {
        if let Err(e) = &run.result {
          eprintln!("{}: {e}", run.strategy);
        }
      }

      let portfolios: Vec<OptimizedPortfolio> =
        runs.iter().filter_map(|r| r.portfolio().cloned()).collect();
      report(&engine, &portfolios);

      if let Some(path) = store {
        let saved = engine
          .save_all(&JsonFileStore::new(&path), &runs)
          .with_context(|| format!("saving portfolios to {}", path.display()))?;
        tracing::info!(saved, path = %path.display(), "saved portfolios");
      }
      if let Some(path) = plot {
        write_risk_return_html(&portfolios, &path)
          .with_context(|| format!("writing plot to {}", path.display()))?;
      }

      if portfolios.is_empty() {
        anyhow::bail!("every requested strategy failed");
      }
    }
    Command::Show { store, strategy } => {
      let portfolios = engine
        .load(&JsonFileStore::new(&store), &strategy)
        .with_context(|| format!("loading portfolios from {}", store.display()))?;
      report(&engine, &portfolios);
    }
  }

  Ok(())
}

fn report(engine: &PortfolioOptimizer, portfolios: &[OptimizedPortfolio]) {
  let config = engine.config();
  comparison_table(portfolios, config.weight_cutoff, config.weight_decimals).printstd();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PortfolioConfig> {
  let Some(path) = path else {
    return Ok(PortfolioConfig::default());
  };
  let file = File::open(path).with_context(|| format!("opening config {}", path.display()))?;
  serde_json::from_reader(BufReader::new(file))
    .with_context(|| format!("parsing config {}", path.display()))
}

fn load_prices(path: &Path) -> anyhow::Result<PriceSeries> {
  let file = File::open(path).with_context(|| format!("opening prices {}", path.display()))?;
  PriceSeries::from_csv_reader(BufReader::new(file))
    .with_context(|| format!("reading prices {}", path.display()))
}

fn load_views(path: &Path) -> anyhow::Result<ViewSet> {
  let file = File::open(path).with_context(|| format!("opening sentiment {}", path.display()))?;
  let scores: BTreeMap<String, f64> = serde_json::from_reader(BufReader::new(file))
    .with_context(|| format!("parsing sentiment {}", path.display()))?;
  Ok(ViewSet::from_sentiment(&scores)?)
}
