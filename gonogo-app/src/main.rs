mod app;
mod recorder;
mod subject;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use app::App;

/// Runs an appetitive go/nogo session against a simulated subject.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML experiment configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of trials to complete before stopping
    #[arg(long, default_value_t = 10)]
    trials: u64,

    /// Seed for trial selection and the simulated subject (overrides config)
    #[arg(long)]
    seed: Option<u64>,

    /// JSON-lines results file; stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gonogo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let app = App::new(args)?;
    app.run()?;

    Ok(())
}
