use chrono::NaiveDate;
use clap::Parser;
use harvest_core::{telemetry, Config};
use harvester::App;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[clap(name = "harvester")]
#[clap(about = "Backfills a symbol's message stream into a delimited file", version)]
struct Cli {
    /// Config file (defaults to ./harvester.toml when present)
    #[clap(long, env = "HARVESTER_CONFIG")]
    config: Option<PathBuf>,

    /// Symbol to look for
    #[clap(long, env = "HARVEST_SYMBOL")]
    symbol: Option<String>,

    /// Earliest date for data (YYYY-MM-DD)
    #[clap(long, env = "HARVEST_DATE")]
    date: Option<NaiveDate>,

    /// Restart from this message id
    #[clap(long, env = "HARVEST_ID")]
    id: Option<u64>,

    /// Delay in milliseconds between requests
    #[clap(long, env = "HARVEST_DELAY")]
    delay: Option<u64>,

    /// Retries after a failed request, -1 for unlimited
    #[clap(long, env = "HARVEST_RETRY", allow_negative_numbers = true)]
    retry: Option<i64>,

    /// Directory the <SYMBOL>.csv file is written to
    #[clap(long, env = "HARVEST_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(symbol) = self.symbol {
            config.harvest.symbol = symbol;
        }
        if let Some(date) = self.date {
            config.harvest.boundary_date = date;
        }
        if let Some(id) = self.id {
            config.harvest.resume_id = (id != 0).then_some(id);
        }
        if let Some(delay) = self.delay {
            config.harvest.delay_ms = delay;
        }
        if let Some(retry) = self.retry {
            config.harvest.retries = retry;
        }
        if let Some(dir) = self.output_dir {
            config.output.dir = dir;
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        eprintln!("harvester: {:#}", e);
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load_from(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // Initialize telemetry
    telemetry::init(&config.telemetry)?;

    // Override config with CLI args
    cli.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid settings: {}", e))?;

    info!(
        symbol = %config.harvest.symbol,
        boundary = %config.harvest.boundary_date,
        resume_id = ?config.harvest.resume_id,
        delay_ms = config.harvest.delay_ms,
        retries = config.harvest.retries,
        "Starting harvester"
    );

    let app = App::new(config)?;
    let summary = app.run().await?;

    info!(
        output = %app.output().display(),
        pages = summary.pages,
        messages = summary.messages,
        "Done"
    );

    telemetry::shutdown();
    Ok(())
}
