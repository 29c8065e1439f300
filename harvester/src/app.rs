use crate::ingest::HttpTransport;
use crate::pipeline::{HarvestSummary, Pipeline};
use crate::sink::DelimitedFileSink;
use harvest_core::{Config, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct App {
    output: PathBuf,
    pipeline: Arc<Pipeline>,
}

impl App {
    #[instrument(skip(config), fields(symbol = %config.harvest.symbol))]
    pub fn new(config: Config) -> Result<Self> {
        info!("Initializing application");

        // Open the sink first so a bad output path fails before any request
        std::fs::create_dir_all(&config.output.dir)?;
        let output = config.output.file_for(&config.harvest.symbol);
        let sink = DelimitedFileSink::open(&output, config.output.delimiter)?;

        let transport = Arc::new(HttpTransport::new(&config.origin)?);

        let pipeline = Arc::new(Pipeline::new(transport, Box::new(sink), &config));

        Ok(Self { output, pipeline })
    }

    pub fn output(&self) -> &PathBuf {
        &self.output
    }

    pub async fn run(&self) -> Result<HarvestSummary> {
        info!(output = %self.output.display(), "Harvesting");
        Arc::clone(&self.pipeline).run().await
    }
}
