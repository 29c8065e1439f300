pub mod app;
pub mod bootstrap;
pub mod gate;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod poller;
pub mod processor;
pub mod session;
pub mod sink;

pub use app::App;
pub use pipeline::{HarvestSummary, Pipeline};
