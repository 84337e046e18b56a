use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::error;

use crate::engine::{PipelineError, ReleasePipeline};
use crate::engine::state::RunSummary;
use crate::env::Settings;
use crate::index::SimpleIndex;
use crate::networking::HttpTransport;

mod engine;
mod env;
mod extract;
mod hashing;
mod index;
mod networking;
mod storage;
#[cfg(test)]
mod testing;
mod versioning;

#[derive(Parser, Debug)]
#[command(
    name = "nbstatic-fetch",
    author,
    version,
    about = "Extract the notebook static assets of every published release",
    long_about = "Downloads the wheel of every release of a package from a Python package \
index, verifies it against the published hash, and extracts its `notebook/static/` tree \
into <OUTPUT>/<version>/.\n\nWheels are cached under NBSTATIC_CACHE_DIR. The cache has \
no locking, so do not run several instances against the same cache directory at once."
)]
struct Cli {
    /// Base directory receiving one sub-directory per version.
    #[arg(default_value = ".")]
    output: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::from_env(cli.output);
    match run(settings).await {
        // Per-version failures are already counted in the pipeline's
        // summary line and do not change the exit status.
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<RunSummary, PipelineError> {
    let transport = HttpTransport::new();
    let project = SimpleIndex::new(&settings.index_url)
        .get_project(&transport, &settings.package)
        .await?;
    ReleasePipeline::new(&settings, transport).run(&project).await
}
