//! `octogrbl`
//!
//! Sends a job to a GRBL laser cutter through OctoPrint.

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::Context;
use clap::Parser;
use octogrbl::{DriverConfig, Job, OctoPrintGrbl, MODEL_NAME};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// A JSON driver configuration. Missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the G-code here instead of uploading it. `-` writes to stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// The OctoPrint API key. Overrides the configuration.
    #[arg(long)]
    api_key: Option<String>,

    /// The OctoPrint upload URL. Overrides the configuration.
    #[arg(long)]
    url: Option<String>,

    /// Start the job as soon as it is uploaded.
    #[arg(long)]
    autoplay: bool,

    /// A JSON job.
    job: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DriverConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DriverConfig::default(),
    };
    if let Some(api_key) = args.api_key {
        config.api_key = api_key;
    }
    if let Some(url) = args.url {
        config.upload_url = url;
    }
    config.autoplay |= args.autoplay;
    log::debug!("Using {MODEL_NAME} with {config:?}");

    let job: Job = serde_json::from_str(
        &fs::read_to_string(&args.job)
            .with_context(|| format!("Failed to read job {}", args.job.display()))?,
    )
    .with_context(|| format!("Invalid job {}", args.job.display()))?;

    let mut driver = OctoPrintGrbl::octoprint_grbl();
    *driver.config_mut() = config;

    match args.output {
        Some(path) if path.as_os_str() == "-" => {
            let mut stdout = io::stdout().lock();
            driver.write_job(&job, &mut stdout)?;
            stdout.flush()?;
        }
        Some(path) => {
            let artifact = driver.build_artifact(&job)?;
            fs::write(&path, artifact.payload())
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => driver
            .send_job(&job)
            .with_context(|| format!("Failed to send {}", args.job.display()))?,
    }

    Ok(())
}
