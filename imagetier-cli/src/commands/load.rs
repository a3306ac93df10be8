//! Load a single image through memory, disk and network.

use clap::Args;
use imagetier::config::format_size;
use imagetier::LoadResult;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for `imagetier load`.
#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Image URL
    pub url: String,

    /// Requested width in pixels (0 keeps the source width)
    #[arg(long, default_value_t = 0)]
    pub width: u32,

    /// Requested height in pixels (0 keeps the source height)
    #[arg(long, default_value_t = 0)]
    pub height: u32,

    /// Config file to use instead of the per-user one
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Run the load command. Must be called inside the tokio runtime.
pub async fn run(args: LoadArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(args.config.as_deref())?;
    runner.log_startup("load");
    let loader = runner.create_loader()?;

    println!("Loading {}", args.url);
    let started = Instant::now();
    let (_handle, rx) = loader.load_async(&args.url, args.width, args.height, None)?;
    let event = rx.await.map_err(|_| CliError::LoadCanceled {
        url: args.url.clone(),
    })?;
    let elapsed = started.elapsed();

    let outcome = match event.result {
        LoadResult::Succeeded(resource) => {
            info!(
                url = %args.url,
                width = resource.width(),
                height = resource.height(),
                elapsed_ms = elapsed.as_millis() as u64,
                "image loaded"
            );
            println!(
                "✓ Loaded {}x{} ({}) in {:.2?}",
                resource.width(),
                resource.height(),
                format_size(resource.byte_size()),
                elapsed
            );
            Ok(())
        }
        LoadResult::Failed(reason) => {
            warn!(url = %args.url, %reason, "image load failed");
            Err(CliError::LoadFailed {
                url: args.url.clone(),
                reason,
            })
        }
        LoadResult::Canceled => Err(CliError::LoadCanceled {
            url: args.url.clone(),
        }),
    };

    if let Ok(report) = loader.cache_report() {
        println!();
        println!("{}", report);
    }
    loader.destroy();
    outcome
}
