use std::error::Error;

use draccus_core::config::{Options, Settings};
use draccus_core::tools;
use draccus_sqs::queue::{SqsQueue, SqsQueueBuilder};
use tokio::io::BufReader;
use tracing::{error, info};

use crate::cmdline::Invocation;

mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    let invocation = cmdline::parse(&matches);

    setup_tracing::register(
        invocation
            .as_ref()
            .ok()
            .and_then(|invocation| invocation.options().log_file.as_deref()),
    )?;

    let result = match invocation {
        Ok(invocation) => run(invocation).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        error!("{e}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run(invocation: Invocation) -> Result<(), Box<dyn Error>> {
    match invocation {
        Invocation::Drain(options) => {
            info!(?options, "Starting drain");
            let settings = Settings::try_from(options)?;
            draccus_core::run(settings).await?;
        }
        Invocation::FillQueue { options, batches } => {
            let queue = resolve_queue(&options).await?;
            tools::fill_queue(&queue, batches).await?;
        }
        Invocation::Replay(options) => {
            let queue = resolve_queue(&options).await?;
            tools::replay(&queue, BufReader::new(tokio::io::stdin())).await?;
        }
    }
    Ok(())
}

async fn resolve_queue(options: &Options) -> Result<SqsQueue, Box<dyn Error>> {
    let queue_name = options.queue_name()?;
    let queue = SqsQueueBuilder::new(queue_name.clone())
        .config(options.sqs_client_config()?)
        .build()
        .await
        .map_err(|e| format!("Unable to resolve queue {queue_name:?}: {e}"))?;
    Ok(queue)
}
