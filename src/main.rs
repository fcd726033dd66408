use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use expert_server::cli::{format_dry_run, log_filter, Args};
use expert_server::config::{collect_options, resolve};
use expert_server::lifecycle::{LifecycleController, Termination};
use expert_server::node::ExpertServerFactory;

const EXIT_CONFIG_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = log_filter(args.verbose);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Resolve the launch plan before touching anything
    let plan = match collect_options(args.config.as_deref(), args.to_raw_options())
        .and_then(resolve)
    {
        Ok(plan) => plan,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(EXIT_CONFIG_ERROR);
        }
    };

    // Dry-run mode: print the plan and exit
    if args.dry_run {
        println!("{}", format_dry_run(&plan));
        return;
    }

    let mut controller = LifecycleController::new(plan, ExpertServerFactory);

    match controller.run().await {
        Ok(Termination::Interrupted) | Ok(Termination::Cancelled) => {
            info!("Shutdown complete");
        }
        Ok(Termination::NodeExited) => {
            info!("Node exited, shutdown complete");
        }
        Err(e) => {
            error!("{}", e);
            process::exit(e.exit_code());
        }
    }
}
