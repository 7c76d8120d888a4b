use clap::Parser;
use reachmap::Pipeline;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod args;
use args::Args;

fn setup_logging(level: &str) {
    // stdout carries correlation records, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(args.log_level());
    args.validate()?;

    let pipeline = Pipeline::new(args.to_options());

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(action = "signal", component = "cli", "Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    match pipeline.run().await {
        Ok(report) => {
            info!(
                action = "complete",
                component = "cli",
                urls_reachable = report.url_open_count,
                domains_reachable = report.domain_open_count,
                "Run finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(action = "abort", component = "cli", error = %e, "Run aborted");
            eprintln!("reachmap: {e}");
            std::process::exit(1);
        }
    }
}
