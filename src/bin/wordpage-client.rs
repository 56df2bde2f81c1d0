//! wordpage-client: fetch a word list page by page and report frequencies.

use std::process::ExitCode;
use tracing::info;
use wordpage::client::{self, ClientSession};
use wordpage::config::ClientConfig;
use wordpage::frequency::render_report;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match ClientConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    wordpage::init_logging(&config.log_level);

    info!(
        server_ip = %config.server_ip,
        server_port = config.server_port,
        p = config.offset,
        k = config.stride,
        run_once = config.run_once,
        "Starting wordpage client"
    );

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &ClientConfig) -> wordpage::Result<()> {
    let stream = client::connect(config).await?;
    let report = ClientSession::new(stream, config).run().await?;

    if !config.quiet {
        print!("{}", render_report(report.elapsed, &report.frequencies()));
    }
    Ok(())
}
