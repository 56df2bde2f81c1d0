//! wordpage-server: serve a word list in pages to one client.

use std::process::ExitCode;
use tracing::info;
use wordpage::config::ServerConfig;
use wordpage::server::Server;
use wordpage::store::WordStore;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    wordpage::init_logging(&config.log_level);

    info!(
        host = %config.server_ip,
        port = config.server_port,
        filename = %config.filename.display(),
        keep_alive = config.keep_alive,
        "Starting wordpage server"
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> wordpage::Result<()> {
    let store = WordStore::load(&config.filename)?;
    let server = Server::bind(&config, store).await?;
    server.run().await
}
