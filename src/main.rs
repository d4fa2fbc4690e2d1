use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("bbs_server=info".parse()?))
        .init();

    let config = bbs_server::config::ServerConfig::parse();
    tracing::info!("Starting BBS server on {}", config.listen_addr());
    if config.require_auth {
        tracing::info!("Authentication required for chat");
    }

    let server = bbs_server::server::Server::new(config);
    tokio::select! {
        result = server.run() => result,
        _ = shutdown_signal() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
