use tidechat::chat::config::ServerConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("tidechat line-protocol chat relay");

    // Settings come from TIDECHAT_* environment variables; bad values stop
    // startup before anything binds.
    let config = ServerConfig::from_env()?;
    if let Some(path) = &config.log_file {
        info!(path = %path.display(), "appending chat log");
    }

    tidechat::chat::server::run(&config).await
}
