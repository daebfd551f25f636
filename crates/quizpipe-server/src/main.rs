use clap::Parser;
use quizpipe_server::{build_state, config::Cli, config::Config, router};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(&cli)?;
    let listen = config.listen;
    let state = build_state(config)?;

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(%listen, "quizpipe listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
