use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use chat_relay::{
    cli::{Cli, Command, ServeArgs},
    client,
    relay::Relay,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.relay_config();
    config.validate()?;

    let http = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let mut server = Server::new(http, Relay::shared(config.clone()));

    if let Some(addr) = args.tcp_listen {
        let lines = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        server = server.with_line_listener(lines);
    }

    let http_addr = server.http_addr()?;
    info!(
        topic = %config.topic_name,
        "websocket endpoint at ws://{}{}",
        http_addr,
        config.endpoint_path
    );
    if let Some(addr) = server.line_addr().transpose()? {
        info!("line protocol listening on {}", addr);
    }

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
