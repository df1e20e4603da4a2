use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatroom::config::{Cli, Mode};
use chatroom::{terminal, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs, &cli.mode);

    match cli.mode {
        Mode::Serve(config) => {
            let server = Server::bind(&config)
                .await
                .context("chat server could not start")?;
            server
                .run_until(async {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        warn!(error = %err, "cannot listen for Ctrl-C, running until killed");
                        std::future::pending::<()>().await;
                    }
                    info!("received interrupt");
                })
                .await?;
        }
        Mode::Connect(config) => terminal::run(&config).await?,
    }
    Ok(())
}

fn init_logging(json: bool, mode: &Mode) {
    // The client shares the terminal with the conversation, so keep it quiet unless asked.
    let default = match mode {
        Mode::Serve(_) => "chatroom=info",
        Mode::Connect(_) => "chatroom=warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
