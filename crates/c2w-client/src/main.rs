//! c2w CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use c2w_core::{TracingConfig, init_tracing};

use c2w_client::cli::{Cli, Command, ConfigAction};
use c2w_client::commands;
use c2w_client::commands::server::ServerOverrides;
use c2w_client::config::ClientConfig;
use c2w_client::error::ClientResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing = match &cli.command {
        _ if cli.debug => TracingConfig::cli_debug(),
        Command::Server { json_logs: true, .. } => TracingConfig::server(),
        Command::Server { .. } => TracingConfig::default(),
        _ => TracingConfig::interactive(),
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let config = if cli.config.is_some() {
        ClientConfig::load_from(&config_path)?
    } else {
        ClientConfig::load()?
    };

    match cli.command {
        Command::Server {
            port,
            transport,
            bind,
            loss,
            seed,
            retransmit_ms,
            max_retransmits,
            json_logs: _,
        } => {
            let server_config = commands::server::build_config(
                &config.server,
                ServerOverrides {
                    port,
                    transport,
                    bind,
                    loss,
                    seed,
                    retransmit_ms,
                    max_retransmits,
                },
            )?;
            commands::server::run(server_config).await
        }
        Command::Connect {
            host,
            port,
            transport,
            user,
            loss,
            retransmit_ms,
        } => {
            let mut settings = config.client.clone();
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(transport) = transport {
                settings.transport = transport;
            }
            if let Some(loss) = loss {
                settings.loss = loss;
            }
            if let Some(ms) = retransmit_ms {
                settings.retransmit_interval_ms = ms;
            }
            settings.validate()?;

            let options = settings.to_connect_options();
            commands::connect::run(options, user.or(settings.user_name)).await
        }
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &config_path),
            ConfigAction::Path => commands::config::path(&config_path),
        },
    }
}
