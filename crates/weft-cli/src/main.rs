//! `weft`: agent command line for the weft mesh overlay.

use std::{io, process::ExitCode};

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;
use weft_core::peer::PeerId;

mod login;
mod transport;

#[derive(Parser, Debug)]
#[command(name = "weft", version, about = "weft mesh overlay agent")]
struct Cli {
    /// Log filter, e.g. `info` or `weft_core=debug`
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in to the coordinator, registering this peer on first run
    Login {
        /// Setup key obtained from the coordinator dashboard; prompted for
        /// interactively when registration is needed and this is absent
        #[arg(long)]
        setup_key: Option<String>,

        /// Coordinator address, host:port
        #[arg(long, default_value = "127.0.0.1:33073")]
        management_addr: String,

        /// This peer's tunnel public key
        #[arg(long)]
        public_key: String,

        /// Machine name shown in the peer catalog
        #[arg(long, default_value = "")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Login { setup_key, management_addr, public_key, name } => {
            run_login(setup_key.as_deref(), &management_addr, &public_key, &name).await
        },
    }
}

async fn run_login(
    setup_key: Option<&str>,
    management_addr: &str,
    public_key: &str,
    name: &str,
) -> ExitCode {
    let local_key = match PeerId::new(public_key) {
        Ok(key) => key,
        Err(err) => {
            error!("failed parsing public key: {err}");
            return ExitCode::FAILURE;
        },
    };

    let name = if name.is_empty() {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "weft-agent".to_string())
    } else {
        name.to_string()
    };

    let client = transport::TcpManagementClient::new(management_addr, local_key, name);

    let prompt = || {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        login::prompt_setup_key(&mut input, &mut output)
    };

    match login::login_peer(&client, setup_key, prompt).await {
        Ok(response) => {
            println!("logged in: address {} on network {}", response.address, response.network);
            ExitCode::SUCCESS
        },
        Err(err) => {
            error!("failed logging in to coordinator: {err}");
            ExitCode::FAILURE
        },
    }
}
