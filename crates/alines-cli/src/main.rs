//! ALINES CLI
//!
//! Serve menus to remote clients, or answer them from a terminal.

mod answer;
mod config;
mod script;

use alines_core::{
    ClientError, Menu, MenuClient, MenuOptions, MenuServer, Selection, ServerMessage,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use config::Config;
use script::Script;

/// ALINES - remote menus over TCP
#[derive(Parser)]
#[command(name = "alines")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a single menu and print the answer
    Menu {
        /// Menu title
        #[arg(required = true)]
        title: String,

        /// Menu entries
        #[arg(required = true)]
        entries: Vec<String>,

        /// Allow selecting several entries
        #[arg(long)]
        multi: bool,

        /// Allow a free-text answer
        #[arg(long)]
        custom: bool,

        /// Preselected entry (0-based)
        #[arg(long)]
        selected: Option<usize>,

        /// Client password (overrides the config file)
        #[arg(long)]
        password: Option<String>,

        /// Listen port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Serve every menu of a script file in order
    Script {
        /// Script file
        #[arg(required = true)]
        file: PathBuf,

        /// Client password (overrides the config file)
        #[arg(long)]
        password: Option<String>,

        /// Listen port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Connect to a server and answer its menus from stdin
    Client {
        /// Server address (host:port)
        #[arg(required = true)]
        addr: String,

        /// Password to send after connecting
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Validate configuration
    config.validate()?;

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Menu {
            title,
            entries,
            multi,
            custom,
            selected,
            password,
            port,
        } => {
            let options = MenuOptions {
                allow_multi: multi,
                allow_custom: custom,
                selected_index: selected,
            };
            let menu = Menu::new(title, entries).with_options(options);
            menu.validate()?;
            serve_menus(vec![menu], password, port, &config).await?;
        }
        Commands::Script {
            file,
            password,
            port,
        } => {
            let script = Script::load(&file)?;
            let menus = script.menus.iter().map(script::ScriptMenu::to_menu).collect();
            serve_menus(menus, password, port, &config).await?;
        }
        Commands::Client { addr, password } => {
            run_client(addr, password, &config).await?;
        }
    }

    Ok(())
}

/// Serve menus one after another, printing each answer
async fn serve_menus(
    menus: Vec<Menu>,
    password: Option<String>,
    port: Option<u16>,
    config: &Config,
) -> anyhow::Result<()> {
    let server = MenuServer::with_config(config.server_config()?);
    let password = password.or_else(|| config.server.password.clone());
    let addr = server.start(password, port).await?;
    println!("Listening on {addr}");

    let result = async {
        for menu in menus {
            let title = menu.title.clone();
            let response = server.open(menu).await?;
            info!(%title, "menu opened");

            tokio::select! {
                selection = response => {
                    println!("response: {selection}");
                    if matches!(selection, Selection::Cancelled) {
                        break;
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    println!("Interrupted");
                    break;
                }
            }
        }
        anyhow::Ok(())
    }
    .await;

    server.stop().await;
    result
}

/// Answer menus from stdin until the server goes away
async fn run_client(
    addr: String,
    password: Option<String>,
    config: &Config,
) -> anyhow::Result<()> {
    // The server expects a password frame even when it has no password
    let password = password
        .or_else(|| config.server.password.clone())
        .unwrap_or_default();
    let mut client = MenuClient::connect_with_password(&addr, &password).await?;
    println!("Connected to {addr}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            msg = client.recv() => match msg {
                Ok(ServerMessage::MenuOpen(menu)) => println!("{}", answer::render_menu(&menu)),
                Ok(ServerMessage::MenuClose) => println!("Menu closed"),
                Ok(ServerMessage::Disconnect { reason }) => {
                    println!("Disconnected: {reason}");
                    break;
                }
                Err(ClientError::Closed) => {
                    println!("Connection closed");
                    break;
                }
                Err(e) => return Err(e.into()),
            },
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                let Some(menu) = client.current_menu() else {
                    println!("No menu open");
                    continue;
                };
                match answer::parse_answer(&line, menu) {
                    Ok(response) => client.respond(&response).await?,
                    Err(e) => warn!("{e}"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    client.close().await?;
    Ok(())
}
