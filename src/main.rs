mod client;
mod config;
mod grouped;
mod lines;
mod phase;
mod protocol;
mod render;
mod server;
mod turn;
mod ui;

use clap::{Parser, Subcommand};
use client::AskClient;
use config::{ApiBase, BUILD_API_BASE, Backend};
use grouped::StageGroups;
use protocol::Event;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use turn::Turn;

type MainResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Terminal client for the PCI DSS compliance agent.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Backend base URL; overrides the value baked in at build time.
    #[arg(long, global = true, env = "PCICHAT_BACKEND")]
    backend: Option<String>,

    /// Origin the client is served from. An http backend on the same host
    /// as an https origin is upgraded to https.
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Use the mock pipeline (/ask_mock_full) instead of the live one.
    #[arg(long, global = true)]
    mock: bool,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask one question and print the streamed response.
    Ask {
        question: String,

        /// Print events grouped by stage instead of the final turn.
        #[arg(long)]
        grouped: bool,
    },
    /// Interactive chat.
    Chat,
    /// Serve the mock backend.
    ServeMock {
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: String,

        /// Delay between streamed lines, in milliseconds.
        #[arg(long, default_value_t = 40)]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let backend = if cli.mock {
        Backend::Mock
    } else {
        Backend::Live
    };

    match cli.command {
        Command::ServeMock { listen, delay_ms } => {
            server::run(server::ServerConfig {
                listen,
                line_delay: Duration::from_millis(delay_ms),
            })
            .await
        }
        Command::Ask { question, grouped } => {
            let base = ApiBase::resolve(
                cli.backend.as_deref(),
                BUILD_API_BASE,
                cli.origin.as_deref(),
            )?;
            ask(AskClient::new(base), backend, question, grouped).await
        }
        Command::Chat => {
            let base = ApiBase::resolve(
                cli.backend.as_deref(),
                BUILD_API_BASE,
                cli.origin.as_deref(),
            )?;
            ui::run_tui(AskClient::new(base), backend)
        }
    }
}

fn init_tracing(cli: &Cli) -> MainResult<()> {
    let default = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match &cli.log_file {
        Some(path) => {
            let file = std::fs::File::options()
                .create(true)
                .append(true)
                .open(path)?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init();
        }
        // Stderr would scribble over the TUI.
        None if matches!(cli.command, Command::Chat) => {}
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
    Ok(())
}

async fn ask(client: AskClient, backend: Backend, question: String, grouped: bool) -> MainResult<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut groups = StageGroups::new();
    let mut stdout = std::io::stdout();
    let turn = client
        .ask(backend, Turn::new(question), &cancel, |_, event| {
            if !grouped {
                if let Event::Token { text, .. } = event {
                    let _ = write!(stdout, "{text}");
                    let _ = stdout.flush();
                }
            }
            groups.push(event.clone());
        })
        .await;

    if grouped {
        print!("{}", render::groups(&groups.finish()));
    } else {
        println!("\n");
        print!("{}", render::turn(&turn));
    }

    if turn.error.is_some() {
        std::process::exit(1);
    }
    Ok(())
}
