//! Murmur Herald CLI - watches a Murmur log and announces arrivals to IRC.
//!
//! This is the binary entry point. See the `murmur_herald` library for the
//! core functionality.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use murmur_herald::{irc, Config, IrcConfig, LogSource, Session, SessionEvent};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "murmur-herald")]
#[command(version)]
#[command(about = "Announces new Mumble arrivals to an IRC channel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the Murmur log and announce new arrivals
    Run {
        /// Murmur server log file to watch
        #[arg(long)]
        log_file: Option<PathBuf>,
        /// IRC server hostname
        #[arg(long)]
        server: Option<String>,
        /// IRC server port
        #[arg(long)]
        port: Option<u16>,
        /// IRC nickname
        #[arg(long)]
        nick: Option<String>,
        /// Channel to announce to
        #[arg(long)]
        channel: Option<String>,
        /// Minimum seconds between announcements
        #[arg(long)]
        min_delay: Option<u64>,
        /// Log raw IRC protocol frames at debug level
        #[arg(long)]
        verbose_protocol: bool,
    },
    /// Print the resolved configuration
    Config,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            log_file,
            server,
            port,
            nick,
            channel,
            min_delay,
            verbose_protocol,
        } => {
            let mut config = Config::load()?;
            if let Some(log_file) = log_file {
                config.log_file = log_file;
                config.expand_log_path();
            }
            if let Some(server) = server {
                config.irc_server = server;
            }
            if let Some(port) = port {
                config.irc_port = port;
            }
            if let Some(nick) = nick {
                config.irc_nick = nick;
            }
            if let Some(channel) = channel {
                config.channel = channel;
            }
            if let Some(min_delay) = min_delay {
                config.min_delay = min_delay;
            }
            if verbose_protocol {
                config.verbose_protocol = true;
            }

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run(config))
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    log::info!(
        "murmur-herald v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(256);

    let chat = irc::connect(
        IrcConfig {
            server: config.irc_server.clone(),
            port: config.irc_port,
            nick: config.irc_nick.clone(),
            password: config.irc_password.clone(),
            channel: config.channel.clone(),
            verbose: config.verbose_protocol,
        },
        events_tx.clone(),
    )
    .await
    .context("failed to connect to IRC")?;

    let mut session = Session::new(
        config.channel.clone(),
        Duration::from_secs(config.min_delay),
        chat,
        LogSource::new(config.log_file.clone()),
        events_tx.clone(),
    );

    let offset = session.prime().await?;
    session.start_follow(offset)?;

    spawn_signal_forwarders(events_tx)?;

    session.run(events_rx).await
}

/// SIGHUP re-arms log following; SIGINT/SIGTERM request shutdown.
fn spawn_signal_forwarders(events_tx: mpsc::Sender<SessionEvent>) -> Result<()> {
    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let restart_tx = events_tx.clone();
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            if restart_tx.send(SessionEvent::RestartFollow).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        let _ = events_tx.send(SessionEvent::Shutdown).await;
    });

    Ok(())
}
