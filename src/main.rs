//! dialtone - Kommandozeilen-Client
//!
//! Verbindet sich als `--username` mit dem Relay und liest Befehle von stdin:
//! `call <user>`, `hangup`, `status`, `log`, `quit`.

use anyhow::{Context, Result};
use clap::Parser;
use dialtone::media::{CpalMediaGate, RemotePlayback};
use dialtone::signaling::SignalingChannel;
use dialtone::{CallSession, ClientConfig, DriverHandle, SessionDriver, StatusBoard, StatusSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "dialtone")]
#[command(about = "Peer-to-peer audio calls through a signaling relay")]
struct Cli {
    /// Name, unter dem der Relay uns kennt
    #[arg(short, long)]
    username: String,

    /// Relay-URL (überschreibt SIGNALING_URL)
    #[arg(long)]
    relay: Option<String>,

    /// ICE-Server, kommagetrennt (überschreibt ICE_SERVERS)
    #[arg(long, value_delimiter = ',')]
    ice_servers: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Call(String),
    Hangup,
    Status,
    Log,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (None, _) => Self::Empty,
            (Some("call"), Some(remote)) => Self::Call(remote.to_string()),
            (Some("hangup"), None) => Self::Hangup,
            (Some("status"), None) => Self::Status,
            (Some("log"), None) => Self::Log,
            (Some("quit") | Some("exit"), None) => Self::Quit,
            _ => Self::Unknown(line.trim().to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dialtone::init_tracing();
    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(relay) = cli.relay {
        config.relay_url = relay;
    }
    if !cli.ice_servers.is_empty() {
        config.ice_servers = cli.ice_servers;
    }
    tracing::debug!("Using configuration: {:?}", config);

    let (channel, channel_rx) = SignalingChannel::new(config.relay_url.clone());
    let status = StatusBoard::new(config.event_log_capacity);
    let (mut session, session_rx) = CallSession::new(
        Arc::new(channel),
        Arc::new(config.engine_factory()),
        Arc::new(CpalMediaGate::new()),
        Arc::new(RemotePlayback::new()),
        status,
    );

    session
        .connect(&cli.username)
        .await
        .with_context(|| format!("Failed to start session as '{}'", cli.username))?;

    let (driver, handle) = SessionDriver::new(session, session_rx, channel_rx);
    let mut driver_task = tokio::spawn(driver.run());
    spawn_status_printer(&handle);

    println!("Connected as {}. Commands: call <user>, hangup, status, log, quit", cli.username);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut driver_done = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    let _ = handle.disconnect();
                    break;
                };
                if !run_command(&handle, Command::parse(&line)) {
                    break;
                }
            }
            result = &mut driver_task => {
                result.context("Session driver panicked")?;
                driver_done = true;
                break;
            }
        }
    }

    if !driver_done {
        match tokio::time::timeout(Duration::from_secs(5), driver_task).await {
            Ok(result) => {
                result.context("Session driver panicked")?;
            }
            Err(_) => tracing::warn!("Relay did not close the channel in time"),
        }
    }

    Ok(())
}

/// Führt einen Befehl aus; `false` beendet die Eingabeschleife
fn run_command(handle: &DriverHandle, command: Command) -> bool {
    let submitted = match command {
        Command::Call(remote) => handle.dial(remote),
        Command::Hangup => handle.hang_up(),
        Command::Status => {
            print_snapshot(&handle.snapshot());
            Ok(())
        }
        Command::Log => {
            for entry in handle.journal().iter().rev() {
                println!("{} {}", entry.at.format("%H:%M:%S"), entry.text);
            }
            Ok(())
        }
        Command::Quit => {
            let _ = handle.disconnect();
            return false;
        }
        Command::Empty => Ok(()),
        Command::Unknown(line) => {
            println!("Unknown command: {}", line);
            Ok(())
        }
    };

    if let Err(e) = submitted {
        println!("{}", e);
        return false;
    }
    true
}

fn spawn_status_printer(handle: &DriverHandle) {
    let mut status = handle.status();
    tokio::spawn(async move {
        let mut previous = status.borrow_and_update().clone();
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();

            if current.last_message != previous.last_message {
                if let Some(message) = &current.last_message {
                    println!("> {}", message);
                }
            }
            if current.session != previous.session
                || current.call != previous.call
                || current.remote != previous.remote
            {
                print_snapshot(&current);
            }
            previous = current;
        }
    });
}

fn print_snapshot(snapshot: &StatusSnapshot) {
    match &snapshot.remote {
        Some(remote) => println!(
            "[{}] call: {} ({})",
            snapshot.session, snapshot.call, remote
        ),
        None => println!("[{}] call: {}", snapshot.session, snapshot.call),
    }
}
