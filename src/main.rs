mod app;
mod config;
mod identd;
mod irc;
mod logging;
mod session;

use crate::app::action::SessionCommand;
use crate::app::event::SessionEvent;
use crate::app::handler::{ConsoleAction, ConsoleState};
use crate::config::{NetworkConfig, SettingsLookup};
use crate::logging::TranscriptLogger;
use crate::session::{spawn_session, Server, SessionHandle};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load_config()?;
    logging::init_tracing(&cfg.logging);

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("--write-config") {
        config::save_config(&cfg)?;
        println!("Wrote {}", config::config_path().display());
        return Ok(());
    }

    let networks: Vec<&NetworkConfig> = match arg.as_deref() {
        Some(name) => vec![cfg
            .network(name)
            .with_context(|| format!("No network named {:?} in {}", name, config::config_path().display()))?],
        None => cfg.networks.iter().filter(|n| n.auto_connect).collect(),
    };
    if networks.is_empty() {
        eprintln!("No network to connect to: name one on the command line or set auto_connect.");
        return Ok(());
    }

    let ident = if cfg.identd.enabled {
        match identd::start(&cfg.identd).await {
            Ok(service) => Some(service),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "identd disabled");
                None
            }
        }
    } else {
        None
    };

    let settings: Arc<dyn SettingsLookup> = Arc::new(cfg.settings.clone());
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let mut sessions = Vec::with_capacity(networks.len());
    for network in &networks {
        let mut server = Server::new((*network).clone(), Arc::clone(&settings), event_tx.clone());
        if let Some(ident) = &ident {
            server = server.with_ident(ident.clone());
        }
        let handle = spawn_session(server);
        handle.send(SessionCommand::Connect);
        sessions.push(handle);
    }
    drop(event_tx);

    let console = ConsoleState::new(networks.iter().map(|n| n.name.clone()).collect());
    let transcript = TranscriptLogger::new(&cfg.logging);
    let result = run_console(&sessions, console, event_rx, transcript).await;

    futures::future::join_all(sessions.into_iter().map(SessionHandle::shutdown)).await;
    result
}

async fn run_console(
    sessions: &[SessionHandle],
    mut console: ConsoleState,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut transcript: TranscriptLogger,
) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let actions = tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if let SessionEvent::Print(print) = &event {
                        transcript.log_event(print);
                    }
                    console.handle_event(event)
                }
                None => break,
            },
            line = stdin.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => console.handle_input(&line),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        for action in actions {
            match action {
                ConsoleAction::Print(line) => println!("{}", line),
                ConsoleAction::Send { network, command } => {
                    match sessions.iter().find(|s| s.network() == network) {
                        Some(session) => {
                            if !session.send(command) {
                                tracing::warn!(network = %network, "session is gone");
                            }
                        }
                        None => tracing::debug!(network = %network, "no session for network"),
                    }
                }
                ConsoleAction::Exit => return Ok(()),
            }
        }
    }
    Ok(())
}
