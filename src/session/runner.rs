//! The task that owns one [`Server`] and serializes everything touching it:
//! front-end commands, transport completions and pacer ticks.

use super::connection::{self, ConnectError, Established, TransportEvent, WriterSink};
use super::sendq::PACER_PERIOD;
use super::server::Server;
use crate::app::action::SessionCommand;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub struct SessionHandle {
    network: String,
    commands: mpsc::UnboundedSender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Returns `false` once the session task has stopped.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Disconnect and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
        if let Err(e) = self.task.await {
            tracing::error!(network = %self.network, error = %e, "session task panicked");
        }
    }
}

pub fn spawn_session(server: Server) -> SessionHandle {
    let network = server.network().to_string();
    let (commands, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(server, rx));
    SessionHandle {
        network,
        commands,
        task,
    }
}

async fn run(mut server: Server, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
    let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();
    let pacer = tokio::time::sleep(PACER_PERIOD);
    tokio::pin!(pacer);
    let mut pacer_armed = false;

    loop {
        if server.is_pacing() && !pacer_armed {
            pacer.as_mut().reset(Instant::now() + PACER_PERIOD);
            pacer_armed = true;
        }

        tokio::select! {
            command = commands.recv() => match command {
                None | Some(SessionCommand::Shutdown) => {
                    server.disconnect();
                    break;
                }
                Some(SessionCommand::Connect) => start_connect(&mut server, &transport_tx),
                Some(SessionCommand::Disconnect) => server.disconnect(),
                Some(SessionCommand::Input { context, text }) => server.handle_input(&context, &text),
                Some(SessionCommand::SendRaw { line }) => server.write_line(&line),
                Some(SessionCommand::Focus { context }) => server.set_front(context),
                Some(SessionCommand::CloseContext { context }) => server.close_context(&context),
            },
            Some(event) = transport_rx.recv() => on_transport(&mut server, event, &transport_tx),
            _ = &mut pacer, if pacer_armed => {
                pacer_armed = false;
                server.pacer_tick();
            }
        }
    }
    tracing::debug!(network = %server.network(), "session task finished");
}

fn start_connect(server: &mut Server, transport: &mpsc::UnboundedSender<TransportEvent>) {
    let target = server.begin_connect();
    let tx = transport.clone();
    tokio::spawn(async move {
        let generation = target.generation;
        let event = match connection::connect(&target).await {
            Ok(established) => TransportEvent::Connected {
                generation,
                established,
            },
            Err(ConnectError::Cancelled) => return,
            Err(e) => TransportEvent::ConnectFailed {
                generation,
                error: e.to_string(),
            },
        };
        let _ = tx.send(event);
    });
}

fn on_transport(
    server: &mut Server,
    event: TransportEvent,
    transport: &mpsc::UnboundedSender<TransportEvent>,
) {
    match event {
        TransportEvent::Connected {
            generation,
            established,
        } => {
            let Established {
                reader,
                writer,
                local_port,
            } = established;
            let sink = WriterSink::spawn(generation, writer, transport.clone());
            match server.on_connected(generation, Box::new(sink), local_port) {
                Some(cancel) => {
                    connection::spawn_reader(generation, reader, cancel, transport.clone());
                }
                None => tracing::debug!(generation, "discarding stale connection"),
            }
        }
        TransportEvent::ConnectFailed { generation, error } => {
            server.connect_failed(generation, &error)
        }
        TransportEvent::Line { generation, bytes } => server.handle_raw_line(generation, &bytes),
        TransportEvent::Closed { generation, reason } => {
            server.connection_lost(generation, reason.as_deref())
        }
    }
}
