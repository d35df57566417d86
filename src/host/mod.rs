//! The authoritative host: a single-threaded tick loop that owns the match

pub mod room;

pub use room::{ContextSettings, MatchContext};

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::MatchPhase;
use crate::lobby::{ApprovalResponse, ConnectionId};
use crate::util::time::{tick_delta, TICK_DURATION_MICROS};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Everything network tasks can ask of the host
#[derive(Debug)]
pub enum HostInput {
    /// Approval request; the host always answers
    Connect {
        connection: ConnectionId,
        reply: oneshot::Sender<(ApprovalResponse, ServerMsg)>,
    },
    Disconnect {
        connection: ConnectionId,
    },
    Client {
        connection: ConnectionId,
        msg: ClientMsg,
    },
    /// Host a new room from the neutral state
    OpenRoom,
}

/// Read-only view of the host for HTTP handlers
#[derive(Debug, Clone, Serialize)]
pub struct HostStatus {
    pub generation: u64,
    pub match_id: Uuid,
    pub phase: MatchPhase,
    pub roster_size: usize,
}

/// Cloneable handle used by the network side
#[derive(Clone)]
pub struct HostHandle {
    pub input_tx: mpsc::Sender<HostInput>,
    pub events_tx: broadcast::Sender<ServerMsg>,
    status: Arc<RwLock<HostStatus>>,
}

impl HostHandle {
    pub fn status(&self) -> HostStatus {
        self.status.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.events_tx.subscribe()
    }
}

/// Owns the current match context and rebuilds it after every teardown
pub struct HostLoop {
    settings: ContextSettings,
    auto_open_room: bool,
    input_rx: mpsc::Receiver<HostInput>,
    events_tx: broadcast::Sender<ServerMsg>,
    status: Arc<RwLock<HostStatus>>,
}

impl HostLoop {
    pub fn new(settings: ContextSettings, auto_open_room: bool) -> (Self, HostHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(64);
        let status = Arc::new(RwLock::new(HostStatus {
            generation: 0,
            match_id: Uuid::nil(),
            phase: MatchPhase::Lobby,
            roster_size: 0,
        }));

        let handle = HostHandle {
            input_tx,
            events_tx: events_tx.clone(),
            status: status.clone(),
        };
        let host = Self {
            settings,
            auto_open_room,
            input_rx,
            events_tx,
            status,
        };
        (host, handle)
    }

    fn build_context(&self, generation: u64) -> MatchContext {
        let context = MatchContext::new(generation, &self.settings);
        if self.auto_open_room {
            context.open_room();
        }
        context
    }

    /// Run the authoritative tick loop. Must be spawned on a `LocalSet`.
    pub async fn run(mut self) {
        let mut context = self.build_context(1);
        info!(match_id = %context.match_id(), "Host loop started");

        let tick_duration = Duration::from_micros(TICK_DURATION_MICROS);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            // Drain input queue
            if !self.process_inputs(&mut context) {
                info!("Input channel closed, stopping host loop");
                break;
            }

            let report = context.fixed_tick(tick_delta());
            for msg in report.broadcast {
                // No receivers just means nobody is connected
                let _ = self.events_tx.send(msg);
            }
            // Sockets are only told to close once the final state is queued for them
            if context.release_session() {
                debug!(match_id = %context.match_id(), "Session released after final broadcast");
            }

            if let Some(reason) = report.reset {
                let generation = context.generation() + 1;
                info!(reason = ?reason, generation, "Resetting match context");
                context.close();
                context = self.build_context(generation);
            }

            self.publish_status(&context);
        }

        context.close();
    }

    /// Returns false once every sender is gone
    fn process_inputs(&mut self, context: &mut MatchContext) -> bool {
        loop {
            let input = match self.input_rx.try_recv() {
                Ok(input) => input,
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            };

            match input {
                HostInput::Connect { connection, reply } => {
                    let answer = context.request_connection(connection);
                    if reply.send(answer).is_err() {
                        // Socket went away while waiting; treat as a disconnect
                        debug!(connection = %connection, "Approval reply dropped");
                        context.disconnect(connection);
                    }
                }
                HostInput::Disconnect { connection } => context.disconnect(connection),
                HostInput::Client { connection, msg } => context.handle_client(connection, msg),
                HostInput::OpenRoom => {
                    if context.phase() == MatchPhase::Lobby {
                        context.open_room();
                    } else {
                        warn!(phase = ?context.phase(), "Room already in use, not reopening");
                    }
                }
            }
        }
    }

    fn publish_status(&self, context: &MatchContext) {
        let mut status = self.status.write();
        status.generation = context.generation();
        status.match_id = context.match_id();
        status.phase = context.phase();
        status.roster_size = context.roster_size();
    }
}
