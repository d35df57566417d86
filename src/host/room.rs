//! One match worth of wiring: bus, components, and the outbound message queue

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{publish_all, topics, BusEvent, EventBus, Subscriptions};
use crate::game::physics::Vec2;
use crate::game::{
    CombatSystem, MatchMirror, MatchOrchestrator, MatchPatch, MatchPhase, MatchRules,
    PlayerSystem, SnapshotBuilder, SpatialQuery,
};
use crate::lobby::{ApprovalResponse, ConnectionAdmission, ConnectionId, LocalRole};
use crate::session::{ResetReason, SessionService, SessionTransport, ShutdownCoordinator};
use crate::util::time::{unix_millis, SIMULATION_TPS, SNAPSHOT_TPS};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// What a match context is built from
#[derive(Clone)]
pub struct ContextSettings {
    pub rules: MatchRules,
    pub transport: Rc<dyn SessionTransport>,
    pub spatial: Rc<dyn SpatialQuery>,
    pub seed: u64,
}

/// Result of one host tick
#[derive(Debug, Default)]
pub struct TickReport {
    /// Messages for every connected participant, in commit order
    pub broadcast: Vec<ServerMsg>,
    /// Set once teardown has settled and the context must be replaced
    pub reset: Option<ResetReason>,
}

/// Everything that lives for exactly one match. Dropping it releases every
/// subscription, so nothing leaks into the next match.
pub struct MatchContext {
    generation: u64,
    match_id: Uuid,
    bus: Rc<EventBus>,
    admission: Rc<RefCell<ConnectionAdmission>>,
    orchestrator: Rc<RefCell<MatchOrchestrator>>,
    players: Rc<RefCell<PlayerSystem>>,
    combat: CombatSystem,
    session: Rc<RefCell<SessionService>>,
    recovery: Rc<RefCell<ShutdownCoordinator>>,
    outbox: Rc<RefCell<Vec<ServerMsg>>>,
    tick: Rc<Cell<u64>>,
    snapshots: SnapshotBuilder,
    subscriptions: Subscriptions,
}

impl MatchContext {
    pub fn new(generation: u64, settings: &ContextSettings) -> Self {
        let match_id = Uuid::new_v4();
        let rules = settings.rules.clone();
        let bus = Rc::new(EventBus::new());

        let session = SessionService::attach(&bus, settings.transport.clone(), rules.capacity);
        let admission = ConnectionAdmission::attach(&bus, rules.capacity, LocalRole::Host);
        let orchestrator = MatchOrchestrator::attach(
            &bus,
            match_id,
            rules.clone(),
            settings.spatial.clone(),
            settings.seed,
        );
        let players = PlayerSystem::attach(
            &bus,
            rules.clone(),
            settings.spatial.clone(),
            settings.seed.wrapping_add(1),
        );
        let recovery = ShutdownCoordinator::attach(&bus, settings.transport.clone());

        let outbox = Rc::new(RefCell::new(Vec::new()));
        let tick = Rc::new(Cell::new(0));
        let subscriptions = Self::bridge(&bus, &outbox, &tick);

        info!(match_id = %match_id, generation, "Match context created");

        Self {
            generation,
            match_id,
            bus,
            admission,
            orchestrator,
            players,
            combat: CombatSystem::new(rules),
            session,
            recovery,
            outbox,
            tick,
            snapshots: SnapshotBuilder::new(SIMULATION_TPS / SNAPSHOT_TPS),
            subscriptions,
        }
    }

    /// Bus topics that participants need to hear about
    fn bridge(
        bus: &Rc<EventBus>,
        outbox: &Rc<RefCell<Vec<ServerMsg>>>,
        tick: &Rc<Cell<u64>>,
    ) -> Subscriptions {
        let mut subs = Subscriptions::new(bus);

        let out = outbox.clone();
        subs.add::<topics::UpdateMatchCode>(move |code| {
            out.borrow_mut().push(ServerMsg::RoomCode { code: code.clone() })
        });
        let out = outbox.clone();
        subs.add::<topics::ResetNetworkUI>(move |_| out.borrow_mut().push(ServerMsg::NetworkReset));
        let out = outbox.clone();
        let tick = tick.clone();
        subs.add::<topics::MatchStarted>(move |roster| {
            out.borrow_mut().push(ServerMsg::MatchStarted {
                tick: tick.get(),
                roster: roster.clone(),
            })
        });
        let out = outbox.clone();
        subs.add::<topics::MatchEnded>(move |outcome| {
            out.borrow_mut().push(ServerMsg::MatchFinished {
                winner: outcome.winner,
                aborted: outcome.aborted,
            })
        });

        subs
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn phase(&self) -> MatchPhase {
        self.orchestrator.borrow().phase()
    }

    pub fn roster_size(&self) -> usize {
        self.admission.borrow().roster().len()
    }

    pub fn bus(&self) -> &Rc<EventBus> {
        &self.bus
    }

    fn publish(&self, events: Vec<BusEvent>) {
        publish_all(&self.bus, events);
    }

    /// Ask the session service to host a fresh room
    pub fn open_room(&self) {
        self.bus.publish::<topics::CreateRoom>(());
    }

    /// Approval handshake. Always answers; a rejection leaves nothing pending.
    pub fn request_connection(&mut self, connection: ConnectionId) -> (ApprovalResponse, ServerMsg) {
        let (response, events) = self.admission.borrow_mut().approval_request(connection);
        self.publish(events);

        let reply = match response.slot {
            Some(slot) if response.approved => ServerMsg::Welcome {
                connection,
                slot,
                match_id: self.match_id,
                server_time: unix_millis(),
                state: MatchMirror::from_state(self.orchestrator.borrow().state()),
            },
            _ => ServerMsg::Rejected {
                reason: "room is full".to_string(),
            },
        };
        (response, reply)
    }

    pub fn disconnect(&mut self, connection: ConnectionId) {
        let outcome = self.admission.borrow_mut().on_disconnect(connection);
        debug!(connection = %connection, outcome = ?outcome, "Disconnect handled");
        self.publish(outcome.into_events());
    }

    /// Validate and apply one intent
    pub fn handle_client(&mut self, connection: ConnectionId, msg: ClientMsg) {
        if !self.admission.borrow().roster().contains(connection) {
            debug!(connection = %connection, "Intent from non-member ignored");
            return;
        }

        match msg {
            ClientMsg::ToggleReady => {
                let events = self.orchestrator.borrow_mut().toggle_ready(connection);
                self.publish(events);
            }
            ClientMsg::Move { x, y } => {
                if !self.players.borrow_mut().set_input(connection, Vec2::new(x, y)) {
                    debug!(connection = %connection, "Move ignored");
                }
            }
            ClientMsg::Jump => {
                if !self.players.borrow_mut().request_jump(connection) {
                    debug!(connection = %connection, "Jump ignored");
                }
            }
            ClientMsg::Attack { dir_x, dir_y } => self.attack(connection, Vec2::new(dir_x, dir_y)),
            ClientMsg::Ping { .. } => {}
        }
    }

    fn attack(&mut self, connection: ConnectionId, direction: Vec2) {
        let Some(attacker) = self.players.borrow().attacker(connection) else {
            debug!(connection = %connection, "Attack without a player ignored");
            return;
        };
        let Some(reference) = self.combat.request_attack(&attacker, direction) else {
            return;
        };
        if let Some(volume) = self.combat.active().iter().find(|v| v.id == reference.id) {
            self.outbox.borrow_mut().push(ServerMsg::AttackStarted {
                slot: volume.owner,
                dir_x: volume.direction.x,
                dir_y: volume.direction.y,
                rotation: volume.rotation_deg,
            });
        }
    }

    /// One authoritative step: players, then combat, then due continuations
    pub fn fixed_tick(&mut self, dt: f32) -> TickReport {
        self.tick.set(self.tick.get() + 1);

        if self.phase() == MatchPhase::InProgress {
            let events = self.players.borrow_mut().fixed_tick(dt);
            self.publish(events);

            let targets = self.players.borrow().hit_targets();
            let events = self.combat.fixed_tick(dt, &targets);
            self.publish(events);

            let events = self.orchestrator.borrow_mut().fixed_tick(dt);
            if !events.is_empty() {
                self.snapshots.force_next();
            }
            self.publish(events);
        } else {
            self.combat.clear();
        }

        self.flush_patches();

        if self.snapshots.should_send() {
            let players = self.players.borrow().snapshots();
            if !players.is_empty() {
                self.outbox.borrow_mut().push(ServerMsg::Snapshot {
                    tick: self.tick.get(),
                    players,
                });
            }
        }

        let reset = self.recovery.borrow_mut().poll();
        TickReport {
            broadcast: std::mem::take(&mut *self.outbox.borrow_mut()),
            reset,
        }
    }

    fn flush_patches(&mut self) {
        let patches = self.orchestrator.borrow_mut().drain_patches();
        if patches.is_empty() {
            return;
        }
        if patches.iter().any(|p| matches!(p, MatchPatch::Phase { .. })) {
            self.snapshots.force_next();
        }
        self.outbox.borrow_mut().push(ServerMsg::MatchPatch { patches });
    }

    /// Close a session whose teardown was triggered. Called once the tick's
    /// broadcast is out, so participants see the final state before the close.
    pub fn release_session(&mut self) -> bool {
        self.recovery.borrow_mut().close_session()
    }

    /// Release every subscription ahead of dropping the context
    pub fn close(self) {
        self.admission.borrow_mut().detach();
        self.orchestrator.borrow_mut().detach();
        self.players.borrow_mut().detach();
        self.session.borrow_mut().detach();
        self.recovery.borrow_mut().detach();
        let mut subscriptions = self.subscriptions;
        subscriptions.release();
        info!(match_id = %self.match_id, generation = self.generation, "Match context closed");
    }
}
