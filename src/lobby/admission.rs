//! Connection approval, capacity limit and disconnect handling

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info};

use crate::events::{topics, BusEvent, EventBus, Subscriptions};

use super::{ConnectionId, RosterEntry, Slot};

/// Admission errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("Room is full ({capacity} players)")]
    RosterFull { capacity: usize },

    #[error("Connection {0} is already in the roster")]
    AlreadyAdmitted(ConnectionId),
}

/// Answer to a transport-level approval request.
/// `pending` is always false: a decision is made on the spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalResponse {
    pub approved: bool,
    pub pending: bool,
    pub slot: Option<Slot>,
}

impl ApprovalResponse {
    fn approved(slot: Slot) -> Self {
        Self {
            approved: true,
            pending: false,
            slot: Some(slot),
        }
    }

    fn rejected() -> Self {
        Self {
            approved: false,
            pending: false,
            slot: None,
        }
    }
}

/// Which side of the session this process is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalRole {
    Host,
    Client { local: ConnectionId },
}

/// What a disconnect means for the match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// A participant left an active match; the room closes
    ShutdownRoom(RosterEntry),
    /// A participant left the lobby; its slot is freed and un-readied
    ReadinessRevoked(RosterEntry),
    /// Our own connection dropped while we are a client
    HostLost,
    Ignored,
}

impl DisconnectOutcome {
    pub fn into_events(self) -> Vec<BusEvent> {
        match self {
            DisconnectOutcome::ShutdownRoom(_) => vec![BusEvent::ShutdownRoom],
            DisconnectOutcome::ReadinessRevoked(entry) => vec![BusEvent::ParticipantLeft(entry)],
            DisconnectOutcome::HostLost => vec![BusEvent::HostLost],
            DisconnectOutcome::Ignored => Vec::new(),
        }
    }
}

/// Ordered set of approved participants. Slots are fixed at approval time.
#[derive(Debug, Clone)]
pub struct Roster {
    capacity: usize,
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.entries.iter().any(|e| e.connection == connection)
    }

    pub fn slot_of(&self, connection: ConnectionId) -> Option<Slot> {
        self.entries
            .iter()
            .find(|e| e.connection == connection)
            .map(|e| e.slot)
    }

    /// Entries in approval order
    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    /// Add a participant under the lowest free slot
    pub fn admit(&mut self, connection: ConnectionId) -> Result<RosterEntry, AdmissionError> {
        if self.contains(connection) {
            return Err(AdmissionError::AlreadyAdmitted(connection));
        }
        if self.entries.len() >= self.capacity {
            return Err(AdmissionError::RosterFull {
                capacity: self.capacity,
            });
        }

        let slot = (0..self.capacity)
            .find(|slot| self.entries.iter().all(|e| e.slot != *slot))
            .ok_or(AdmissionError::RosterFull {
                capacity: self.capacity,
            })?;

        let entry = RosterEntry { connection, slot };
        self.entries.push(entry);
        Ok(entry)
    }

    pub fn remove(&mut self, connection: ConnectionId) -> Option<RosterEntry> {
        let pos = self.entries.iter().position(|e| e.connection == connection)?;
        Some(self.entries.remove(pos))
    }
}

/// Gatekeeper for who may join the match
pub struct ConnectionAdmission {
    roster: Roster,
    role: LocalRole,
    match_started: bool,
    match_ended: bool,
    subscriptions: Option<Subscriptions>,
}

impl ConnectionAdmission {
    pub fn new(capacity: usize, role: LocalRole) -> Self {
        Self {
            roster: Roster::new(capacity),
            role,
            match_started: false,
            match_ended: false,
            subscriptions: None,
        }
    }

    /// Create the component and subscribe it to match lifecycle topics
    pub fn attach(bus: &Rc<EventBus>, capacity: usize, role: LocalRole) -> Rc<RefCell<Self>> {
        let admission = Rc::new(RefCell::new(Self::new(capacity, role)));

        let mut subs = Subscriptions::new(bus);
        subs.forward::<topics::MatchStarted, _, _>(&admission, |admission, _| {
            admission.match_started = true;
            Vec::new()
        });
        subs.forward::<topics::MatchEnded, _, _>(&admission, |admission, _| {
            admission.match_ended = true;
            Vec::new()
        });
        admission.borrow_mut().subscriptions = Some(subs);

        admission
    }

    /// Release bus subscriptions ahead of teardown
    pub fn detach(&mut self) {
        if let Some(mut subs) = self.subscriptions.take() {
            subs.release();
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Approve iff the roster has room. No player object is created here.
    pub fn on_connection_request(
        &mut self,
        connection: ConnectionId,
    ) -> Result<RosterEntry, AdmissionError> {
        let entry = self.roster.admit(connection)?;
        info!(
            connection = %connection,
            slot = entry.slot,
            roster_size = self.roster.len(),
            "Connection approved"
        );
        Ok(entry)
    }

    /// Transport-facing approval: always answers, never leaves a request pending
    pub fn approval_request(&mut self, connection: ConnectionId) -> (ApprovalResponse, Vec<BusEvent>) {
        match self.on_connection_request(connection) {
            Ok(entry) => (
                ApprovalResponse::approved(entry.slot),
                vec![BusEvent::ParticipantApproved(entry)],
            ),
            Err(AdmissionError::AlreadyAdmitted(_)) => {
                let slot = self.roster.slot_of(connection);
                debug!(connection = %connection, "Duplicate approval request");
                (
                    ApprovalResponse {
                        approved: true,
                        pending: false,
                        slot,
                    },
                    Vec::new(),
                )
            }
            Err(e) => {
                info!(connection = %connection, error = %e, "Connection rejected");
                (ApprovalResponse::rejected(), Vec::new())
            }
        }
    }

    pub fn on_disconnect(&mut self, connection: ConnectionId) -> DisconnectOutcome {
        if self.match_ended {
            debug!(connection = %connection, "Disconnect after match end ignored");
            return DisconnectOutcome::Ignored;
        }

        if let Some(entry) = self.roster.remove(connection) {
            if self.match_started {
                info!(
                    connection = %connection,
                    slot = entry.slot,
                    "Match participant disconnected, shutting down room"
                );
                return DisconnectOutcome::ShutdownRoom(entry);
            }
            info!(connection = %connection, slot = entry.slot, "Lobby participant left");
            return DisconnectOutcome::ReadinessRevoked(entry);
        }

        match self.role {
            LocalRole::Client { local } if local == connection => {
                info!(connection = %connection, "Dropped by host");
                DisconnectOutcome::HostLost
            }
            _ => DisconnectOutcome::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::r#match::MatchOutcome;

    fn conn(id: u64) -> ConnectionId {
        ConnectionId(id)
    }

    #[test]
    fn test_capacity_rejects_extra_connection() {
        let mut admission = ConnectionAdmission::new(4, LocalRole::Host);
        for id in 1..=4 {
            let (response, events) = admission.approval_request(conn(id));
            assert!(response.approved);
            assert!(!response.pending);
            assert_eq!(events.len(), 1);
        }

        let (response, events) = admission.approval_request(conn(5));
        assert!(!response.approved);
        assert!(!response.pending);
        assert!(events.is_empty());
        assert_eq!(admission.roster().len(), 4);
    }

    #[test]
    fn test_slots_fixed_at_approval() {
        let mut admission = ConnectionAdmission::new(4, LocalRole::Host);
        let a = admission.on_connection_request(conn(10)).unwrap();
        let b = admission.on_connection_request(conn(20)).unwrap();
        let c = admission.on_connection_request(conn(30)).unwrap();
        assert_eq!((a.slot, b.slot, c.slot), (0, 1, 2));

        assert_eq!(
            admission.on_disconnect(conn(20)),
            DisconnectOutcome::ReadinessRevoked(b)
        );
        // Remaining slots do not shift
        assert_eq!(admission.roster().slot_of(conn(30)), Some(2));

        let d = admission.on_connection_request(conn(40)).unwrap();
        assert_eq!(d.slot, 1);
    }

    #[test]
    fn test_duplicate_request_keeps_slot() {
        let mut admission = ConnectionAdmission::new(2, LocalRole::Host);
        admission.approval_request(conn(1));
        let (response, events) = admission.approval_request(conn(1));
        assert!(response.approved);
        assert_eq!(response.slot, Some(0));
        assert!(events.is_empty());
        assert_eq!(admission.roster().len(), 1);
    }

    #[test]
    fn test_disconnect_during_match_shuts_down_room() {
        let bus = Rc::new(EventBus::new());
        let admission = ConnectionAdmission::attach(&bus, 4, LocalRole::Host);
        let entry = admission.borrow_mut().on_connection_request(conn(1)).unwrap();
        admission.borrow_mut().on_connection_request(conn(2)).unwrap();

        let roster = admission.borrow().roster().entries().to_vec();
        bus.publish::<topics::MatchStarted>(roster);

        let outcome = admission.borrow_mut().on_disconnect(conn(1));
        assert_eq!(outcome, DisconnectOutcome::ShutdownRoom(entry));
        assert_eq!(outcome.into_events(), vec![BusEvent::ShutdownRoom]);
    }

    #[test]
    fn test_disconnect_after_match_end_ignored() {
        let bus = Rc::new(EventBus::new());
        let admission = ConnectionAdmission::attach(&bus, 4, LocalRole::Host);
        admission.borrow_mut().on_connection_request(conn(1)).unwrap();
        let roster = admission.borrow().roster().entries().to_vec();
        bus.publish::<topics::MatchStarted>(roster);
        bus.publish::<topics::MatchEnded>(MatchOutcome {
            winner: Some(0),
            aborted: false,
        });

        assert_eq!(
            admission.borrow_mut().on_disconnect(conn(1)),
            DisconnectOutcome::Ignored
        );
    }

    #[test]
    fn test_client_detects_host_loss() {
        let mut admission = ConnectionAdmission::new(4, LocalRole::Client { local: conn(7) });
        assert_eq!(admission.on_disconnect(conn(3)), DisconnectOutcome::Ignored);
        assert_eq!(admission.on_disconnect(conn(7)), DisconnectOutcome::HostLost);
    }

    #[test]
    fn test_detached_admission_releases_subscriptions() {
        let bus = Rc::new(EventBus::new());
        let admission = ConnectionAdmission::attach(&bus, 4, LocalRole::Host);
        assert_eq!(bus.subscriber_count::<topics::MatchStarted>(), 1);
        drop(admission);
        assert_eq!(bus.subscriber_count::<topics::MatchStarted>(), 0);
    }
}
