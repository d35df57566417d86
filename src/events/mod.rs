//! Event bus and the topics that connect session, admission, match and players

pub mod bus;

pub use bus::{EventBus, Subscriptions, Topic};

use crate::game::combat::AttackContact;
use crate::game::r#match::{MatchOutcome, RespawnOrder, ScoreChange};
use crate::lobby::{RosterEntry, Slot};
use crate::session::JoinCode;

macro_rules! topics {
    ($($(#[$doc:meta])* $name:ident => $payload:ty;)*) => {
        $(
            $(#[$doc])*
            pub struct $name;

            impl Topic for $name {
                const NAME: &'static str = stringify!($name);
                type Payload = $payload;
            }
        )*
    };
}

/// Topic definitions
pub mod topics {
    use super::*;

    topics! {
        /// Host a new room
        CreateRoom => ();
        /// Join an existing room by code
        JoinRoom => JoinCode;
        /// The join code shown to players changed
        UpdateMatchCode => JoinCode;
        /// A session call failed; the lobby controls must become usable again
        ResetNetworkUI => ();
        ChangePlayerScore => ScoreChange;
        /// A player fell off stage and needs a respawn scheduled
        PlayerRespawn => Slot;
        AttackHit => AttackContact;
        ParticipantApproved => RosterEntry;
        /// An approved participant left before the match started
        ParticipantLeft => RosterEntry;
        /// A match participant dropped mid-match; the room must close
        ShutdownRoom => ();
        /// We are a client and the host dropped us
        HostLost => ();
        MatchStarted => Vec<RosterEntry>;
        MatchEnded => MatchOutcome;
        RespawnDue => RespawnOrder;
    }
}

/// A publication produced by a component, sent once its borrow is released
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    UpdateMatchCode(JoinCode),
    ResetNetworkUI,
    ChangePlayerScore(ScoreChange),
    PlayerRespawn(Slot),
    AttackHit(AttackContact),
    ParticipantApproved(RosterEntry),
    ParticipantLeft(RosterEntry),
    ShutdownRoom,
    HostLost,
    MatchStarted(Vec<RosterEntry>),
    MatchEnded(MatchOutcome),
    RespawnDue(RespawnOrder),
}

impl BusEvent {
    pub fn publish(self, bus: &EventBus) {
        match self {
            BusEvent::UpdateMatchCode(code) => bus.publish::<topics::UpdateMatchCode>(code),
            BusEvent::ResetNetworkUI => bus.publish::<topics::ResetNetworkUI>(()),
            BusEvent::ChangePlayerScore(change) => bus.publish::<topics::ChangePlayerScore>(change),
            BusEvent::PlayerRespawn(slot) => bus.publish::<topics::PlayerRespawn>(slot),
            BusEvent::AttackHit(contact) => bus.publish::<topics::AttackHit>(contact),
            BusEvent::ParticipantApproved(entry) => {
                bus.publish::<topics::ParticipantApproved>(entry)
            }
            BusEvent::ParticipantLeft(entry) => bus.publish::<topics::ParticipantLeft>(entry),
            BusEvent::ShutdownRoom => bus.publish::<topics::ShutdownRoom>(()),
            BusEvent::HostLost => bus.publish::<topics::HostLost>(()),
            BusEvent::MatchStarted(roster) => bus.publish::<topics::MatchStarted>(roster),
            BusEvent::MatchEnded(outcome) => bus.publish::<topics::MatchEnded>(outcome),
            BusEvent::RespawnDue(order) => bus.publish::<topics::RespawnDue>(order),
        }
    }
}

/// Publish a batch in order
pub fn publish_all(bus: &EventBus, events: Vec<BusEvent>) {
    for event in events {
        event.publish(bus);
    }
}
