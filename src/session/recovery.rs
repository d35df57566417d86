//! Session teardown and return to a neutral state

use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;

use crate::events::{topics, EventBus, Subscriptions};
use crate::game::r#match::MatchOutcome;

use super::transport::SessionTransport;

/// Why the match context is being rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    MatchEnded(MatchOutcome),
    HostLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Idle,
    /// Triggered; the session stays open until this tick's messages are sent
    Requested { reason: ResetReason },
    /// Session told to close; waiting for the transport to stop listening
    Draining { reason: ResetReason, polls: u32 },
    Complete,
}

/// Closes the session on match end or host loss and reports when the close
/// has settled, so the reset never races the teardown.
///
/// Closing is two-step: `begin` records the trigger from inside the tick, and
/// `close_session` shuts the transport down after the host has broadcast the
/// final match state.
pub struct ShutdownCoordinator {
    transport: Rc<dyn SessionTransport>,
    state: Teardown,
    subscriptions: Option<Subscriptions>,
}

impl ShutdownCoordinator {
    pub fn new(transport: Rc<dyn SessionTransport>) -> Self {
        Self {
            transport,
            state: Teardown::Idle,
            subscriptions: None,
        }
    }

    pub fn attach(bus: &Rc<EventBus>, transport: Rc<dyn SessionTransport>) -> Rc<RefCell<Self>> {
        let coordinator = Rc::new(RefCell::new(Self::new(transport)));

        let mut subs = Subscriptions::new(bus);
        subs.forward::<topics::MatchEnded, _, _>(&coordinator, |c, outcome| {
            c.begin(ResetReason::MatchEnded(*outcome));
            Vec::new()
        });
        subs.forward::<topics::HostLost, _, _>(&coordinator, |c, _| {
            c.begin(ResetReason::HostLost);
            Vec::new()
        });
        coordinator.borrow_mut().subscriptions = Some(subs);

        coordinator
    }

    pub fn detach(&mut self) {
        if let Some(mut subs) = self.subscriptions.take() {
            subs.release();
        }
    }

    /// Record why the session must close. Only the first trigger counts.
    pub fn begin(&mut self, reason: ResetReason) {
        if self.state != Teardown::Idle {
            return;
        }
        info!(reason = ?reason, "Session close requested");
        self.state = Teardown::Requested { reason };
    }

    /// Shut the transport down if a close was requested. Returns true when it did.
    pub fn close_session(&mut self) -> bool {
        let Teardown::Requested { reason } = self.state else {
            return false;
        };
        info!(reason = ?reason, "Closing session");
        self.transport.shutdown();
        self.state = Teardown::Draining { reason, polls: 0 };
        true
    }

    /// Called every host tick. Returns the reason once the session has fully closed.
    pub fn poll(&mut self) -> Option<ResetReason> {
        let Teardown::Draining { reason, polls } = self.state else {
            return None;
        };
        if self.transport.is_listening() {
            self.state = Teardown::Draining {
                reason,
                polls: polls + 1,
            };
            return None;
        }
        info!(reason = ?reason, polls, "Session closed");
        self.state = Teardown::Complete;
        Some(reason)
    }
}
