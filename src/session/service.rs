//! Room creation and joining on top of the session transport

use std::cell::RefCell;
use std::rc::Rc;
use tracing::{info, warn};

use crate::events::{topics, BusEvent, EventBus, Subscriptions};

use super::transport::{EndpointInfo, SessionTransport};
use super::JoinCode;

/// Reacts to CreateRoom/JoinRoom. Transport faults become a ResetNetworkUI.
pub struct SessionService {
    transport: Rc<dyn SessionTransport>,
    capacity: usize,
    current: Option<(JoinCode, EndpointInfo)>,
    subscriptions: Option<Subscriptions>,
}

impl SessionService {
    pub fn new(transport: Rc<dyn SessionTransport>, capacity: usize) -> Self {
        Self {
            transport,
            capacity,
            current: None,
            subscriptions: None,
        }
    }

    pub fn attach(
        bus: &Rc<EventBus>,
        transport: Rc<dyn SessionTransport>,
        capacity: usize,
    ) -> Rc<RefCell<Self>> {
        let service = Rc::new(RefCell::new(Self::new(transport, capacity)));

        let mut subs = Subscriptions::new(bus);
        subs.forward::<topics::CreateRoom, _, _>(&service, |s, _| s.create_room());
        subs.forward::<topics::JoinRoom, _, _>(&service, |s, code| s.join_room(code));
        service.borrow_mut().subscriptions = Some(subs);

        service
    }

    pub fn detach(&mut self) {
        if let Some(mut subs) = self.subscriptions.take() {
            subs.release();
        }
    }

    pub fn current_code(&self) -> Option<&JoinCode> {
        self.current.as_ref().map(|(code, _)| code)
    }

    pub fn endpoint(&self) -> Option<&EndpointInfo> {
        self.current.as_ref().map(|(_, endpoint)| endpoint)
    }

    /// Allocate a session for the whole roster and start hosting
    pub fn create_room(&mut self) -> Vec<BusEvent> {
        match self.transport.create_session(self.capacity) {
            Ok((code, endpoint)) => {
                info!(code = %code, address = %endpoint.address, "Hosting room");
                self.current = Some((code.clone(), endpoint));
                vec![BusEvent::UpdateMatchCode(code)]
            }
            Err(e) => {
                warn!(error = %e, "Failed to create room");
                self.current = None;
                vec![BusEvent::ResetNetworkUI]
            }
        }
    }

    /// Show the code, then join. A failed join resets the lobby.
    pub fn join_room(&mut self, code: &JoinCode) -> Vec<BusEvent> {
        let mut events = vec![BusEvent::UpdateMatchCode(code.clone())];
        match self.transport.join_session(code) {
            Ok(endpoint) => {
                info!(code = %code, address = %endpoint.address, "Joined room");
                self.current = Some((code.clone(), endpoint));
            }
            Err(e) => {
                warn!(code = %code, error = %e, "Failed to join room");
                self.current = None;
                events.push(BusEvent::ResetNetworkUI);
            }
        }
        events
    }
}
