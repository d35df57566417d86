//! In-memory session transport for tests

use std::cell::{Cell, RefCell};

use super::transport::{EndpointInfo, SessionFault, SessionTransport};
use super::JoinCode;

/// Scripted relay. `linger` is how many `is_listening` polls keep reporting
/// true after a shutdown.
#[derive(Default)]
pub struct LocalRelay {
    pub fail_create: Cell<bool>,
    pub linger: Cell<u32>,
    pub shutdowns: Cell<u32>,
    open: RefCell<Option<JoinCode>>,
    closing: Cell<bool>,
    created: Cell<u32>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_linger(polls: u32) -> Self {
        let relay = Self::new();
        relay.linger.set(polls);
        relay
    }

    pub fn open_code(&self) -> Option<JoinCode> {
        self.open.borrow().clone()
    }

    fn endpoint(max_connections: usize) -> EndpointInfo {
        EndpointInfo {
            address: "local".to_string(),
            max_connections,
        }
    }
}

impl SessionTransport for LocalRelay {
    fn create_session(
        &self,
        max_connections: usize,
    ) -> Result<(JoinCode, EndpointInfo), SessionFault> {
        if self.fail_create.get() {
            return Err(SessionFault::AllocationFailed("scripted failure".to_string()));
        }
        let n = self.created.get() + 1;
        self.created.set(n);
        let code = JoinCode::new(&format!("LOCAL{}", n));
        *self.open.borrow_mut() = Some(code.clone());
        self.closing.set(false);
        Ok((code, Self::endpoint(max_connections)))
    }

    fn join_session(&self, code: &JoinCode) -> Result<EndpointInfo, SessionFault> {
        match self.open.borrow().as_ref() {
            Some(open) if open == code => Ok(Self::endpoint(0)),
            Some(_) => Err(SessionFault::UnknownJoinCode(code.clone())),
            None => Err(SessionFault::NoActiveSession),
        }
    }

    fn shutdown(&self) {
        self.shutdowns.set(self.shutdowns.get() + 1);
        if self.open.borrow_mut().take().is_some() {
            self.closing.set(true);
        }
    }

    fn is_listening(&self) -> bool {
        if self.open.borrow().is_some() {
            return true;
        }
        if self.closing.get() && self.linger.get() > 0 {
            self.linger.set(self.linger.get() - 1);
            return true;
        }
        self.closing.set(false);
        false
    }
}
