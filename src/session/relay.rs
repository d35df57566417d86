//! WebSocket relay: the session transport backing the real server

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::lobby::ConnectionId;

use super::transport::{EndpointInfo, SessionFault, SessionTransport};
use super::JoinCode;

struct ActiveSession {
    code: JoinCode,
    endpoint: EndpointInfo,
    closed_tx: watch::Sender<bool>,
}

struct RelayInner {
    public_addr: String,
    session: Mutex<Option<ActiveSession>>,
    live: DashMap<ConnectionId, JoinCode>,
    next_connection: AtomicU64,
}

/// Hands out join codes and tracks every socket attached to the current session
#[derive(Clone)]
pub struct WsRelay {
    inner: Arc<RelayInner>,
}

impl WsRelay {
    pub fn new(public_addr: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                public_addr: public_addr.into(),
                session: Mutex::new(None),
                live: DashMap::new(),
                next_connection: AtomicU64::new(1),
            }),
        }
    }

    pub fn current_code(&self) -> Option<JoinCode> {
        self.inner.session.lock().as_ref().map(|s| s.code.clone())
    }

    pub fn live_connections(&self) -> usize {
        self.inner.live.len()
    }

    /// Register a socket presenting `code`. The guard unregisters it on drop.
    pub fn attach(&self, code: &JoinCode) -> Result<ConnectionGuard, SessionFault> {
        let session = self.inner.session.lock();
        let Some(active) = session.as_ref() else {
            return Err(SessionFault::NoActiveSession);
        };
        if active.code != *code {
            return Err(SessionFault::UnknownJoinCode(code.clone()));
        }

        let id = ConnectionId(self.inner.next_connection.fetch_add(1, Ordering::Relaxed));
        self.inner.live.insert(id, code.clone());
        debug!(connection = %id, code = %code, "Socket attached to session");

        Ok(ConnectionGuard {
            id,
            closed: active.closed_tx.subscribe(),
            relay: self.clone(),
        })
    }
}

impl SessionTransport for WsRelay {
    fn create_session(
        &self,
        max_connections: usize,
    ) -> Result<(JoinCode, EndpointInfo), SessionFault> {
        if max_connections == 0 {
            return Err(SessionFault::AllocationFailed(
                "session needs at least one connection".to_string(),
            ));
        }

        let mut session = self.inner.session.lock();
        if let Some(old) = session.take() {
            let _ = old.closed_tx.send(true);
        }

        let code = JoinCode::generate(&mut OsRng);
        let endpoint = EndpointInfo {
            address: format!("{}/ws?code={}", self.inner.public_addr, code),
            max_connections,
        };
        let (closed_tx, _) = watch::channel(false);
        *session = Some(ActiveSession {
            code: code.clone(),
            endpoint: endpoint.clone(),
            closed_tx,
        });

        info!(code = %code, max_connections, "Relay session opened");
        Ok((code, endpoint))
    }

    fn join_session(&self, code: &JoinCode) -> Result<EndpointInfo, SessionFault> {
        match self.inner.session.lock().as_ref() {
            Some(active) if active.code == *code => Ok(active.endpoint.clone()),
            Some(_) => Err(SessionFault::UnknownJoinCode(code.clone())),
            None => Err(SessionFault::NoActiveSession),
        }
    }

    fn shutdown(&self) {
        if let Some(active) = self.inner.session.lock().take() {
            let _ = active.closed_tx.send(true);
            info!(
                code = %active.code,
                live = self.inner.live.len(),
                "Relay session closing"
            );
        }
    }

    /// False once the session is closed and every socket task has let go
    fn is_listening(&self) -> bool {
        self.inner.session.lock().is_some() || !self.inner.live.is_empty()
    }
}

/// Held by a socket task for as long as it serves a participant
pub struct ConnectionGuard {
    id: ConnectionId,
    closed: watch::Receiver<bool>,
    relay: WsRelay,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Resolves once the session is told to close
    pub async fn session_closed(&mut self) {
        loop {
            if *self.closed.borrow_and_update() {
                return;
            }
            if self.closed.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.relay.inner.live.remove(&self.id);
        debug!(connection = %self.id, "Socket detached from session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_requires_current_code() {
        let relay = WsRelay::new("ws://127.0.0.1:8080");
        assert_eq!(
            relay.attach(&JoinCode::new("ABCDEF")).err(),
            Some(SessionFault::NoActiveSession)
        );

        let (code, endpoint) = relay.create_session(4).unwrap();
        assert!(endpoint.address.ends_with(code.as_str()));
        assert!(matches!(
            relay.attach(&JoinCode::new("ZZZZZZ")),
            Err(SessionFault::UnknownJoinCode(_))
        ));

        let a = relay.attach(&code).unwrap();
        let b = relay.attach(&code).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(relay.live_connections(), 2);
    }

    #[test]
    fn test_listening_until_sockets_gone() {
        let relay = WsRelay::new("ws://127.0.0.1:8080");
        let (code, _) = relay.create_session(4).unwrap();
        let guard = relay.attach(&code).unwrap();

        relay.shutdown();
        assert!(relay.current_code().is_none());
        assert!(relay.is_listening());

        drop(guard);
        assert!(!relay.is_listening());
    }

    #[test]
    fn test_join_session_matches_code() {
        let relay = WsRelay::new("ws://host");
        let (code, endpoint) = relay.create_session(2).unwrap();
        assert_eq!(relay.join_session(&code), Ok(endpoint));
        assert!(relay.join_session(&JoinCode::new("nope00")).is_err());
    }

    #[test]
    fn test_zero_capacity_is_allocation_failure() {
        let relay = WsRelay::new("ws://host");
        assert!(matches!(
            relay.create_session(0),
            Err(SessionFault::AllocationFailed(_))
        ));
        assert!(!relay.is_listening());
    }

    #[test]
    fn test_guard_wakes_on_shutdown() {
        let relay = WsRelay::new("ws://host");
        let (code, _) = relay.create_session(4).unwrap();
        let mut guard = relay.attach(&code).unwrap();

        let mut closed = tokio_test::task::spawn(guard.session_closed());
        tokio_test::assert_pending!(closed.poll());

        relay.shutdown();
        assert!(closed.is_woken());
        tokio_test::assert_ready!(closed.poll());
    }
}
