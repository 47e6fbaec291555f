//! Registry of open WebSocket connections.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::frame::ReloadFrame;

/// Process-unique connection identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Instruction for a connection's I/O task.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Write the frame to the socket.
    Frame(ReloadFrame),
    /// Shut the socket down and stop.
    Close,
}

/// Handle to an open connection.
///
/// The socket itself lives in the connection's own task; the handle only
/// queues work for it, so writes never block the caller.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        peer: SocketAddr,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self { id, peer, outbound }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue `frame` for writing.
    ///
    /// Returns `false` if the connection task has already gone away.
    pub fn send(&self, frame: &ReloadFrame) -> bool {
        self.outbound.send(Outbound::Frame(frame.clone())).is_ok()
    }

    /// Ask the connection task to close the socket.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Set of connections that completed the handshake and have not closed.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    open: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open connection.
    pub fn add(&mut self, connection: Connection) {
        self.open.insert(connection.id, connection);
    }

    /// Remove a connection. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.open.remove(&id)
    }

    /// Visit every open connection once, in no particular order.
    pub fn for_each(&self, mut visitor: impl FnMut(&Connection)) {
        self.open.values().for_each(|connection| visitor(connection));
    }

    /// Close every connection and empty the registry.
    pub fn close_all(&mut self) {
        for (_, connection) in self.open.drain() {
            connection.close();
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.open.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn connection(id: u64) -> (Connection, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = SocketAddr::from(([127, 0, 0, 1], 40000));
        (Connection::new(ConnectionId::new(id), peer, tx), rx)
    }

    fn visited(registry: &ConnectionRegistry) -> Vec<ConnectionId> {
        let mut ids = Vec::new();
        registry.for_each(|c| ids.push(c.id()));
        ids.sort();
        ids
    }

    #[test]
    fn test_add_and_remove() {
        let mut registry = ConnectionRegistry::new();
        let (c1, _rx1) = connection(1);
        let (c2, _rx2) = connection(2);

        registry.add(c1);
        registry.add(c2);
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(ConnectionId::new(1)).is_some());
        assert!(!registry.contains(ConnectionId::new(1)));
        assert!(registry.contains(ConnectionId::new(2)));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let (c1, _rx) = connection(1);
        registry.add(c1);

        assert!(registry.remove(ConnectionId::new(1)).is_some());
        assert!(registry.remove(ConnectionId::new(1)).is_none());
        assert!(registry.remove(ConnectionId::new(99)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_for_each_visits_exactly_open_connections() {
        // Deterministic pseudo-random add/remove sequence checked against a model set.
        let mut registry = ConnectionRegistry::new();
        let mut model = BTreeSet::new();
        let mut receivers = Vec::new();
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;

        for step in 0..500u64 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let id = seed % 16;

            if seed % 3 == 0 {
                registry.remove(ConnectionId::new(id));
                model.remove(&id);
            } else if !model.contains(&id) {
                let (c, rx) = connection(id);
                registry.add(c);
                receivers.push(rx);
                model.insert(id);
            }

            let expected: Vec<_> = model.iter().copied().map(ConnectionId::new).collect();
            assert_eq!(visited(&registry), expected, "diverged at step {step}");
        }
    }

    #[test]
    fn test_send_queues_frame() {
        let mut registry = ConnectionRegistry::new();
        let (c1, mut rx) = connection(1);
        registry.add(c1);

        let frame = ReloadFrame::new();
        registry.for_each(|c| assert!(c.send(&frame)));

        match rx.try_recv() {
            Ok(Outbound::Frame(sent)) => assert_eq!(sent, frame),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_send_to_finished_task_reports_failure() {
        let (c1, rx) = connection(1);
        drop(rx);
        assert!(!c1.send(&ReloadFrame::new()));
    }

    #[test]
    fn test_close_all_closes_and_empties() {
        let mut registry = ConnectionRegistry::new();
        let (c1, mut rx1) = connection(1);
        let (c2, mut rx2) = connection(2);
        registry.add(c1);
        registry.add(c2);

        registry.close_all();

        assert!(registry.is_empty());
        assert!(matches!(rx1.try_recv(), Ok(Outbound::Close)));
        assert!(matches!(rx2.try_recv(), Ok(Outbound::Close)));
        registry.for_each(|_| panic!("registry should be empty"));
    }
}
