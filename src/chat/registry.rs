/// Session registry: who is online.
///
/// Maps each admitted connection to its display name. Names are unique among
/// live entries, compared case-insensitively. The registry lives behind one
/// [`tokio::sync::Mutex`] ([`SharedRegistry`]); every check-then-act on it
/// happens while that lock is held.
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

/// Outgoing frames for one connection. Its handler is the only writer to the
/// socket, so frames queued here never interleave on the wire.
///
/// The queue is unbounded. A peer that stops reading stalls only its own
/// handler's write, but its queue keeps growing with every fan-out until the
/// transport fails; there is no idle timeout or liveness check to cut it off.
pub type Outbox = mpsc::UnboundedSender<String>;

/// Shared, lock-guarded registry.
pub type SharedRegistry = Arc<Mutex<Registry>>;

/// Opaque identity of one accepted transport stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a live connection, owned by its handler.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub outbox: Outbox,
}

impl Connection {
    pub fn new(addr: SocketAddr, outbox: Outbox) -> Self {
        Self {
            id: ConnectionId::next(),
            addr,
            outbox,
        }
    }

    /// Queue a frame. A closed outbox means the peer is already gone;
    /// the frame is dropped.
    pub fn send(&self, frame: &str) {
        let _ = self.outbox.send(frame.to_owned());
    }
}

/// One admitted connection.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub conn: Connection,
}

/// Case-insensitive display-name comparison.
pub fn same_name(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Admitted connections, in admission order.
#[derive(Debug, Default)]
pub struct Registry {
    members: Vec<Member>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh registry for sharing across handlers.
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Admit `conn` under `name` unless the name is taken.
    ///
    /// Returns `false` (and changes nothing) on a case-insensitive clash with
    /// any live entry, including the connection's own.
    pub fn try_admit(&mut self, conn: &Connection, name: &str) -> bool {
        if self.members.iter().any(|m| same_name(&m.name, name)) {
            return false;
        }
        if self.members.iter().any(|m| m.conn.id == conn.id) {
            return false;
        }
        self.members.push(Member {
            name: name.to_owned(),
            conn: conn.clone(),
        });
        true
    }

    /// Remove a connection. Returns its name if it was present.
    pub fn remove(&mut self, id: ConnectionId) -> Option<String> {
        let idx = self.members.iter().position(|m| m.conn.id == id)?;
        Some(self.members.remove(idx).name)
    }

    /// Point-in-time copy of `(connection, name)` pairs, in admission order.
    pub fn snapshot(&self) -> Vec<(ConnectionId, String)> {
        self.members
            .iter()
            .map(|m| (m.conn.id, m.name.clone()))
            .collect()
    }

    /// Look up a live member by name, case-insensitively.
    pub fn find_by_name(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| same_name(&m.name, name))
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Member> {
        self.members.iter().find(|m| m.conn.id == id)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
