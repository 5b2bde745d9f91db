//! Connected Client Registry
//!
//! Every connection registers a [`ClientHandle`] for its lifetime. The
//! registry backs `CLIENT LIST`, `CLIENT INFO` and `CLIENT KILL`: a kill
//! flags the handle and wakes the owning connection loop, which then
//! closes the socket.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::debug;

/// Mutable per-client fields, read together when building a status line.
#[derive(Debug)]
struct ClientState {
    name: Option<Bytes>,
    last_command: String,
    last_active: Instant,
}

/// One connected client.
#[derive(Debug)]
pub struct ClientHandle {
    id: u64,
    addr: String,
    laddr: String,
    created: Instant,
    state: Mutex<ClientState>,
    killed: AtomicBool,
    kill_signal: Notify,
}

impl ClientHandle {
    fn new(id: u64, addr: String, laddr: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            laddr,
            created: now,
            state: Mutex::new(ClientState {
                name: None,
                last_command: "NULL".to_string(),
                last_active: now,
            }),
            killed: AtomicBool::new(false),
            kill_signal: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address (`ip:port`).
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Local address the client connected to.
    pub fn laddr(&self) -> &str {
        &self.laddr
    }

    /// Seconds since the client connected.
    pub fn age_secs(&self) -> u64 {
        self.created.elapsed().as_secs()
    }

    pub fn name(&self) -> Option<Bytes> {
        self.state.lock().unwrap().name.clone()
    }

    /// Sets the connection name. An empty name clears it.
    pub fn set_name(&self, name: Bytes) {
        let mut state = self.state.lock().unwrap();
        state.name = if name.is_empty() { None } else { Some(name) };
    }

    /// Records the command the client is running.
    pub fn touch(&self, command: &str) {
        let mut state = self.state.lock().unwrap();
        state.last_command = command.to_string();
        state.last_active = Instant::now();
    }

    /// Flags the client for disconnection and wakes its connection loop.
    pub fn kill(&self) {
        if !self.killed.swap(true, Ordering::SeqCst) {
            debug!(client_id = self.id, addr = %self.addr, "Client killed");
            self.kill_signal.notify_one();
        }
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Resolves once [`kill`](Self::kill) has been called.
    pub async fn killed(&self) {
        if self.is_killed() {
            return;
        }
        self.kill_signal.notified().await;
    }

    /// The `CLIENT LIST` / `CLIENT INFO` line for this client.
    pub fn info_line(&self) -> String {
        let state = self.state.lock().unwrap();
        let name = state
            .name
            .as_ref()
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_default();
        format!(
            "id={} addr={} laddr={} fd=-1 name={} age={} idle={} flags=N db=0 sub=0 psub=0 multi=-1 cmd={} user=default resp=2",
            self.id,
            self.addr,
            self.laddr,
            name,
            self.age_secs(),
            state.last_active.elapsed().as_secs(),
            state.last_command,
        )
    }
}

/// All connected clients, keyed by id.
#[derive(Debug)]
pub struct ClientRegistry {
    next_id: AtomicU64,
    clients: RwLock<BTreeMap<u64, Arc<ClientHandle>>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            clients: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a new client and assigns it the next id.
    pub fn register(&self, addr: impl Into<String>, laddr: impl Into<String>) -> Arc<ClientHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ClientHandle::new(id, addr.into(), laddr.into()));
        self.clients.write().unwrap().insert(id, Arc::clone(&handle));
        handle
    }

    pub fn unregister(&self, id: u64) {
        self.clients.write().unwrap().remove(&id);
    }

    pub fn get(&self, id: u64) -> Option<Arc<ClientHandle>> {
        self.clients.read().unwrap().get(&id).cloned()
    }

    /// Connected clients in id order.
    pub fn list(&self) -> Vec<Arc<ClientHandle>> {
        self.clients.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_register_assigns_increasing_ids() {
        let registry = ClientRegistry::new();
        let a = registry.register("127.0.0.1:5000", "127.0.0.1:6379");
        let b = registry.register("127.0.0.1:5001", "127.0.0.1:6379");
        assert!(b.id() > a.id());
        assert_eq!(registry.len(), 2);

        registry.unregister(a.id());
        assert!(registry.get(a.id()).is_none());
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_name_and_info_line() {
        let registry = ClientRegistry::new();
        let client = registry.register("10.0.0.1:4000", "10.0.0.2:6379");
        assert_eq!(client.name(), None);

        client.set_name(Bytes::from("worker"));
        client.touch("client|info");
        let line = client.info_line();
        assert!(line.starts_with(&format!("id={} addr=10.0.0.1:4000 laddr=10.0.0.2:6379", client.id())));
        assert!(line.contains("name=worker"));
        assert!(line.contains("cmd=client|info"));

        client.set_name(Bytes::new());
        assert_eq!(client.name(), None);
    }

    #[tokio::test]
    async fn test_kill_wakes_waiter() {
        let registry = ClientRegistry::new();
        let client = registry.register("127.0.0.1:5000", "127.0.0.1:6379");

        let waiter = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.killed().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.kill();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(client.is_killed());
    }
}
