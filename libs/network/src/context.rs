//! Transport Context
//!
//! Process-wide handle shared by every server: default configuration,
//! server id allocation and a registry of live servers so they can all be
//! stopped at once. Servers keep a clone, so the context outlives them.

use crate::config::PollServerConfig;
use crate::server::ShutdownHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct TransportContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    config: PollServerConfig,
    next_server_id: AtomicU64,
    servers: Mutex<HashMap<u64, ShutdownHandle>>,
    terminated: AtomicBool,
}

impl TransportContext {
    pub fn new() -> Self {
        Self::with_config(PollServerConfig::default())
    }

    /// Context whose servers default to `config`
    pub fn with_config(config: PollServerConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                next_server_id: AtomicU64::new(1),
                servers: Mutex::new(HashMap::new()),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PollServerConfig {
        &self.inner.config
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// Number of servers built from this context that are still alive
    pub fn live_servers(&self) -> usize {
        self.inner.servers.lock().len()
    }

    /// Shut down every live server and refuse new ones
    pub fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let servers: Vec<ShutdownHandle> = self.inner.servers.lock().values().cloned().collect();
        info!(servers = servers.len(), "Terminating transport context");
        for handle in servers {
            handle.shutdown();
        }
    }

    pub(crate) fn next_server_id(&self) -> u64 {
        self.inner.next_server_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn attach(&self, server_id: u64, handle: ShutdownHandle) {
        self.inner.servers.lock().insert(server_id, handle);
    }

    pub(crate) fn detach(&self, server_id: u64) {
        self.inner.servers.lock().remove(&server_id);
    }
}

impl Default for TransportContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportContext")
            .field("live_servers", &self.live_servers())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
