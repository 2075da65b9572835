//! Registry of connected clients and their output streams.
//!
//! Written by connection supervisors, read by the scheduler. All access goes
//! through one lock; handles are cheap clones of the same shared state.

use crate::streaming::ChunkSink;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Identifies one registration of a client.
///
/// A reconnecting client gets a fresh token, so the old connection's
/// cleanup cannot evict the new stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken(u64);

/// A client that can be chosen for a transfer
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub client_id: String,
    pub sink: ChunkSink,
    /// Cancelled to make the owning connection hang up
    pub closer: CancellationToken,
    pub token: RegistrationToken,
}

#[derive(Debug, Default)]
struct Inner {
    clients: HashMap<String, RegisteredClient>,
    /// Selection order; each registered identity appears exactly once
    order: Vec<String>,
    next_token: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the stream for `client_id`. Last write wins.
    pub async fn register(
        &self,
        client_id: &str,
        sink: ChunkSink,
        closer: CancellationToken,
    ) -> RegistrationToken {
        let mut inner = self.inner.write().await;
        let token = RegistrationToken(inner.next_token);
        inner.next_token += 1;

        let replaced = inner
            .clients
            .insert(
                client_id.to_string(),
                RegisteredClient {
                    client_id: client_id.to_string(),
                    sink,
                    closer,
                    token,
                },
            )
            .is_some();
        if !replaced {
            inner.order.push(client_id.to_string());
        }

        token
    }

    /// Remove `client_id` if `token` is still its current registration.
    pub async fn deregister(&self, client_id: &str, token: RegistrationToken) -> bool {
        let mut inner = self.inner.write().await;
        match inner.clients.get(client_id) {
            Some(current) if current.token == token => {}
            _ => return false,
        }
        inner.clients.remove(client_id);
        inner.order.retain(|id| id != client_id);
        true
    }

    /// Deregister `client` and tell its connection to close.
    ///
    /// Used when a transfer to the client failed part-way, so the peer does
    /// not keep a half-filled session on a stream nobody will complete.
    pub async fn evict(&self, client: &RegisteredClient) -> bool {
        client.closer.cancel();
        self.deregister(&client.client_id, client.token).await
    }

    /// Uniformly pick one registered client.
    pub async fn pick_random(&self) -> Option<RegisteredClient> {
        let inner = self.inner.read().await;
        if inner.order.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..inner.order.len());
        inner.clients.get(&inner.order[idx]).cloned()
    }

    pub async fn get(&self, client_id: &str) -> Option<RegisteredClient> {
        self.inner.read().await.clients.get(client_id).cloned()
    }

    /// Registered identities in selection order.
    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
