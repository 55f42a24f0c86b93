// SPDX-License-Identifier: AGPL-3.0-only
//! Process-wide table of live relay sessions.

use crate::session::SessionId;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A registry entry that can be torn down from outside its owning task.
#[async_trait]
pub trait ManagedSession: Send + Sync {
    async fn teardown(&self) -> Result<()>;
}

/// Concurrent map from session id to session. The lock is never held
/// across an await point.
pub struct SessionRegistry<S> {
    sessions: RwLock<HashMap<SessionId, Arc<S>>>,
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: ManagedSession> SessionRegistry<S> {
    pub fn new() -> SessionRegistry<S> {
        SessionRegistry::default()
    }

    pub fn put(&self, id: SessionId, session: Arc<S>) {
        self.sessions.write().insert(id, session);
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<S>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<S>> {
        self.sessions.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().copied().collect()
    }

    /// Tears down every registered session once and empties the table.
    /// A failing teardown is logged and does not stop the others. Sessions
    /// registered while this runs are left alone.
    pub async fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.sessions.write());
        let count = drained.len();
        for (id, session) in drained {
            if let Err(err) = session.teardown().await {
                warn!(session = %id, error = %err, "session teardown failed");
            }
        }
        debug!(count, "closed all relay sessions");
        count
    }
}
