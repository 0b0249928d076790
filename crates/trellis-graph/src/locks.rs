//! Per-vertex write locks.
//!
//! Mutations that touch neighbor counters serialize on the vertices whose
//! counters they change. Locks are taken in sorted URI order so two writers
//! sharing vertices can never deadlock, and lock entries are dropped from
//! the table once nobody holds or awaits them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use trellis_core::Uri;

type LockTable = HashMap<Uri, Arc<tokio::sync::Mutex<()>>>;

/// Table of per-vertex async mutexes. Clone is cheap and shares the table.
#[derive(Debug, Clone, Default)]
pub struct VertexLocks {
    table: Arc<Mutex<LockTable>>,
}

impl VertexLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every vertex in `uris`. Duplicates are locked once.
    pub async fn lock<'a, I>(&self, uris: I) -> VertexLockGuard
    where
        I: IntoIterator<Item = &'a Uri>,
    {
        let ordered: BTreeSet<Uri> = uris.into_iter().cloned().collect();
        let mut held = Vec::with_capacity(ordered.len());
        for uri in ordered {
            let mutex = {
                let mut table = self.table.lock();
                Arc::clone(table.entry(uri.clone()).or_default())
            };
            let guard = mutex.lock_owned().await;
            held.push((uri, guard));
        }
        tracing::trace!(vertices = held.len(), "Acquired vertex locks");
        VertexLockGuard {
            table: Arc::clone(&self.table),
            held,
        }
    }

    /// Number of vertices with a live lock entry.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

/// Releases its vertex locks on drop.
#[derive(Debug)]
pub struct VertexLockGuard {
    table: Arc<Mutex<LockTable>>,
    held: Vec<(Uri, OwnedMutexGuard<()>)>,
}

impl VertexLockGuard {
    pub fn covers(&self, uri: &Uri) -> bool {
        self.held.iter().any(|(held, _)| held == uri)
    }

    /// Whether this guard holds exactly the locks `uris` would need.
    pub fn covers_all<'a, I>(&self, uris: I) -> bool
    where
        I: IntoIterator<Item = &'a Uri>,
    {
        uris.into_iter().all(|uri| self.covers(uri))
    }
}

impl Drop for VertexLockGuard {
    fn drop(&mut self) {
        let released: Vec<Uri> = self
            .held
            .drain(..)
            .map(|(uri, guard)| {
                drop(guard);
                uri
            })
            .collect();

        let mut table = self.table.lock();
        for uri in released {
            if table
                .get(&uri)
                .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
            {
                table.remove(&uri);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use trellis_core::UserUris;

    fn uris(n: usize) -> Vec<Uri> {
        let ns = UserUris::for_username("alice").unwrap();
        (0..n).map(|_| ns.generate_vertex_uri()).collect()
    }

    #[tokio::test]
    async fn entries_are_evicted_after_release() {
        let locks = VertexLocks::new();
        let vs = uris(3);
        {
            let guard = locks.lock(&vs).await;
            assert!(guard.covers_all(&vs));
            assert_eq!(locks.len(), 3);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn duplicates_are_locked_once() {
        let locks = VertexLocks::new();
        let vs = uris(1);
        let twice = [vs[0].clone(), vs[0].clone()];
        let _guard = locks.lock(&twice).await;
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_sets_are_serialized() {
        let locks = VertexLocks::new();
        let vs = uris(3);
        let first = locks.lock(&vs[0..2]).await;

        let contender = {
            let locks = locks.clone();
            let wanted = vec![vs[1].clone(), vs[2].clone()];
            tokio::spawn(async move {
                let _guard = locks.lock(&wanted).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }
}
