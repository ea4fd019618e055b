//! In-process request coalescing.
//!
//! When several callers ask for the same fingerprint while an upstream
//! fetch is already in flight, only the first becomes the "leader" and
//! actually calls the engine; the rest subscribe to its outcome. This is
//! strictly in-process (no cross-instance coordination) and keyed by
//! fingerprint id, mirroring the `DashMap` + broadcast pattern used for
//! concurrent-map coordination elsewhere in the pack.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::fetcher::CachedResult;

const BROADCAST_CAPACITY: usize = 16;

/// Coalesces concurrent callers for the same fingerprint id into a single
/// upstream call.
#[derive(Default)]
pub struct SingleFlight {
    inflight: DashMap<String, broadcast::Sender<Arc<CachedResult>>>,
}

/// What a caller should do once it has staked a claim on `id`.
pub enum Role {
    /// This caller is the leader: it must perform the work and call
    /// [`SingleFlight::finish`] with the outcome when done.
    Leader,
    /// Another caller is already the leader; this caller should await the
    /// given receiver instead of doing the work itself.
    Follower(broadcast::Receiver<Arc<CachedResult>>),
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a slot for `id`. The critical section here never awaits, so
    /// no lock is held across an `.await` point and no other id's entry is
    /// ever touched while this one is locked.
    pub fn join(&self, id: &str) -> Role {
        match self.inflight.entry(id.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                Role::Follower(occupied.get().subscribe())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
                vacant.insert(tx);
                Role::Leader
            }
        }
    }

    /// Called by the leader once the upstream work completes. Broadcasts
    /// the outcome to every follower that joined in the meantime and
    /// clears the slot so the next caller starts a fresh fetch.
    pub fn finish(&self, id: &str, outcome: CachedResult) {
        let outcome = Arc::new(outcome);
        if let Some((_, sender)) = self.inflight.remove(id) {
            let _ = sender.send(outcome);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fetcher::CacheStatus;

    fn dummy_result() -> CachedResult {
        CachedResult {
            status_code: 200,
            success: true,
            headers: vec![],
            message: "SUCCESS".to_owned(),
            body: serde_json::Value::Null,
            redirects: vec![],
            cache_status: CacheStatus::Miss,
            age_seconds: 0,
        }
    }

    #[tokio::test]
    async fn first_joiner_becomes_leader() {
        let sf = SingleFlight::new();
        assert!(matches!(sf.join("abc"), Role::Leader));
    }

    #[tokio::test]
    async fn second_joiner_becomes_follower() {
        let sf = SingleFlight::new();
        assert!(matches!(sf.join("abc"), Role::Leader));
        assert!(matches!(sf.join("abc"), Role::Follower(_)));
    }

    #[tokio::test]
    async fn followers_receive_leaders_outcome() {
        let sf = Arc::new(SingleFlight::new());
        assert!(matches!(sf.join("abc"), Role::Leader));
        let role = sf.join("abc");
        let mut rx = match role {
            Role::Follower(rx) => rx,
            Role::Leader => unreachable!(),
        };

        let sf2 = sf.clone();
        let handle = tokio::spawn(async move {
            sf2.finish("abc", dummy_result());
        });

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.status_code, 200);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn slot_is_cleared_after_finish() {
        let sf = SingleFlight::new();
        assert!(matches!(sf.join("abc"), Role::Leader));
        sf.finish("abc", dummy_result());
        assert!(sf.inflight.is_empty());
    }
}
