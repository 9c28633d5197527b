use std::{
    fmt::Debug,
    sync::atomic::{AtomicU64, Ordering},
};

use uuid::Uuid;

/// Source of request identifiers, nonces and states.
///
/// Injected so that request construction stays reproducible under test.
pub trait SeedSequence: Debug {
    fn next_request_id(&self) -> String;
    fn next_nonce(&self) -> String;
    fn next_state(&self) -> String;
}

/// Unguessable values backed by random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidSeedSequence;

impl SeedSequence for UuidSeedSequence {
    fn next_request_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn next_nonce(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn next_state(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Deterministic `req-0001`, `nonce-0001`, `state-0001`, ... sequence.
#[derive(Debug, Default)]
pub struct CountingSeedSequence {
    request_ids: AtomicU64,
    nonces: AtomicU64,
    states: AtomicU64,
}

impl CountingSeedSequence {
    fn next(counter: &AtomicU64, prefix: &str) -> String {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{n:04}")
    }
}

impl SeedSequence for CountingSeedSequence {
    fn next_request_id(&self) -> String {
        Self::next(&self.request_ids, "req")
    }

    fn next_nonce(&self) -> String {
        Self::next(&self.nonces, "nonce")
    }

    fn next_state(&self) -> String {
        Self::next(&self.states, "state")
    }
}
