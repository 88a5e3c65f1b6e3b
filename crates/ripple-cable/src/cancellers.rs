//! Registry of cancellation handles grouped by an opaque ID.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// Associates IDs (typically session IDs) with cancellation tokens so
/// every long-lived subscription held under an ID can be torn down at
/// once, e.g. on logout or session invalidation.
#[derive(Debug, Default)]
pub struct Cancellers {
    tokens: Mutex<HashMap<String, Vec<CancellationToken>>>,
}

impl Cancellers {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an association between the ID and the token.
    pub fn add(&self, id: &str, canceller: CancellationToken) {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.entry(id.to_string()).or_default().push(canceller);
    }

    /// Cancel and forget every token associated with the ID. Tokens
    /// are cancelled with the lock held, after the entry is removed;
    /// cancellation observers must not reenter this registry for the
    /// same ID.
    pub fn cancel(&self, id: &str) {
        let mut tokens = self.tokens.lock().unwrap();
        for canceller in tokens.remove(id).unwrap_or_default() {
            canceller.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancels_every_token_for_an_id() {
        let cancellers = Cancellers::new();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let other = CancellationToken::new();
        cancellers.add("session-1", a.clone());
        cancellers.add("session-1", b.clone());
        cancellers.add("session-2", other.clone());

        cancellers.cancel("session-1");
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(!other.is_cancelled());

        // Cancelling again (or an unknown ID) is a no-op.
        cancellers.cancel("session-1");
        cancellers.cancel("never-seen");
    }
}
