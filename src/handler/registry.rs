//! Dispatch table mapping in-flight sequence numbers to handlers.
//!
//! One table per client. Every operation takes the lock for a single map
//! operation; handlers are cloned or moved out and invoked after the lock is
//! released, so a slow handler never blocks routing for other seqs.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::Handler;

/// Concurrent `seq -> Handler` map.
pub struct DispatchTable {
    handlers: Mutex<HashMap<u64, Handler>>,
}

impl DispatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler for `seq`.
    ///
    /// Must be called before the request for `seq` is sent. A duplicate seq
    /// is a bug; the displaced handler is cleaned up so its caller is not
    /// left waiting.
    pub fn register(&self, seq: u64, handler: Handler) {
        let displaced = self.handlers.lock().insert(seq, handler);
        if let Some(old) = displaced {
            tracing::error!(seq, "duplicate handler registration; replacing");
            old.cleanup();
        }
    }

    /// Look up the handler for `seq` without removing it.
    pub fn lookup(&self, seq: u64) -> Option<Handler> {
        self.handlers.lock().get(&seq).cloned()
    }

    /// Remove and return the handler for `seq`.
    pub fn remove(&self, seq: u64) -> Option<Handler> {
        self.handlers.lock().remove(&seq)
    }

    /// Remove and return every registered handler.
    pub fn remove_all(&self) -> Vec<Handler> {
        self.handlers.lock().drain().map(|(_, h)| h).collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::CallHandler;

    fn call_handler() -> Handler {
        let (handler, _rx) = CallHandler::new(false);
        Handler::call(handler)
    }

    #[test]
    fn test_register_and_lookup() {
        let table = DispatchTable::new();
        table.register(1, call_handler());

        assert!(table.lookup(1).is_some());
        assert!(table.lookup(2).is_none());
        // lookup does not remove
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table = DispatchTable::new();
        table.register(5, call_handler());

        assert!(table.remove(5).is_some());
        assert!(table.remove(5).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_remove_all() {
        let table = DispatchTable::new();
        for seq in 1..=3 {
            table.register(seq, call_handler());
        }

        let drained = table.remove_all();
        assert_eq!(drained.len(), 3);
        assert_eq!(table.len(), 0);
        assert!(table.remove_all().is_empty());
    }

    #[test]
    fn test_tables_are_independent() {
        let a = DispatchTable::new();
        let b = DispatchTable::new();
        a.register(1, call_handler());

        assert!(a.lookup(1).is_some());
        assert!(b.lookup(1).is_none());
    }
}
