//! Transaction identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TransactionError;

/// Identifier of a transaction, unique within the coordinator that issued it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TxnId(u64);

impl TxnId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value of the id.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Monotonic transaction id generator. Ids are never reused.
pub struct TxnIdGenerator {
    counter: AtomicU64,
}

impl TxnIdGenerator {
    pub fn new() -> Self {
        Self::with_start(1)
    }

    pub fn with_start(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }

    /// Generate the next transaction id
    pub fn next(&self) -> Result<TxnId, TransactionError> {
        let mut cur = self.counter.load(Ordering::SeqCst);
        loop {
            if cur == u64::MAX {
                return Err(TransactionError::TxnIdOverflow(cur));
            }
            match self.counter.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(TxnId(cur)),
                Err(actual) => cur = actual,
            }
        }
    }

    /// The id the next call to [`Self::next`] would return.
    pub fn peek(&self) -> TxnId {
        TxnId(self.counter.load(Ordering::SeqCst))
    }
}

impl Default for TxnIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let generator = TxnIdGenerator::new();
        let a = generator.next().unwrap();
        let b = generator.next().unwrap();
        assert!(b > a);
        assert_eq!(generator.peek().raw(), b.raw() + 1);
    }

    #[test]
    fn test_overflow() {
        let generator = TxnIdGenerator::with_start(u64::MAX - 1);
        assert!(generator.next().is_ok());
        assert!(matches!(
            generator.next(),
            Err(TransactionError::TxnIdOverflow(_))
        ));
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        let generator = Arc::new(TxnIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                thread::spawn(move || {
                    (0..1000)
                        .map(|_| generator.next().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
