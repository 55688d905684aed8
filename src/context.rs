//! Per-call context.
//!
//! A [`Context`] travels with every call and carries two optional signals:
//!
//! - an open transaction that nested operations must reuse instead of opening
//!   a new one (see [`crate::db::Transaction::with_context`]);
//! - a read-after-write flag shared by every clone of the context. Once marked,
//!   reads issued with the context ask the replica to catch up first.

use crate::db::Transaction;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct Context {
    transaction: Option<Transaction>,
    sync: Option<Arc<AtomicBool>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// The transaction carried by this context, always an inherited handle.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// A copy of this context carrying `transaction`.
    pub fn with_transaction(&self, transaction: &Transaction) -> Self {
        Self {
            transaction: Some(transaction.inherited()),
            sync: self.sync.clone(),
        }
    }

    /// A copy of this context without a transaction, keeping the sync flag.
    pub fn without_transaction(&self) -> Self {
        Self {
            transaction: None,
            sync: self.sync.clone(),
        }
    }

    /// Install a read-after-write flag, unset. Keeps an existing flag.
    pub fn with_sync(&self) -> Self {
        Self {
            transaction: self.transaction.clone(),
            sync: Some(
                self.sync
                    .clone()
                    .unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
            ),
        }
    }

    /// Mark that subsequent reads must observe prior writes.
    ///
    /// No-op unless a flag was installed with [`Context::with_sync`].
    pub fn mark_sync_needed(&self) {
        if let Some(sync) = &self.sync {
            sync.store(true, Ordering::Release);
        }
    }

    pub fn sync_needed(&self) -> bool {
        self.sync
            .as_ref()
            .is_some_and(|sync| sync.load(Ordering::Acquire))
    }
}
