//! Admission relay.
//!
//! A fixed pool of tickets bounding how many calls may be in flight or queued
//! for a connection at once. Callers beyond capacity wait in the semaphore queue;
//! the wait is measured and reported as queue time.

use crate::error::{DbError, DbResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct Relay {
    tickets: Arc<Semaphore>,
    capacity: usize,
}

impl Relay {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tickets: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Acquire a ticket, waiting until one is free.
    ///
    /// Returns the ticket and the time spent waiting for it.
    pub async fn start(&self) -> DbResult<(Ticket, Duration)> {
        let started = Instant::now();
        let permit = Arc::clone(&self.tickets)
            .acquire_owned()
            .await
            .map_err(|_| DbError::internal("Admission relay closed"))?;
        Ok((
            Ticket {
                permit: Some(permit),
            },
            started.elapsed(),
        ))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tickets currently free.
    pub fn available(&self) -> usize {
        self.tickets.available_permits()
    }
}

/// A held admission ticket. Dropping it releases the ticket.
#[derive(Debug)]
pub struct Ticket {
    permit: Option<OwnedSemaphorePermit>,
}

impl Ticket {
    /// Release the ticket. Releasing twice is a no-op.
    pub fn end(&mut self) {
        self.permit.take();
    }

    /// Release the ticket only if the accompanying operation failed.
    ///
    /// On success the ticket stays held and ownership moves to whatever
    /// outlives the call, such as an open transaction.
    pub fn conditional_end(&mut self, failed: bool) {
        if failed {
            self.end();
        }
    }

    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }
}
