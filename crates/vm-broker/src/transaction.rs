//! The transaction table
//!
//! Owned by the dispatcher and only ever touched from its loop, so it needs
//! no locking. A slot lives from the moment its `Start` action is handled
//! until the caller completes it (or it is cancelled by shutdown or the
//! abandoned-transaction sweep).

use async_channel::{Receiver, Sender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::action::{OperationKind, ResultHandle, ResultValue};
use crate::error::{Error, Result};
use crate::types::TransactionId;

/// Lifecycle state of a live transaction
///
/// A completed transaction has no state; its slot is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Operation launched, no caller has asked for its results yet
    Pending,
    /// A caller is reading results; more values may follow
    ValueReady,
    /// Cancellation requested; further reads report cancellation
    Cancelled,
}

/// Diagnostic view of a live transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    /// Transaction identifier
    pub id: TransactionId,
    /// Operation the transaction runs
    pub kind: OperationKind,
    /// Current state
    pub state: TransactionState,
    /// When the transaction was opened
    pub created_at: DateTime<Utc>,
}

struct Slot {
    kind: OperationKind,
    state: TransactionState,
    results: Receiver<ResultValue>,
    token: CancellationToken,
    created_at: DateTime<Utc>,
    opened: Instant,
}

/// A freshly allocated transaction, handed to its operation runner
pub(crate) struct NewTransaction {
    pub id: TransactionId,
    pub results: Sender<ResultValue>,
    pub token: CancellationToken,
}

pub(crate) struct TransactionTable {
    next_id: u64,
    result_buffer: usize,
    slots: BTreeMap<TransactionId, Slot>,
}

impl TransactionTable {
    pub fn new(result_buffer: usize) -> Self {
        Self {
            next_id: 1,
            result_buffer: result_buffer.max(1),
            slots: BTreeMap::new(),
        }
    }

    /// Open a transaction whose token is a child of `parent`
    pub fn allocate(&mut self, kind: OperationKind, parent: &CancellationToken) -> NewTransaction {
        let id = TransactionId::new(self.next_id);
        self.next_id += 1;

        let (tx, rx) = async_channel::bounded(self.result_buffer);
        let token = parent.child_token();

        self.slots.insert(
            id,
            Slot {
                kind,
                state: TransactionState::Pending,
                results: rx,
                token: token.clone(),
                created_at: Utc::now(),
                opened: Instant::now(),
            },
        );

        NewTransaction {
            id,
            results: tx,
            token,
        }
    }

    /// Hand out access to a transaction's results
    pub fn get_result(&mut self, id: TransactionId) -> Result<ResultHandle> {
        let slot = self
            .slots
            .get_mut(&id)
            .ok_or(Error::UnknownTransaction(id))?;

        if slot.state == TransactionState::Cancelled {
            return Err(Error::Cancelled);
        }

        slot.state = TransactionState::ValueReady;
        Ok(ResultHandle {
            id,
            results: slot.results.clone(),
            token: slot.token.clone(),
        })
    }

    /// Mark a transaction cancelled and signal its runner
    ///
    /// Returns `false` for unknown identifiers.
    pub fn cancel(&mut self, id: TransactionId) -> bool {
        match self.slots.get_mut(&id) {
            Some(slot) => {
                slot.token.cancel();
                slot.state = TransactionState::Cancelled;
                true
            }
            None => false,
        }
    }

    /// Release a transaction's slot
    ///
    /// Returns `false` if the slot was already released.
    pub fn complete(&mut self, id: TransactionId) -> bool {
        self.slots.remove(&id).is_some()
    }

    /// Cancel and release a transaction in one step
    pub fn discard(&mut self, id: TransactionId) {
        if let Some(slot) = self.slots.remove(&id) {
            slot.token.cancel();
        }
    }

    /// Cancel and release every transaction older than `ttl`
    pub fn sweep_expired(&mut self, ttl: Duration) -> Vec<TransactionId> {
        let expired: Vec<TransactionId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.opened.elapsed() >= ttl)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.discard(*id);
        }
        expired
    }

    /// Cancel every live transaction, returning how many there were
    pub fn cancel_all(&mut self) -> usize {
        let count = self.slots.len();
        for (_, slot) in std::mem::take(&mut self.slots) {
            slot.token.cancel();
        }
        count
    }

    pub fn snapshot(&self) -> Vec<TransactionInfo> {
        self.slots
            .iter()
            .map(|(id, slot)| TransactionInfo {
                id: *id,
                kind: slot.kind,
                state: slot.state,
                created_at: slot.created_at,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
