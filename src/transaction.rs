//! The transaction state machine layered over a writable backend.
//!
//! A transaction groups mutations so they become durable together
//! (`commit_transaction`) or not at all (`cancel_transaction`). Entering a
//! transaction is a handle-local state change; no backend round-trip happens
//! until the transaction holds changes. Closing a handle mid-transaction
//! discards the staged changes.

use crate::{Error, Result};

/// Whether a transaction is in progress, and what it has staged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    /// No transaction in progress.
    None,
    /// A transaction is open.
    Active {
        /// Commit durably when the transaction commits. When false, the
        /// changes are applied at commit but only flushed by a later
        /// explicit commit (or close).
        flush_on_commit: bool,
        /// The transaction has staged at least one change.
        dirty: bool,
    },
}

impl TxnState {
    /// Enter a transaction. Fails if one is already active.
    pub fn begin(&mut self, flush_on_commit: bool) -> Result<()> {
        match self {
            TxnState::None => {
                *self = TxnState::Active { flush_on_commit, dirty: false };
                Ok(())
            }
            TxnState::Active { .. } => {
                Err(Error::InvalidOperation("a transaction is already in progress"))
            }
        }
    }

    /// Record that a mutation was applied while the transaction is open.
    pub fn note_change(&mut self) {
        if let TxnState::Active { dirty, .. } = self {
            *dirty = true;
        }
    }

    /// Leave the transaction on commit, reporting `(flush_on_commit, dirty)`
    /// so the caller knows whether the backend must be involved. Fails if no
    /// transaction is active.
    pub fn end_commit(&mut self) -> Result<(bool, bool)> {
        match *self {
            TxnState::None => Err(Error::InvalidOperation("no transaction is in progress")),
            TxnState::Active { flush_on_commit, dirty } => {
                *self = TxnState::None;
                Ok((flush_on_commit, dirty))
            }
        }
    }

    /// Leave the transaction on cancel, reporting whether changes were
    /// staged. Fails if no transaction is active.
    pub fn end_cancel(&mut self) -> Result<bool> {
        match *self {
            TxnState::None => Err(Error::InvalidOperation("no transaction is in progress")),
            TxnState::Active { dirty, .. } => {
                *self = TxnState::None;
                Ok(dirty)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TxnState::Active { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_twice_is_invalid() {
        let mut txn = TxnState::None;
        txn.begin(true).unwrap();
        assert!(matches!(txn.begin(true), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn commit_and_cancel_need_an_active_transaction() {
        let mut txn = TxnState::None;
        assert!(matches!(txn.end_commit(), Err(Error::InvalidOperation(_))));
        assert!(matches!(txn.end_cancel(), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn dirty_tracking() {
        let mut txn = TxnState::None;
        txn.begin(false).unwrap();
        assert_eq!(txn.end_commit().unwrap(), (false, false));

        txn.begin(true).unwrap();
        txn.note_change();
        assert_eq!(txn.end_commit().unwrap(), (true, true));
        assert!(!txn.is_active());

        txn.begin(true).unwrap();
        txn.note_change();
        assert!(txn.end_cancel().unwrap());
    }

    #[test]
    fn note_change_outside_a_transaction_is_ignored() {
        let mut txn = TxnState::None;
        txn.note_change();
        assert_eq!(txn, TxnState::None);
    }
}
