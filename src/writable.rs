//! The user-facing writable handle.
//!
//! A [`WritableDatabase`] owns exactly one writable backend and holds its
//! exclusive path lock from open to close. It layers three things over the
//! backend's mutation API:
//!
//! - the transaction state machine (see [`transaction`][crate::transaction]):
//!   `begin_transaction` is a handle-local state change, `commit_transaction`
//!   / `cancel_transaction` involve the backend only when the transaction
//!   actually staged changes;
//! - close semantics: with no transaction active, `close()` implicitly
//!   commits whatever is uncommitted; mid-transaction, `close()` discards
//!   the staged changes instead. Either way the handle ends Closed and the
//!   lock is released;
//! - the spelling, synonym, and metadata side-channels.
//!
//! Reads go to the same backend, so a writer observes its own uncommitted
//! state. Unlike a read-only handle, the statistics getters here query live
//! state and therefore fail with [`Error::Closed`] after close.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{Backend, BackendStats, OpenFlags, OpenMode, WritableBackend};
use crate::backends::slate::SlateDatabase;
use crate::cursor::{
    MaterializedPositions, MaterializedPostings, MaterializedTerms, PostingCursor, PositionCursor,
    TermCursor, ValueCursor,
};
use crate::remote::client::{RemoteBackend, RemoteOptions};
use crate::transaction::TxnState;
use crate::types::{DocCount, DocId, Document, TermCount, ValueSlot};
use crate::{Error, Result};

/// A writable handle over a single writable backend.
pub struct WritableDatabase {
    backend: Arc<dyn WritableBackend>,
    reader: Arc<dyn Backend>,
    txn: Mutex<TxnState>,
    closed: AtomicBool,
}

impl WritableDatabase {
    /// Open (or create, per `mode`) the database in `path` for writing,
    /// taking the exclusive writable lock. A second writer on the same path
    /// gets [`Error::Lock`].
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, flags: OpenFlags) -> Result<WritableDatabase> {
        if mode == OpenMode::Read {
            return Err(Error::InvalidArgument("writable open requires a writable mode"));
        }
        let slate = Arc::new(SlateDatabase::open(path, mode, flags)?);
        Ok(WritableDatabase {
            backend: slate.clone(),
            reader: slate,
            txn: Mutex::new(TxnState::None),
            closed: AtomicBool::new(false),
        })
    }

    /// Connect to a writable database served over TCP.
    pub fn open_remote(opts: RemoteOptions) -> Result<WritableDatabase> {
        let remote = Arc::new(RemoteBackend::connect(&opts)?);
        Ok(WritableDatabase {
            backend: remote.clone(),
            reader: remote,
            txn: Mutex::new(TxnState::None),
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    // -- mutations -----------------------------------------------------

    pub fn add_document(&self, doc: &Document) -> Result<DocId> {
        self.check_open()?;
        let docid = self.backend.add_document(doc)?;
        self.txn.lock().note_change();
        Ok(docid)
    }

    pub fn delete_document(&self, docid: DocId) -> Result<()> {
        self.check_open()?;
        self.backend.delete_document(docid)?;
        self.txn.lock().note_change();
        Ok(())
    }

    pub fn replace_document(&self, docid: DocId, doc: &Document) -> Result<()> {
        self.check_open()?;
        self.backend.replace_document(docid, doc)?;
        self.txn.lock().note_change();
        Ok(())
    }

    /// Replace every document indexed by `term` with `doc`, or add `doc` if
    /// none is. Returns the docid the document landed at.
    pub fn replace_document_by_term(
        &self,
        term: impl AsRef<[u8]>,
        doc: &Document,
    ) -> Result<DocId> {
        self.check_open()?;
        let docid = self.backend.replace_document_by_term(term.as_ref(), doc)?;
        self.txn.lock().note_change();
        Ok(docid)
    }

    /// Make every change since the last commit durable. Not legal inside a
    /// transaction.
    pub fn commit(&self) -> Result<()> {
        self.check_open()?;
        if self.txn.lock().is_active() {
            return Err(Error::InvalidOperation("can't commit during a transaction"));
        }
        self.backend.commit()
    }

    // -- transactions --------------------------------------------------

    /// Enter a transaction. Pending non-transactional changes are committed
    /// first so the transaction gets a clean rollback point. Entering is
    /// otherwise a handle-local state change: no backend round-trip happens
    /// for a remote database.
    pub fn begin_transaction(&self, flush_on_commit: bool) -> Result<()> {
        let mut txn = self.txn.lock();
        txn.begin(flush_on_commit)?;
        if self.backend.has_uncommitted() {
            if let Err(e) = self.backend.commit() {
                let _ = txn.end_cancel();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Commit the open transaction. With nothing staged this is purely a
    /// state change; otherwise the staged changes are flushed (or, for an
    /// unflushed transaction, left applied for a later commit).
    pub fn commit_transaction(&self) -> Result<()> {
        let (flush_on_commit, dirty) = self.txn.lock().end_commit()?;
        if dirty && flush_on_commit {
            self.backend.commit()?;
        }
        Ok(())
    }

    /// Cancel the open transaction, rolling back whatever it staged.
    pub fn cancel_transaction(&self) -> Result<()> {
        let dirty = self.txn.lock().end_cancel()?;
        if dirty {
            self.backend.discard()?;
        }
        Ok(())
    }

    // -- spelling ------------------------------------------------------

    pub fn add_spelling(&self, word: impl AsRef<[u8]>, freq_inc: DocCount) -> Result<()> {
        self.check_open()?;
        self.backend.add_spelling(word.as_ref(), freq_inc)?;
        self.txn.lock().note_change();
        Ok(())
    }

    pub fn remove_spelling(&self, word: impl AsRef<[u8]>, freq_dec: DocCount) -> Result<()> {
        self.check_open()?;
        self.backend.remove_spelling(word.as_ref(), freq_dec)?;
        self.txn.lock().note_change();
        Ok(())
    }

    /// The closest known word under edit distance, frequency breaking ties.
    pub fn get_spelling_suggestion(
        &self,
        word: impl AsRef<[u8]>,
        max_edit_distance: u32,
    ) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.backend.spelling_suggestion(word.as_ref(), max_edit_distance)
    }

    /// A cursor positioned on the first word of the spelling corpus;
    /// `termfreq` reports each word's frequency.
    pub fn spellings_begin(&self) -> Result<Box<dyn TermCursor>> {
        self.check_open()?;
        let mut cursor = self.backend.spellings()?;
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn spellings_end(&self) -> Box<dyn TermCursor> {
        Box::new(MaterializedTerms::at_end_sentinel())
    }

    // -- synonyms ------------------------------------------------------

    pub fn add_synonym(&self, term: impl AsRef<[u8]>, synonym: impl AsRef<[u8]>) -> Result<()> {
        self.check_open()?;
        self.backend.add_synonym(term.as_ref(), synonym.as_ref())?;
        self.txn.lock().note_change();
        Ok(())
    }

    pub fn remove_synonym(&self, term: impl AsRef<[u8]>, synonym: impl AsRef<[u8]>) -> Result<()> {
        self.check_open()?;
        self.backend.remove_synonym(term.as_ref(), synonym.as_ref())?;
        self.txn.lock().note_change();
        Ok(())
    }

    pub fn clear_synonyms(&self, term: impl AsRef<[u8]>) -> Result<()> {
        self.check_open()?;
        self.backend.clear_synonyms(term.as_ref())?;
        self.txn.lock().note_change();
        Ok(())
    }

    /// A cursor positioned on the first synonym recorded for `term`.
    pub fn synonyms_begin(&self, term: impl AsRef<[u8]>) -> Result<Box<dyn TermCursor>> {
        self.check_open()?;
        let mut cursor = self.backend.synonyms(term.as_ref())?;
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn synonyms_end(&self, _term: impl AsRef<[u8]>) -> Box<dyn TermCursor> {
        Box::new(MaterializedTerms::at_end_sentinel())
    }

    /// A cursor positioned on the first term that has synonyms.
    pub fn synonym_keys_begin(&self, prefix: impl AsRef<[u8]>) -> Result<Box<dyn TermCursor>> {
        self.check_open()?;
        let mut cursor = self.backend.synonym_keys(prefix.as_ref())?;
        cursor.advance()?;
        Ok(cursor)
    }

    // -- metadata ------------------------------------------------------

    /// Set a metadata entry; an empty value deletes it.
    pub fn set_metadata(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.check_open()?;
        self.backend.set_metadata(key.as_ref(), value.as_ref())?;
        self.txn.lock().note_change();
        Ok(())
    }

    /// The metadata value stored under `key`; empty if there is none.
    pub fn get_metadata(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        self.check_open()?;
        Ok(self.backend.metadata(key.as_ref())?.unwrap_or_default())
    }

    pub fn metadata_keys_begin(&self, prefix: impl AsRef<[u8]>) -> Result<Box<dyn TermCursor>> {
        self.check_open()?;
        let mut cursor = self.backend.metadata_keys(prefix.as_ref())?;
        cursor.advance()?;
        Ok(cursor)
    }

    // -- reads (delegated to the same backend) -------------------------

    pub fn postlist_begin(&self, term: impl AsRef<[u8]>) -> Result<Box<dyn PostingCursor>> {
        self.check_open()?;
        let mut cursor = self.reader.postings(term.as_ref())?;
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn postlist_end(&self, _term: impl AsRef<[u8]>) -> Box<dyn PostingCursor> {
        Box::new(MaterializedPostings::at_end_sentinel())
    }

    pub fn termlist_begin(&self, docid: DocId) -> Result<Box<dyn TermCursor>> {
        self.check_open()?;
        let mut cursor = self.reader.termlist(docid)?;
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn termlist_end(&self, _docid: DocId) -> Box<dyn TermCursor> {
        Box::new(MaterializedTerms::at_end_sentinel())
    }

    pub fn positionlist_begin(
        &self,
        docid: DocId,
        term: impl AsRef<[u8]>,
    ) -> Result<Box<dyn PositionCursor>> {
        self.check_open()?;
        let mut cursor = self.reader.positions(docid, term.as_ref())?;
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn positionlist_end(
        &self,
        _docid: DocId,
        _term: impl AsRef<[u8]>,
    ) -> Box<dyn PositionCursor> {
        Box::new(MaterializedPositions::at_end_sentinel())
    }

    pub fn allterms_begin(&self, prefix: impl AsRef<[u8]>) -> Result<Box<dyn TermCursor>> {
        self.check_open()?;
        let mut cursor = self.reader.allterms(prefix.as_ref())?;
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn allterms_end(&self, _prefix: impl AsRef<[u8]>) -> Box<dyn TermCursor> {
        Box::new(MaterializedTerms::at_end_sentinel())
    }

    pub fn get_document(&self, docid: DocId) -> Result<Document> {
        self.check_open()?;
        self.reader.document(docid)
    }

    pub fn get_termfreq(&self, term: impl AsRef<[u8]>) -> Result<DocCount> {
        self.check_open()?;
        self.reader.termfreq(term.as_ref())
    }

    pub fn get_collection_freq(&self, term: impl AsRef<[u8]>) -> Result<u64> {
        self.check_open()?;
        self.reader.collection_freq(term.as_ref())
    }

    pub fn term_exists(&self, term: impl AsRef<[u8]>) -> Result<bool> {
        self.check_open()?;
        self.reader.term_exists(term.as_ref())
    }

    pub fn get_value_freq(&self, slot: ValueSlot) -> Result<DocCount> {
        self.check_open()?;
        self.reader.value_freq(slot)
    }

    pub fn get_value_lower_bound(&self, slot: ValueSlot) -> Result<Vec<u8>> {
        self.check_open()?;
        self.reader.value_lower_bound(slot)
    }

    pub fn get_value_upper_bound(&self, slot: ValueSlot) -> Result<Vec<u8>> {
        self.check_open()?;
        self.reader.value_upper_bound(slot)
    }

    pub fn valuestream_begin(&self, slot: ValueSlot) -> Result<Box<dyn ValueCursor>> {
        self.check_open()?;
        let mut cursor = self.reader.valuestream(slot)?;
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn get_doclength(&self, docid: DocId) -> Result<TermCount> {
        self.check_open()?;
        self.reader.doc_length(docid)
    }

    pub fn get_unique_terms(&self, docid: DocId) -> Result<TermCount> {
        self.check_open()?;
        self.reader.unique_terms(docid)
    }

    pub fn get_wdf_upper_bound(&self, term: impl AsRef<[u8]>) -> Result<TermCount> {
        self.check_open()?;
        self.reader.wdf_upper_bound(term.as_ref())
    }

    // -- statistics (live: a writer sees its own uncommitted state) ----

    pub fn get_doccount(&self) -> Result<DocCount> {
        self.check_open()?;
        Ok(self.reader.stats()?.doccount)
    }

    pub fn get_lastdocid(&self) -> Result<DocId> {
        self.check_open()?;
        Ok(self.reader.stats()?.lastdocid)
    }

    pub fn get_avlength(&self) -> Result<f64> {
        self.check_open()?;
        Ok(self.reader.stats()?.avlength())
    }

    pub fn get_doclength_lower_bound(&self) -> Result<TermCount> {
        self.check_open()?;
        Ok(self.reader.stats()?.doclen_lower_bound)
    }

    pub fn get_doclength_upper_bound(&self) -> Result<TermCount> {
        self.check_open()?;
        Ok(self.reader.stats()?.doclen_upper_bound)
    }

    pub fn has_positions(&self) -> Result<bool> {
        self.check_open()?;
        Ok(self.reader.stats()?.has_positions)
    }

    pub fn get_uuid(&self) -> Result<String> {
        self.check_open()?;
        Ok(self.reader.stats()?.uuid)
    }

    // -- lifecycle -----------------------------------------------------

    pub(crate) fn stats_snapshot(&self) -> Result<BackendStats> {
        self.check_open()?;
        self.reader.stats()
    }

    /// Discard everything applied since the last commit (server side of a
    /// remote client's cancel).
    pub(crate) fn discard_uncommitted(&self) -> Result<()> {
        self.check_open()?;
        self.backend.discard()
    }

    pub fn keep_alive(&self) -> Result<()> {
        self.reader.keep_alive()
    }

    pub fn reopen(&self) -> Result<()> {
        self.check_open()?;
        self.reader.reopen()
    }

    /// Close the handle and release the writable lock.
    ///
    /// With no transaction active, uncommitted changes are flushed first
    /// (close implies commit) and a flush failure (a dead remote peer, a
    /// full disk) is returned, though the handle still ends Closed and the
    /// lock is still released. With a transaction active, the staged
    /// changes are discarded instead. Closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let txn_active = {
            let mut txn = self.txn.lock();
            let active = txn.is_active();
            if active {
                let _ = txn.end_cancel();
            }
            active
        };
        let flush = if txn_active {
            // Staged changes must not survive; a failure to roll back a
            // dead remote peer still discards, since the server drops
            // uncommitted state with the connection.
            let _ = self.backend.discard();
            Ok(())
        } else if self.backend.has_uncommitted() {
            self.backend.commit()
        } else {
            Ok(())
        };
        self.backend.close();
        debug!("closed writable database handle");
        flush
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// A human-readable summary. Never fails, even on a closed handle.
    pub fn get_description(&self) -> String {
        format!("WritableDatabase({})", self.reader.description())
    }
}

impl Drop for WritableDatabase {
    fn drop(&mut self) {
        // Same semantics as close(); errors have nowhere to go from here.
        let _ = self.close();
    }
}
