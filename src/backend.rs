//! The backend capability set: one trait for the read contract every
//! storage implementation provides, and an extension trait for the writable
//! operations.
//!
//! Backends are consumed through the handle types ([`Database`][crate::db::Database],
//! [`WritableDatabase`][crate::writable::WritableDatabase]), which own their
//! backends via `Arc` and share that state with the cursors they hand out.
//! Every method takes `&self`; backends guard their internals with locks, so
//! a cursor can keep a shared, non-owning association with the backend after
//! the handle has moved on.
//!
//! A backend may not implement the whole surface: the read-only DA backend
//! answers [`Error::Unavailable`] for the spelling and synonym listings it
//! has no tables for, and that is the default provided here.

use serde::{Deserialize, Serialize};

use crate::cursor::{PostingCursor, PositionCursor, TermCursor, ValueCursor};
use crate::types::{DocCount, DocId, Document, TermCount, ValueSlot};
use crate::{Error, Result};

/// How to open or create a database directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Open an existing database read-only.
    Read,
    /// Open an existing database for writing; fail if it doesn't exist.
    Open,
    /// Create a new database; fail if one already exists.
    Create,
    /// Open for writing, creating the database first if needed.
    CreateOrOpen,
    /// Create a new database, discarding any existing one at the path.
    CreateOrOverwrite,
}

/// Tuning flags accepted at open time.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Skip fsync on commit; the OS decides when data reaches the platter.
    pub no_sync: bool,
    /// Also sync the containing directory on commit.
    pub full_sync: bool,
    /// Block waiting for the writable lock instead of failing fast.
    pub retry_lock: bool,
}

/// The statistics a handle snapshots at open and reopen. These are the
/// values a read-only handle may keep answering with after close.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendStats {
    pub uuid: String,
    pub doccount: DocCount,
    pub lastdocid: DocId,
    pub total_doclen: u64,
    pub doclen_lower_bound: TermCount,
    pub doclen_upper_bound: TermCount,
    pub has_positions: bool,
}

impl BackendStats {
    pub fn avlength(&self) -> f64 {
        if self.doccount == 0 {
            0.0
        } else {
            self.total_doclen as f64 / self.doccount as f64
        }
    }
}

/// The uniform read contract (posting lists, term lists, position lists,
/// value streams, the term dictionary, statistics, and the side-channel
/// reads), plus lifecycle control.
///
/// Operations that need backend state fail with [`Error::Closed`] once
/// [`close`][Backend::close] has run, except where a method documents
/// otherwise. Remote implementations substitute [`Error::Network`] once
/// their connection is broken.
pub trait Backend: Send + Sync {
    /// Read the current statistics. Needs live backend state.
    fn stats(&self) -> Result<BackendStats>;

    /// Open a posting cursor for `term`. Unknown terms yield an empty
    /// cursor, not an error.
    fn postings(&self, term: &[u8]) -> Result<Box<dyn PostingCursor>>;

    /// Open a cursor over the terms indexing `docid`. The sequence is
    /// materialized at construction, so iterating it afterwards never
    /// performs I/O.
    fn termlist(&self, docid: DocId) -> Result<Box<dyn TermCursor>>;

    /// Open a cursor over the positions of `term` within `docid`.
    fn positions(&self, docid: DocId, term: &[u8]) -> Result<Box<dyn PositionCursor>>;

    /// Enumerate the term dictionary in lexicographic order, restricted to
    /// terms starting with `prefix` (empty prefix: all terms).
    fn allterms(&self, prefix: &[u8]) -> Result<Box<dyn TermCursor>>;

    fn document(&self, docid: DocId) -> Result<Document>;

    fn termfreq(&self, term: &[u8]) -> Result<DocCount>;

    fn collection_freq(&self, term: &[u8]) -> Result<u64>;

    fn term_exists(&self, term: &[u8]) -> Result<bool>;

    fn value_freq(&self, slot: ValueSlot) -> Result<DocCount>;

    fn value_lower_bound(&self, slot: ValueSlot) -> Result<Vec<u8>>;

    fn value_upper_bound(&self, slot: ValueSlot) -> Result<Vec<u8>>;

    fn valuestream(&self, slot: ValueSlot) -> Result<Box<dyn ValueCursor>>;

    fn doc_length(&self, docid: DocId) -> Result<TermCount>;

    fn unique_terms(&self, docid: DocId) -> Result<TermCount>;

    fn wdf_upper_bound(&self, term: &[u8]) -> Result<TermCount>;

    fn metadata(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn metadata_keys(&self, prefix: &[u8]) -> Result<Box<dyn TermCursor>> {
        let _ = prefix;
        Err(Error::Unavailable("metadata enumeration"))
    }

    fn spellings(&self) -> Result<Box<dyn TermCursor>> {
        Err(Error::Unavailable("spelling data"))
    }

    fn spelling_suggestion(&self, word: &[u8], max_edit_distance: u32) -> Result<Option<Vec<u8>>> {
        let _ = (word, max_edit_distance);
        Err(Error::Unavailable("spelling data"))
    }

    fn synonyms(&self, term: &[u8]) -> Result<Box<dyn TermCursor>> {
        let _ = term;
        Err(Error::Unavailable("synonym data"))
    }

    fn synonym_keys(&self, prefix: &[u8]) -> Result<Box<dyn TermCursor>> {
        let _ = prefix;
        Err(Error::Unavailable("synonym data"))
    }

    /// Re-snapshot the on-disk state so subsequent reads observe the latest
    /// committed revision.
    fn reopen(&self) -> Result<()>;

    /// Release the backend's files/sockets. Terminal; idempotent; every
    /// owned descriptor is released before this returns.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Probe liveness. A no-op for local backends (even closed ones);
    /// remote backends ping the peer and report `Closed`/`Network`.
    fn keep_alive(&self) -> Result<()> {
        Ok(())
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn description(&self) -> String;
}

/// The mutation extension implemented by writable backends.
///
/// Mutations apply to the backend's live state immediately and become
/// durable at [`commit`][WritableBackend::commit]; [`discard`][WritableBackend::discard]
/// drops everything applied since the last commit. Transaction sequencing
/// lives above this trait, in
/// [`WritableDatabase`][crate::writable::WritableDatabase].
pub trait WritableBackend: Backend {
    /// Add a document, assigning and returning the next docid.
    fn add_document(&self, doc: &Document) -> Result<DocId>;

    fn delete_document(&self, docid: DocId) -> Result<()>;

    /// Replace the document at `docid`, creating it if absent.
    fn replace_document(&self, docid: DocId, doc: &Document) -> Result<()>;

    /// Replace every document indexed by `term` with `doc` (at the lowest
    /// matching docid), or add `doc` if no document matches. Returns the
    /// docid the document ended up at.
    fn replace_document_by_term(&self, term: &[u8], doc: &Document) -> Result<DocId>;

    /// Make every change since the last commit durable.
    fn commit(&self) -> Result<()>;

    /// Drop every change since the last commit.
    fn discard(&self) -> Result<()>;

    /// True if there are changes a `commit` would persist.
    fn has_uncommitted(&self) -> bool;

    fn add_spelling(&self, word: &[u8], freq_inc: DocCount) -> Result<()>;

    fn remove_spelling(&self, word: &[u8], freq_dec: DocCount) -> Result<()>;

    fn add_synonym(&self, term: &[u8], synonym: &[u8]) -> Result<()>;

    fn remove_synonym(&self, term: &[u8], synonym: &[u8]) -> Result<()>;

    fn clear_synonyms(&self, term: &[u8]) -> Result<()>;

    /// Set a metadata entry. An empty value deletes the entry.
    fn set_metadata(&self, key: &[u8], value: &[u8]) -> Result<()>;
}
