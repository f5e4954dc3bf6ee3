/*!
This crate is an embeddable full-text search engine core: a set of storage
backends behind one cursor contract, a database-handle lifecycle model, and a
TCP protocol that serves the same contract from a remote host.

The Database
------------

A database is a collection of [`Document`]s, each identified by a positive
32-bit docid. A document carries opaque binary data, a set of numbered value
slots (short byte strings), and a sequence of `(term, positions)` postings.
Terms are short byte strings; the crate performs no text analysis of its own,
so callers index documents with already-analyzed terms.

A [`Database`] is a read handle over one or more backends ("shards"). When a
handle holds several shards, docids interleave across them and every cursor
the handle returns merges the shards transparently. A [`WritableDatabase`]
owns exactly one writable backend, holds an exclusive path-scoped lock for
as long as it is open, and layers a transaction state machine plus the
spelling, synonym, and metadata side-channels over the mutation API.

Cursors: Reading the Database
------

All reading goes through cursors: [`PostingCursor`] for the documents
containing a term, [`TermCursor`] for the terms indexing a document (and for
database-wide term enumeration), [`PositionCursor`] for within-document
positions, and [`ValueCursor`] for streaming one value slot across documents.
A cursor starts before its first element; `advance` moves it forward, and
once it reports `at_end` it stays there. Posting cursors also support
`skip_to`, which moves forward to the first document with `docid >= target`
and may descend block indexes rather than stepping element by element.

Cursors are bound to the handle that produced them, but do not keep it alive:
they hold a shared, non-owning association with the backend's state. Data a
cursor has already decoded stays readable even after the handle is closed;
any step that would touch the backend again fails instead.

Closing and the failure contract
-----

`close()` moves a handle to a terminal Closed state, releasing its file
descriptors, sockets, and (for writers) the exclusive lock before it returns.
Closing is idempotent. Afterwards, operations divide into:

- operations that need a fresh backend read, which fail with
  [`Error::Closed`];
- cached-statistics reads (uuid, document counts, length bounds), which a
  read-only handle still answers from values captured at open;
- `get_description()` and `close()`, which always succeed.

A writable handle closed with no transaction active first flushes its
uncommitted changes (close implies commit); closed mid-transaction it
discards the staged changes instead. The remote backend follows the same
shape with [`Error::Network`] in place of [`Error::Closed`]: once the peer
dies the connection latches Broken, prefetched cursor data stays readable,
and everything else fails.

Remote Access
-----

[`TcpServer`] accepts connections and hands each one to a
[`ConnectionHandler`] on its own thread; [`SearchServer`] is the handler that
opens a per-connection local handle and speaks the wire protocol.
[`Database::open_remote`] / [`WritableDatabase::open_remote`] connect a
client backend that presents the ordinary cursor contract over the socket.
`keep_alive()` probes the connection; reconnection is always explicit, by
opening a fresh handle.

*/

use thiserror::Error as ThisError;

pub mod backend;
pub mod backends;
pub mod cursor;
pub mod db;
pub mod remote;
pub mod transaction;
pub mod types;
pub mod writable;

mod spelling;

pub use backend::{Backend, BackendStats, OpenFlags, OpenMode, WritableBackend};
pub use cursor::{PostingCursor, PositionCursor, TermCursor, ValueCursor};
pub use db::Database;
pub use remote::client::RemoteOptions;
pub use remote::server::{ConnectionHandler, SearchServer, TcpServer};
pub use types::{DocCount, DocId, Document, Posting, TermCount, TermPos, ValueSlot};
pub use writable::WritableDatabase;

/// The error surface of every database operation.
///
/// Each failure kind a caller might want to distinguish is its own variant;
/// the handle and cursor documentation lists which kinds each operation can
/// raise.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// The handle has been closed and the operation requires live backend
    /// state.
    #[error("database has been closed")]
    Closed,
    /// The exclusive writable lock could not be obtained.
    #[error("unable to get write lock on {0}: already locked")]
    Lock(String),
    /// On-disk structures violate the backend's invariants.
    #[error("database corrupt: {0}")]
    Corrupt(String),
    /// The remote peer is unreachable or the stream is broken.
    #[error("network error: {0}")]
    Network(String),
    /// The operation is not legal in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    /// The caller supplied an out-of-range docid, slot, or term.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The operation is not implemented by this backend.
    #[error("unavailable with this backend: {0}")]
    Unavailable(&'static str),
    /// The database could not be opened or created.
    #[error("couldn't open database at {path}: {source}")]
    Opening {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
