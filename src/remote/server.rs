//! The TCP server side: a generic listener that hands each accepted
//! connection to a [`ConnectionHandler`], and the handler that serves a
//! local database over the wire protocol.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{OpenFlags, OpenMode};
use crate::cursor::{PostingCursor, PositionCursor, TermCursor, ValueCursor};
use crate::db::Database;
use crate::remote::message::{
    read_frame, write_frame, Request, Response, WireError, WirePosting, WireTerm,
};
use crate::writable::WritableDatabase;
use crate::{Error, Result};

/// Entries sent per cursor chunk.
const CHUNK: usize = 20;

/// Services one accepted connection. Implementations are shared between
/// workers, so they carry configuration, not per-connection state.
pub trait ConnectionHandler: Send + Sync {
    fn handle_one_connection(&self, stream: TcpStream);
}

/// How accepted connections are handed off to their worker.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, stream: TcpStream, handler: Arc<dyn ConnectionHandler>);
}

/// Dispatch by spawning a worker thread per connection.
pub struct ThreadDispatch;

impl Dispatch for ThreadDispatch {
    fn dispatch(&self, stream: TcpStream, handler: Arc<dyn ConnectionHandler>) {
        std::thread::spawn(move || handler.handle_one_connection(stream));
    }
}

/// A generic TCP server: listens, accepts, and dispatches. All protocol
/// knowledge lives in the supplied [`ConnectionHandler`].
pub struct TcpServer {
    listener: TcpListener,
    nodelay: bool,
    verbose: bool,
    handler: Arc<dyn ConnectionHandler>,
    dispatch: Box<dyn Dispatch>,
}

/// Accept failures worth retrying: an interrupted syscall, a spurious
/// wakeup, or a connection that died between accept queue and accept call.
fn transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}

impl TcpServer {
    /// Bind to `(host, port)` (empty host: all interfaces) and start
    /// listening. `nodelay` sets TCP_NODELAY on accepted connections;
    /// `verbose` controls connect/disconnect logging only.
    pub fn bind(
        host: &str,
        port: u16,
        nodelay: bool,
        verbose: bool,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<TcpServer> {
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        let listener = TcpListener::bind((host, port))
            .map_err(|e| Error::Network(format!("bind {host}:{port}: {e}")))?;
        Ok(TcpServer { listener, nodelay, verbose, handler, dispatch: Box::new(ThreadDispatch) })
    }

    /// Replace the dispatch strategy.
    pub fn set_dispatch(&mut self, dispatch: Box<dyn Dispatch>) {
        self.dispatch = dispatch;
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| Error::Network(format!("local_addr: {e}")))
    }

    /// Accept one connection, retrying transient failures.
    fn accept_connection(&self) -> std::io::Result<TcpStream> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.nodelay {
                        let _ = stream.set_nodelay(true);
                    }
                    if self.verbose {
                        info!(%peer, "connection accepted");
                    } else {
                        debug!(%peer, "connection accepted");
                    }
                    return Ok(stream);
                }
                Err(e) if transient(&e) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Accept and dispatch connections until a permanent accept failure.
    /// Worker failures never reach the listener; only the returned error
    /// ends the loop.
    pub fn run(&self) -> Error {
        loop {
            match self.accept_connection() {
                Ok(stream) => self.dispatch.dispatch(stream, self.handler.clone()),
                Err(e) => return Error::Network(format!("accept: {e}")),
            }
        }
    }

    /// Accept exactly one connection, service it to completion on this
    /// thread, then return.
    pub fn run_once(&self) -> Result<()> {
        let stream =
            self.accept_connection().map_err(|e| Error::Network(format!("accept: {e}")))?;
        self.handler.handle_one_connection(stream);
        if self.verbose {
            info!("connection finished");
        }
        Ok(())
    }
}

/// The handler serving a database directory over the wire protocol. Every
/// connection gets its own handle onto the underlying database, so workers
/// share nothing.
pub struct SearchServer {
    path: PathBuf,
    writable: bool,
}

impl SearchServer {
    pub fn new(path: impl AsRef<Path>, writable: bool) -> SearchServer {
        SearchServer { path: path.as_ref().to_path_buf(), writable }
    }
}

impl ConnectionHandler for SearchServer {
    fn handle_one_connection(&self, stream: TcpStream) {
        match serve_connection(stream, &self.path, self.writable) {
            Ok(()) => debug!("connection closed by peer"),
            Err(e) => debug!(error = %e, "connection ended"),
        }
    }
}

enum Session {
    Reader(Database),
    Writer(WritableDatabase),
}

/// Run `$body` with `$db` bound to whichever handle kind the session holds.
/// Reads share their method names across the two handle types.
macro_rules! with_db {
    ($session:expr, $db:ident => $body:expr) => {
        match $session {
            Session::Reader($db) => $body,
            Session::Writer($db) => $body,
        }
    };
}

enum ServerCursor {
    Postings(Box<dyn PostingCursor>),
    Terms(Box<dyn TermCursor>),
    Values(Box<dyn ValueCursor>),
}

struct Cursors {
    next_id: u64,
    open: HashMap<u64, ServerCursor>,
}

/// Serve the wire protocol on one connected socket until the peer goes
/// away. Errors writing to the socket end the session; errors evaluating a
/// request are reported to the peer as `Response::Err`.
///
/// Changes the client never committed die with the connection: a writable
/// session discards its uncommitted state on the way out, whatever ended
/// the conversation.
pub fn serve_connection(stream: TcpStream, path: &Path, writable: bool) -> Result<()> {
    let session = if writable {
        Session::Writer(WritableDatabase::open(path, OpenMode::CreateOrOpen, OpenFlags::default())?)
    } else {
        Session::Reader(Database::open(path)?)
    };
    let result = serve_session(stream, &session);
    if let Session::Writer(db) = &session {
        let _ = db.discard_uncommitted();
        let _ = db.close();
    }
    result
}

fn serve_session(mut stream: TcpStream, session: &Session) -> Result<()> {
    // Open the conversation with the database statistics.
    let greeting = match with_db!(&session, db => db.stats_snapshot()) {
        Ok(stats) => Response::Stats(stats),
        Err(e) => Response::Err(WireError::from(&e)),
    };
    let io_err = |e: std::io::Error| Error::Network(format!("connection: {e}"));
    write_frame(&mut stream, &greeting).map_err(io_err)?;

    let mut cursors = Cursors { next_id: 1, open: HashMap::new() };
    loop {
        let request: Request = match read_frame(&mut stream) {
            Ok(request) => request,
            // EOF or a broken stream: the client is gone.
            Err(_) => return Ok(()),
        };
        let response = match eval(session, &mut cursors, request) {
            Ok(response) => response,
            Err(e) => Response::Err(WireError::from(&e)),
        };
        write_frame(&mut stream, &response).map_err(io_err)?;
    }
}

fn drain_postings(cursor: &mut dyn PostingCursor) -> Result<(Vec<WirePosting>, bool)> {
    let mut entries = Vec::new();
    while entries.len() < CHUNK && !cursor.at_end() {
        entries.push(WirePosting {
            docid: cursor.docid()?,
            wdf: cursor.wdf()?,
            doc_length: cursor.doc_length()?,
            unique_terms: cursor.unique_terms()?,
        });
        cursor.advance()?;
    }
    Ok((entries, !cursor.at_end()))
}

fn drain_terms(cursor: &mut dyn TermCursor) -> Result<(Vec<WireTerm>, bool)> {
    let mut entries = Vec::new();
    while entries.len() < CHUNK && !cursor.at_end() {
        entries.push(WireTerm {
            term: cursor.term()?.to_vec(),
            wdf: cursor.wdf().ok(),
            termfreq: cursor.termfreq().ok(),
        });
        cursor.advance()?;
    }
    Ok((entries, !cursor.at_end()))
}

fn drain_all_terms(cursor: &mut dyn TermCursor) -> Result<Vec<WireTerm>> {
    let mut entries = Vec::new();
    while !cursor.at_end() {
        entries.push(WireTerm {
            term: cursor.term()?.to_vec(),
            wdf: cursor.wdf().ok(),
            termfreq: cursor.termfreq().ok(),
        });
        cursor.advance()?;
    }
    Ok(entries)
}

fn drain_values(cursor: &mut dyn ValueCursor) -> Result<(Vec<(u32, Vec<u8>)>, bool)> {
    let mut entries = Vec::new();
    while entries.len() < CHUNK && !cursor.at_end() {
        entries.push((cursor.docid()?, cursor.value()?.to_vec()));
        cursor.advance()?;
    }
    Ok((entries, !cursor.at_end()))
}

fn writer(session: &Session) -> Result<&WritableDatabase> {
    match session {
        Session::Writer(db) => Ok(db),
        Session::Reader(_) => Err(Error::Unavailable("server database is read-only")),
    }
}

fn eval(session: &Session, cursors: &mut Cursors, request: Request) -> Result<Response> {
    Ok(match request {
        Request::Stats => Response::Stats(with_db!(session, db => db.stats_snapshot())?),
        Request::KeepAlive => {
            with_db!(session, db => db.keep_alive())?;
            Response::Ok
        }
        Request::Reopen => {
            with_db!(session, db => db.reopen())?;
            Response::Stats(with_db!(session, db => db.stats_snapshot())?)
        }
        Request::Postings { term } => {
            let mut cursor = with_db!(session, db => db.postlist_begin(&term))?;
            let termfreq = cursor.termfreq();
            let (entries, more) = drain_postings(cursor.as_mut())?;
            let id = cursors.next_id;
            cursors.next_id += 1;
            if more {
                cursors.open.insert(id, ServerCursor::Postings(cursor));
            }
            Response::Postings { termfreq, cursor: id, entries, more }
        }
        Request::PostingsNext { cursor } => {
            let Some(ServerCursor::Postings(open)) = cursors.open.get_mut(&cursor) else {
                return Err(Error::InvalidArgument("unknown cursor"));
            };
            let (entries, more) = drain_postings(open.as_mut())?;
            if !more {
                cursors.open.remove(&cursor);
            }
            Response::PostingsChunk { entries, more }
        }
        Request::Termlist { docid } => {
            let mut cursor = with_db!(session, db => db.termlist_begin(docid))?;
            Response::Terms(drain_all_terms(cursor.as_mut())?)
        }
        Request::Positions { docid, term } => {
            let mut cursor = with_db!(session, db => db.positionlist_begin(docid, &term))?;
            let mut positions = Vec::new();
            while !cursor.at_end() {
                positions.push(cursor.position()?);
                cursor.advance()?;
            }
            Response::Positions(positions)
        }
        Request::AllTerms { prefix } => {
            let mut cursor = with_db!(session, db => db.allterms_begin(&prefix))?;
            let (entries, more) = drain_terms(cursor.as_mut())?;
            let id = cursors.next_id;
            cursors.next_id += 1;
            if more {
                cursors.open.insert(id, ServerCursor::Terms(cursor));
            }
            Response::TermsChunk { cursor: id, entries, more }
        }
        Request::TermsNext { cursor } => {
            let Some(ServerCursor::Terms(open)) = cursors.open.get_mut(&cursor) else {
                return Err(Error::InvalidArgument("unknown cursor"));
            };
            let (entries, more) = drain_terms(open.as_mut())?;
            if !more {
                cursors.open.remove(&cursor);
            }
            Response::TermsChunk { cursor, entries, more }
        }
        Request::Document { docid } => {
            Response::Doc(with_db!(session, db => db.get_document(docid))?)
        }
        Request::TermFreq { term } => {
            Response::Count(with_db!(session, db => db.get_termfreq(&term))?)
        }
        Request::CollectionFreq { term } => {
            Response::Count64(with_db!(session, db => db.get_collection_freq(&term))?)
        }
        Request::TermExists { term } => {
            Response::Bool(with_db!(session, db => db.term_exists(&term))?)
        }
        Request::ValueFreq { slot } => {
            Response::Count(with_db!(session, db => db.get_value_freq(slot))?)
        }
        Request::ValueBounds { slot } => Response::BytesPair(
            with_db!(session, db => db.get_value_lower_bound(slot))?,
            with_db!(session, db => db.get_value_upper_bound(slot))?,
        ),
        Request::ValueStream { slot } => {
            let mut cursor = with_db!(session, db => db.valuestream_begin(slot))?;
            let (entries, more) = drain_values(cursor.as_mut())?;
            let id = cursors.next_id;
            cursors.next_id += 1;
            if more {
                cursors.open.insert(id, ServerCursor::Values(cursor));
            }
            Response::Values { cursor: id, entries, more }
        }
        Request::ValuesNext { cursor } => {
            let Some(ServerCursor::Values(open)) = cursors.open.get_mut(&cursor) else {
                return Err(Error::InvalidArgument("unknown cursor"));
            };
            let (entries, more) = drain_values(open.as_mut())?;
            if !more {
                cursors.open.remove(&cursor);
            }
            Response::ValuesChunk { entries, more }
        }
        Request::DocLength { docid } => {
            Response::Count(with_db!(session, db => db.get_doclength(docid))?)
        }
        Request::UniqueTerms { docid } => {
            Response::Count(with_db!(session, db => db.get_unique_terms(docid))?)
        }
        Request::WdfUpperBound { term } => {
            Response::Count(with_db!(session, db => db.get_wdf_upper_bound(&term))?)
        }
        Request::Metadata { key } => {
            let value = with_db!(session, db => db.get_metadata(&key))?;
            Response::OptBytes((!value.is_empty()).then_some(value))
        }
        Request::MetadataKeys { prefix } => {
            let mut cursor = with_db!(session, db => db.metadata_keys_begin(&prefix))?;
            Response::Terms(drain_all_terms(cursor.as_mut())?)
        }
        Request::Spellings => {
            let mut cursor = writer(session)?.spellings_begin()?;
            Response::Terms(drain_all_terms(cursor.as_mut())?)
        }
        Request::SpellingSuggestion { word, max_edit_distance } => Response::OptBytes(
            writer(session)?.get_spelling_suggestion(&word, max_edit_distance)?,
        ),
        Request::Synonyms { term } => {
            let mut cursor = writer(session)?.synonyms_begin(&term)?;
            Response::Terms(drain_all_terms(cursor.as_mut())?)
        }
        Request::SynonymKeys { prefix } => {
            let mut cursor = writer(session)?.synonym_keys_begin(&prefix)?;
            Response::Terms(drain_all_terms(cursor.as_mut())?)
        }
        Request::AddDocument { doc } => Response::Docid(writer(session)?.add_document(&doc)?),
        Request::DeleteDocument { docid } => {
            writer(session)?.delete_document(docid)?;
            Response::Ok
        }
        Request::ReplaceDocument { docid, doc } => {
            writer(session)?.replace_document(docid, &doc)?;
            Response::Ok
        }
        Request::ReplaceDocumentByTerm { term, doc } => {
            Response::Docid(writer(session)?.replace_document_by_term(&term, &doc)?)
        }
        Request::Commit => {
            writer(session)?.commit()?;
            Response::Ok
        }
        Request::Cancel => {
            writer(session)?.discard_uncommitted()?;
            Response::Ok
        }
        Request::AddSpelling { word, freq } => {
            writer(session)?.add_spelling(&word, freq)?;
            Response::Ok
        }
        Request::RemoveSpelling { word, freq } => {
            writer(session)?.remove_spelling(&word, freq)?;
            Response::Ok
        }
        Request::AddSynonym { term, synonym } => {
            writer(session)?.add_synonym(&term, &synonym)?;
            Response::Ok
        }
        Request::RemoveSynonym { term, synonym } => {
            writer(session)?.remove_synonym(&term, &synonym)?;
            Response::Ok
        }
        Request::ClearSynonyms { term } => {
            writer(session)?.clear_synonyms(&term)?;
            Response::Ok
        }
        Request::SetMetadata { key, value } => {
            writer(session)?.set_metadata(&key, &value)?;
            Response::Ok
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_error_classification() {
        use std::io::{Error as IoError, ErrorKind};
        assert!(transient(&IoError::from(ErrorKind::Interrupted)));
        assert!(transient(&IoError::from(ErrorKind::WouldBlock)));
        assert!(transient(&IoError::from(ErrorKind::ConnectionAborted)));
        assert!(!transient(&IoError::from(ErrorKind::AddrInUse)));
        assert!(!transient(&IoError::from(ErrorKind::PermissionDenied)));
    }
}
