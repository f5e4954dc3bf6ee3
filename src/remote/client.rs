//! The remote backend client: the full backend contract spoken over a
//! stream socket.
//!
//! Any transport failure (EOF, a socket error, a timeout expiry) latches
//! the connection **Broken**: the stream is dropped on the spot and every
//! later operation that would need the peer fails with [`Error::Network`].
//! Cursor entries already fetched stay readable; the next chunk fetch does
//! not. Reconnection is never attempted here; callers open a fresh handle.

use std::collections::VecDeque;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{Backend, BackendStats, WritableBackend};
use crate::cursor::{
    not_positioned, MaterializedPositions, MaterializedTerms, PostingCursor, PositionCursor,
    TermCursor, TermData, ValueCursor,
};
use crate::remote::message::{
    read_frame, write_frame, Request, Response, WirePosting, WireTerm,
};
use crate::types::{DocCount, DocId, Document, TermCount, ValueSlot};
use crate::{Error, Result};

/// Where and how to reach a remote database server.
#[derive(Clone, Debug)]
pub struct RemoteOptions {
    pub host: String,
    pub port: u16,
    /// Per-operation deadline, applied as the socket read/write timeout.
    /// Expiry surfaces as [`Error::Network`].
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl RemoteOptions {
    pub fn new(host: impl Into<String>, port: u16) -> RemoteOptions {
        RemoteOptions { host: host.into(), port, timeout: None, connect_timeout: None }
    }
}

enum Conn {
    Live(TcpStream),
    Broken,
    Closed,
}

pub(crate) struct RemoteInner {
    conn: Mutex<Conn>,
    peer: String,
    uncommitted: AtomicBool,
}

impl RemoteInner {
    /// One request/response round trip. An I/O failure in either direction
    /// latches the connection Broken before reporting `Network`.
    fn call(&self, req: &Request) -> Result<Response> {
        let mut conn = self.conn.lock();
        let stream = match &mut *conn {
            Conn::Live(stream) => stream,
            Conn::Broken => return Err(Error::Network(format!("lost connection to {}", self.peer))),
            Conn::Closed => return Err(Error::Closed),
        };
        match write_frame(stream, req).and_then(|_| read_frame::<Response>(stream)) {
            Ok(Response::Err(wire)) => Err(wire.into_error()),
            Ok(resp) => Ok(resp),
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "remote connection broken");
                *conn = Conn::Broken;
                Err(Error::Network(format!("{}: {e}", self.peer)))
            }
        }
    }

    fn unexpected<T>(&self) -> Result<T> {
        let mut conn = self.conn.lock();
        if matches!(*conn, Conn::Live(_)) {
            *conn = Conn::Broken;
        }
        Err(Error::Network(format!("{}: unexpected response", self.peer)))
    }
}

/// A backend living on the far side of a TCP connection.
pub(crate) struct RemoteBackend {
    inner: Arc<RemoteInner>,
}

impl RemoteBackend {
    pub(crate) fn connect(opts: &RemoteOptions) -> Result<RemoteBackend> {
        let peer = format!("{}:{}", opts.host, opts.port);
        let net_err = |e: std::io::Error| Error::Network(format!("{peer}: {e}"));
        let addrs: Vec<_> =
            (opts.host.as_str(), opts.port).to_socket_addrs().map_err(net_err)?.collect();
        let addr = addrs.first().ok_or_else(|| Error::Network(format!("{peer}: no address")))?;
        let stream = match opts.connect_timeout {
            Some(t) => TcpStream::connect_timeout(addr, t),
            None => TcpStream::connect(addr),
        }
        .map_err(net_err)?;
        stream.set_nodelay(true).map_err(net_err)?;
        stream.set_read_timeout(opts.timeout).map_err(net_err)?;
        stream.set_write_timeout(opts.timeout).map_err(net_err)?;

        // The server opens the conversation with its statistics.
        let mut stream = stream;
        let greeting: Response = read_frame(&mut stream).map_err(net_err)?;
        match greeting {
            Response::Stats(_) => {}
            Response::Err(wire) => return Err(wire.into_error()),
            _ => return Err(Error::Network(format!("{peer}: bad greeting"))),
        }
        debug!(peer = %peer, "connected to remote database");
        Ok(RemoteBackend {
            inner: Arc::new(RemoteInner {
                conn: Mutex::new(Conn::Live(stream)),
                peer,
                uncommitted: AtomicBool::new(false),
            }),
        })
    }

    fn eager_terms(&self, req: Request) -> Result<Box<dyn TermCursor>> {
        match self.inner.call(&req)? {
            Response::Terms(entries) => {
                let entries = entries
                    .into_iter()
                    .map(|t| TermData { term: t.term, wdf: t.wdf, termfreq: t.termfreq })
                    .collect();
                Ok(Box::new(MaterializedTerms::new(entries)))
            }
            _ => self.inner.unexpected(),
        }
    }

    fn mutated(&self) {
        self.inner.uncommitted.store(true, Ordering::Relaxed);
    }
}

impl Backend for RemoteBackend {
    fn stats(&self) -> Result<BackendStats> {
        match self.inner.call(&Request::Stats)? {
            Response::Stats(stats) => Ok(stats),
            _ => self.inner.unexpected(),
        }
    }

    fn postings(&self, term: &[u8]) -> Result<Box<dyn PostingCursor>> {
        match self.inner.call(&Request::Postings { term: term.to_vec() })? {
            Response::Postings { termfreq, cursor, entries, more } => {
                Ok(Box::new(RemotePostings {
                    inner: self.inner.clone(),
                    term: term.to_vec(),
                    termfreq,
                    cursor_id: cursor,
                    buf: entries.into(),
                    current: None,
                    more,
                    started: false,
                    done: false,
                }))
            }
            _ => self.inner.unexpected(),
        }
    }

    fn termlist(&self, docid: DocId) -> Result<Box<dyn TermCursor>> {
        self.eager_terms(Request::Termlist { docid })
    }

    fn positions(&self, docid: DocId, term: &[u8]) -> Result<Box<dyn PositionCursor>> {
        match self.inner.call(&Request::Positions { docid, term: term.to_vec() })? {
            Response::Positions(positions) => Ok(Box::new(MaterializedPositions::new(positions))),
            _ => self.inner.unexpected(),
        }
    }

    fn allterms(&self, prefix: &[u8]) -> Result<Box<dyn TermCursor>> {
        match self.inner.call(&Request::AllTerms { prefix: prefix.to_vec() })? {
            Response::TermsChunk { cursor, entries, more } => Ok(Box::new(RemoteTerms {
                inner: self.inner.clone(),
                cursor_id: cursor,
                buf: entries.into(),
                current: None,
                more,
                started: false,
                done: false,
            })),
            _ => self.inner.unexpected(),
        }
    }

    fn document(&self, docid: DocId) -> Result<Document> {
        match self.inner.call(&Request::Document { docid })? {
            Response::Doc(doc) => Ok(doc),
            _ => self.inner.unexpected(),
        }
    }

    fn termfreq(&self, term: &[u8]) -> Result<DocCount> {
        match self.inner.call(&Request::TermFreq { term: term.to_vec() })? {
            Response::Count(n) => Ok(n),
            _ => self.inner.unexpected(),
        }
    }

    fn collection_freq(&self, term: &[u8]) -> Result<u64> {
        match self.inner.call(&Request::CollectionFreq { term: term.to_vec() })? {
            Response::Count64(n) => Ok(n),
            _ => self.inner.unexpected(),
        }
    }

    fn term_exists(&self, term: &[u8]) -> Result<bool> {
        match self.inner.call(&Request::TermExists { term: term.to_vec() })? {
            Response::Bool(b) => Ok(b),
            _ => self.inner.unexpected(),
        }
    }

    fn value_freq(&self, slot: ValueSlot) -> Result<DocCount> {
        match self.inner.call(&Request::ValueFreq { slot })? {
            Response::Count(n) => Ok(n),
            _ => self.inner.unexpected(),
        }
    }

    fn value_lower_bound(&self, slot: ValueSlot) -> Result<Vec<u8>> {
        match self.inner.call(&Request::ValueBounds { slot })? {
            Response::BytesPair(lb, _) => Ok(lb),
            _ => self.inner.unexpected(),
        }
    }

    fn value_upper_bound(&self, slot: ValueSlot) -> Result<Vec<u8>> {
        match self.inner.call(&Request::ValueBounds { slot })? {
            Response::BytesPair(_, ub) => Ok(ub),
            _ => self.inner.unexpected(),
        }
    }

    fn valuestream(&self, slot: ValueSlot) -> Result<Box<dyn ValueCursor>> {
        match self.inner.call(&Request::ValueStream { slot })? {
            Response::Values { cursor, entries, more } => Ok(Box::new(RemoteValues {
                inner: self.inner.clone(),
                cursor_id: cursor,
                buf: entries.into(),
                current: None,
                more,
                started: false,
                done: false,
            })),
            _ => self.inner.unexpected(),
        }
    }

    fn doc_length(&self, docid: DocId) -> Result<TermCount> {
        match self.inner.call(&Request::DocLength { docid })? {
            Response::Count(n) => Ok(n),
            _ => self.inner.unexpected(),
        }
    }

    fn unique_terms(&self, docid: DocId) -> Result<TermCount> {
        match self.inner.call(&Request::UniqueTerms { docid })? {
            Response::Count(n) => Ok(n),
            _ => self.inner.unexpected(),
        }
    }

    fn wdf_upper_bound(&self, term: &[u8]) -> Result<TermCount> {
        match self.inner.call(&Request::WdfUpperBound { term: term.to_vec() })? {
            Response::Count(n) => Ok(n),
            _ => self.inner.unexpected(),
        }
    }

    fn metadata(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.inner.call(&Request::Metadata { key: key.to_vec() })? {
            Response::OptBytes(value) => Ok(value),
            _ => self.inner.unexpected(),
        }
    }

    fn metadata_keys(&self, prefix: &[u8]) -> Result<Box<dyn TermCursor>> {
        self.eager_terms(Request::MetadataKeys { prefix: prefix.to_vec() })
    }

    fn spellings(&self) -> Result<Box<dyn TermCursor>> {
        self.eager_terms(Request::Spellings)
    }

    fn spelling_suggestion(&self, word: &[u8], max_edit_distance: u32) -> Result<Option<Vec<u8>>> {
        let req = Request::SpellingSuggestion { word: word.to_vec(), max_edit_distance };
        match self.inner.call(&req)? {
            Response::OptBytes(suggestion) => Ok(suggestion),
            _ => self.inner.unexpected(),
        }
    }

    fn synonyms(&self, term: &[u8]) -> Result<Box<dyn TermCursor>> {
        self.eager_terms(Request::Synonyms { term: term.to_vec() })
    }

    fn synonym_keys(&self, prefix: &[u8]) -> Result<Box<dyn TermCursor>> {
        self.eager_terms(Request::SynonymKeys { prefix: prefix.to_vec() })
    }

    fn reopen(&self) -> Result<()> {
        match self.inner.call(&Request::Reopen)? {
            Response::Stats(_) => Ok(()),
            _ => self.inner.unexpected(),
        }
    }

    fn close(&self) {
        let mut conn = self.inner.conn.lock();
        if !matches!(*conn, Conn::Closed) {
            debug!(peer = %self.inner.peer, "closed remote connection");
            // Dropping the stream shuts the socket down; the server side
            // sees EOF and ends its session.
            *conn = Conn::Closed;
        }
    }

    fn is_closed(&self) -> bool {
        matches!(*self.inner.conn.lock(), Conn::Closed)
    }

    /// A remote keep-alive really pings the peer, so it needs a live
    /// connection: `Closed` after close, `Network` after peer loss.
    fn keep_alive(&self) -> Result<()> {
        match self.inner.call(&Request::KeepAlive)? {
            Response::Ok => Ok(()),
            _ => self.inner.unexpected(),
        }
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        format!("remote:{}", self.inner.peer)
    }
}

impl WritableBackend for RemoteBackend {
    fn add_document(&self, doc: &Document) -> Result<DocId> {
        match self.inner.call(&Request::AddDocument { doc: doc.clone() })? {
            Response::Docid(docid) => {
                self.mutated();
                Ok(docid)
            }
            _ => self.inner.unexpected(),
        }
    }

    fn delete_document(&self, docid: DocId) -> Result<()> {
        match self.inner.call(&Request::DeleteDocument { docid })? {
            Response::Ok => {
                self.mutated();
                Ok(())
            }
            _ => self.inner.unexpected(),
        }
    }

    fn replace_document(&self, docid: DocId, doc: &Document) -> Result<()> {
        match self.inner.call(&Request::ReplaceDocument { docid, doc: doc.clone() })? {
            Response::Ok => {
                self.mutated();
                Ok(())
            }
            _ => self.inner.unexpected(),
        }
    }

    fn replace_document_by_term(&self, term: &[u8], doc: &Document) -> Result<DocId> {
        let req = Request::ReplaceDocumentByTerm { term: term.to_vec(), doc: doc.clone() };
        match self.inner.call(&req)? {
            Response::Docid(docid) => {
                self.mutated();
                Ok(docid)
            }
            _ => self.inner.unexpected(),
        }
    }

    /// Only contacts the server when there are changes to flush, so a clean
    /// commit still succeeds after the peer has died.
    fn commit(&self) -> Result<()> {
        if !self.inner.uncommitted.load(Ordering::Relaxed) {
            return Ok(());
        }
        match self.inner.call(&Request::Commit)? {
            Response::Ok => {
                self.inner.uncommitted.store(false, Ordering::Relaxed);
                Ok(())
            }
            _ => self.inner.unexpected(),
        }
    }

    fn discard(&self) -> Result<()> {
        if !self.inner.uncommitted.load(Ordering::Relaxed) {
            return Ok(());
        }
        match self.inner.call(&Request::Cancel)? {
            Response::Ok => {
                self.inner.uncommitted.store(false, Ordering::Relaxed);
                Ok(())
            }
            _ => self.inner.unexpected(),
        }
    }

    fn has_uncommitted(&self) -> bool {
        self.inner.uncommitted.load(Ordering::Relaxed)
    }

    fn add_spelling(&self, word: &[u8], freq_inc: DocCount) -> Result<()> {
        match self.inner.call(&Request::AddSpelling { word: word.to_vec(), freq: freq_inc })? {
            Response::Ok => {
                self.mutated();
                Ok(())
            }
            _ => self.inner.unexpected(),
        }
    }

    fn remove_spelling(&self, word: &[u8], freq_dec: DocCount) -> Result<()> {
        match self.inner.call(&Request::RemoveSpelling { word: word.to_vec(), freq: freq_dec })? {
            Response::Ok => {
                self.mutated();
                Ok(())
            }
            _ => self.inner.unexpected(),
        }
    }

    fn add_synonym(&self, term: &[u8], synonym: &[u8]) -> Result<()> {
        let req = Request::AddSynonym { term: term.to_vec(), synonym: synonym.to_vec() };
        match self.inner.call(&req)? {
            Response::Ok => {
                self.mutated();
                Ok(())
            }
            _ => self.inner.unexpected(),
        }
    }

    fn remove_synonym(&self, term: &[u8], synonym: &[u8]) -> Result<()> {
        let req = Request::RemoveSynonym { term: term.to_vec(), synonym: synonym.to_vec() };
        match self.inner.call(&req)? {
            Response::Ok => {
                self.mutated();
                Ok(())
            }
            _ => self.inner.unexpected(),
        }
    }

    fn clear_synonyms(&self, term: &[u8]) -> Result<()> {
        match self.inner.call(&Request::ClearSynonyms { term: term.to_vec() })? {
            Response::Ok => {
                self.mutated();
                Ok(())
            }
            _ => self.inner.unexpected(),
        }
    }

    fn set_metadata(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let req = Request::SetMetadata { key: key.to_vec(), value: value.to_vec() };
        match self.inner.call(&req)? {
            Response::Ok => {
                self.mutated();
                Ok(())
            }
            _ => self.inner.unexpected(),
        }
    }
}

/// A posting cursor fetching fixed-size chunks on demand. Entries already
/// buffered remain usable after the peer dies; the next chunk fetch raises
/// `Network`.
struct RemotePostings {
    inner: Arc<RemoteInner>,
    term: Vec<u8>,
    termfreq: DocCount,
    cursor_id: u64,
    buf: VecDeque<WirePosting>,
    current: Option<WirePosting>,
    more: bool,
    started: bool,
    done: bool,
}

impl RemotePostings {
    fn current(&self) -> Result<&WirePosting> {
        match &self.current {
            Some(entry) if self.started && !self.done => Ok(entry),
            _ => not_positioned(),
        }
    }
}

impl PostingCursor for RemotePostings {
    fn advance(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.started = true;
        loop {
            if let Some(entry) = self.buf.pop_front() {
                self.current = Some(entry);
                return Ok(());
            }
            if !self.more {
                self.current = None;
                self.done = true;
                return Ok(());
            }
            match self.inner.call(&Request::PostingsNext { cursor: self.cursor_id })? {
                Response::PostingsChunk { entries, more } => {
                    self.buf = entries.into();
                    self.more = more;
                }
                _ => return self.inner.unexpected(),
            }
        }
    }

    fn skip_to(&mut self, target: DocId, _w_min: f64) -> Result<()> {
        if self.started {
            if let Ok(entry) = self.current() {
                if entry.docid >= target {
                    return Ok(());
                }
            }
        }
        while !self.done {
            self.advance()?;
            if let Some(entry) = &self.current {
                if entry.docid >= target {
                    break;
                }
            }
        }
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.done
    }

    fn docid(&self) -> Result<DocId> {
        Ok(self.current()?.docid)
    }

    fn wdf(&self) -> Result<TermCount> {
        Ok(self.current()?.wdf)
    }

    fn doc_length(&self) -> Result<TermCount> {
        Ok(self.current()?.doc_length)
    }

    fn unique_terms(&self) -> Result<TermCount> {
        Ok(self.current()?.unique_terms)
    }

    fn positions(&self) -> Result<Box<dyn PositionCursor>> {
        let docid = self.current()?.docid;
        match self.inner.call(&Request::Positions { docid, term: self.term.clone() })? {
            Response::Positions(positions) => Ok(Box::new(MaterializedPositions::new(positions))),
            _ => self.inner.unexpected(),
        }
    }

    fn termfreq(&self) -> DocCount {
        self.termfreq
    }
}

/// A chunk-fetching term cursor (the database-wide enumeration).
struct RemoteTerms {
    inner: Arc<RemoteInner>,
    cursor_id: u64,
    buf: VecDeque<WireTerm>,
    current: Option<WireTerm>,
    more: bool,
    started: bool,
    done: bool,
}

impl RemoteTerms {
    fn current(&self) -> Result<&WireTerm> {
        match &self.current {
            Some(entry) if self.started && !self.done => Ok(entry),
            _ => not_positioned(),
        }
    }
}

impl TermCursor for RemoteTerms {
    fn advance(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.started = true;
        loop {
            if let Some(entry) = self.buf.pop_front() {
                self.current = Some(entry);
                return Ok(());
            }
            if !self.more {
                self.current = None;
                self.done = true;
                return Ok(());
            }
            match self.inner.call(&Request::TermsNext { cursor: self.cursor_id })? {
                Response::TermsChunk { entries, more, .. } => {
                    self.buf = entries.into();
                    self.more = more;
                }
                _ => return self.inner.unexpected(),
            }
        }
    }

    fn skip_to(&mut self, target: &[u8]) -> Result<()> {
        if self.started {
            if let Ok(entry) = self.current() {
                if entry.term.as_slice() >= target {
                    return Ok(());
                }
            }
        }
        while !self.done {
            self.advance()?;
            if let Some(entry) = &self.current {
                if entry.term.as_slice() >= target {
                    break;
                }
            }
        }
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.done
    }

    fn term(&self) -> Result<&[u8]> {
        Ok(&self.current()?.term)
    }

    fn wdf(&self) -> Result<TermCount> {
        self.current()?.wdf.ok_or(Error::InvalidOperation("term sequence has no wdf data"))
    }

    fn termfreq(&self) -> Result<DocCount> {
        self.current()?
            .termfreq
            .ok_or(Error::InvalidOperation("term sequence has no frequency data"))
    }
}

/// A chunk-fetching value-slot cursor.
struct RemoteValues {
    inner: Arc<RemoteInner>,
    cursor_id: u64,
    buf: VecDeque<(DocId, Vec<u8>)>,
    current: Option<(DocId, Vec<u8>)>,
    more: bool,
    started: bool,
    done: bool,
}

impl RemoteValues {
    fn current(&self) -> Result<&(DocId, Vec<u8>)> {
        match &self.current {
            Some(entry) if self.started && !self.done => Ok(entry),
            _ => not_positioned(),
        }
    }
}

impl ValueCursor for RemoteValues {
    fn advance(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.started = true;
        loop {
            if let Some(entry) = self.buf.pop_front() {
                self.current = Some(entry);
                return Ok(());
            }
            if !self.more {
                self.current = None;
                self.done = true;
                return Ok(());
            }
            match self.inner.call(&Request::ValuesNext { cursor: self.cursor_id })? {
                Response::ValuesChunk { entries, more } => {
                    self.buf = entries.into();
                    self.more = more;
                }
                _ => return self.inner.unexpected(),
            }
        }
    }

    fn skip_to(&mut self, target: DocId) -> Result<()> {
        if self.started {
            if let Ok(entry) = self.current() {
                if entry.0 >= target {
                    return Ok(());
                }
            }
        }
        while !self.done {
            self.advance()?;
            if let Some(entry) = &self.current {
                if entry.0 >= target {
                    break;
                }
            }
        }
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.done
    }

    fn docid(&self) -> Result<DocId> {
        Ok(self.current()?.0)
    }

    fn value(&self) -> Result<&[u8]> {
        Ok(&self.current()?.1)
    }
}
