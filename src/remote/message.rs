//! Wire messages and framing.
//!
//! Every message is one frame: a big-endian u32 byte length followed by the
//! bincode encoding of a [`Request`] or [`Response`]. The protocol is
//! strictly request/response over one connection, except for the greeting
//! (a `Response::Stats` the server sends as soon as the connection opens).

use std::io::{Read, Write};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::backend::BackendStats;
use crate::types::{DocCount, DocId, Document, TermCount, TermPos, ValueSlot};
use crate::Error;

/// Refuse frames above this size rather than trusting a corrupt length.
const MAX_FRAME: u32 = 64 << 20;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Request {
    Stats,
    KeepAlive,
    Reopen,
    Postings { term: Vec<u8> },
    PostingsNext { cursor: u64 },
    Termlist { docid: DocId },
    Positions { docid: DocId, term: Vec<u8> },
    AllTerms { prefix: Vec<u8> },
    TermsNext { cursor: u64 },
    Document { docid: DocId },
    TermFreq { term: Vec<u8> },
    CollectionFreq { term: Vec<u8> },
    TermExists { term: Vec<u8> },
    ValueFreq { slot: ValueSlot },
    ValueBounds { slot: ValueSlot },
    ValueStream { slot: ValueSlot },
    ValuesNext { cursor: u64 },
    DocLength { docid: DocId },
    UniqueTerms { docid: DocId },
    WdfUpperBound { term: Vec<u8> },
    Metadata { key: Vec<u8> },
    MetadataKeys { prefix: Vec<u8> },
    Spellings,
    SpellingSuggestion { word: Vec<u8>, max_edit_distance: u32 },
    Synonyms { term: Vec<u8> },
    SynonymKeys { prefix: Vec<u8> },
    AddDocument { doc: Document },
    DeleteDocument { docid: DocId },
    ReplaceDocument { docid: DocId, doc: Document },
    ReplaceDocumentByTerm { term: Vec<u8>, doc: Document },
    Commit,
    Cancel,
    AddSpelling { word: Vec<u8>, freq: DocCount },
    RemoveSpelling { word: Vec<u8>, freq: DocCount },
    AddSynonym { term: Vec<u8>, synonym: Vec<u8> },
    RemoveSynonym { term: Vec<u8>, synonym: Vec<u8> },
    ClearSynonyms { term: Vec<u8> },
    SetMetadata { key: Vec<u8>, value: Vec<u8> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct WirePosting {
    pub docid: DocId,
    pub wdf: TermCount,
    pub doc_length: TermCount,
    pub unique_terms: TermCount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct WireTerm {
    pub term: Vec<u8>,
    pub wdf: Option<TermCount>,
    pub termfreq: Option<DocCount>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Response {
    Stats(BackendStats),
    Ok,
    Docid(DocId),
    Count(u32),
    Count64(u64),
    Bool(bool),
    OptBytes(Option<Vec<u8>>),
    BytesPair(Vec<u8>, Vec<u8>),
    Doc(Document),
    Postings { termfreq: DocCount, cursor: u64, entries: Vec<WirePosting>, more: bool },
    PostingsChunk { entries: Vec<WirePosting>, more: bool },
    Terms(Vec<WireTerm>),
    TermsChunk { cursor: u64, entries: Vec<WireTerm>, more: bool },
    Positions(Vec<TermPos>),
    Values { cursor: u64, entries: Vec<(DocId, Vec<u8>)>, more: bool },
    ValuesChunk { entries: Vec<(DocId, Vec<u8>)>, more: bool },
    Err(WireError),
}

/// An error kind carried across the wire, mapped back onto [`Error`] on the
/// client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) enum WireError {
    Closed,
    Lock(String),
    Corrupt(String),
    Network(String),
    InvalidOperation,
    InvalidArgument,
    Unavailable,
    Opening(String),
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> WireError {
        match err {
            Error::Closed => WireError::Closed,
            Error::Lock(p) => WireError::Lock(p.clone()),
            Error::Corrupt(m) => WireError::Corrupt(m.clone()),
            Error::Network(m) => WireError::Network(m.clone()),
            Error::InvalidOperation(_) => WireError::InvalidOperation,
            Error::InvalidArgument(_) => WireError::InvalidArgument,
            Error::Unavailable(_) => WireError::Unavailable,
            Error::Opening { path, source } => WireError::Opening(format!("{path}: {source}")),
        }
    }
}

impl WireError {
    pub(crate) fn into_error(self) -> Error {
        match self {
            WireError::Closed => Error::Closed,
            WireError::Lock(p) => Error::Lock(p),
            WireError::Corrupt(m) => Error::Corrupt(m),
            WireError::Network(m) => Error::Network(m),
            WireError::InvalidOperation => {
                Error::InvalidOperation("rejected by the remote server")
            }
            WireError::InvalidArgument => Error::InvalidArgument("rejected by the remote server"),
            WireError::Unavailable => Error::Unavailable("not provided by the remote server"),
            WireError::Opening(m) => {
                Error::Network(format!("remote server couldn't open database: {m}"))
            }
        }
    }
}

pub(crate) fn write_frame<T: Serialize>(stream: &mut impl Write, msg: &T) -> std::io::Result<()> {
    let body = bincode::serialize(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&(body.len() as u32).to_be_bytes())?;
    stream.write_all(&body)?;
    stream.flush()
}

pub(crate) fn read_frame<T: DeserializeOwned>(stream: &mut impl Read) -> std::io::Result<T> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len);
    if len > MAX_FRAME {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "oversized frame"));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body)?;
    bincode::deserialize(&body).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
