//! Database cursors, for reading both local and remote databases.
//!
//! The cursor API is the single read interface every backend implements, so
//! user code iterates postings from an on-disk database and from a remote
//! peer through the same traits. A cursor is always in one of three states:
//! **unstarted** (just constructed, exposing no element), **positioned**
//! (holding an element), or **at end**. `advance` moves unstarted →
//! first-element (or straight to the end for an empty sequence) and
//! positioned → next-element; once a cursor is at the end it stays there and
//! further `advance` calls are no-ops. `at_end` never performs I/O.
//!
//! Accessors are only valid on a positioned cursor and fail with
//! [`Error::InvalidOperation`] otherwise. A positioned accessor answers from
//! data the cursor has already decoded, so it keeps working after the
//! producing handle is closed; stepping the cursor may instead need the
//! backend again, in which case it fails with [`Error::Closed`] (or
//! [`Error::Network`] for a remote backend whose peer has died).

use crate::types::{DocCount, DocId, TermCount, TermPos};
use crate::{Error, Result};

/// A cursor over the posting list of one term: the documents containing the
/// term, in strictly ascending docid order.
pub trait PostingCursor {
    /// Move to the next document, or to the end of the list.
    fn advance(&mut self) -> Result<()>;

    /// Move forward to the first entry with `docid >= target`. A target at
    /// or before the current position is a no-op. `w_min` is an advisory
    /// lower bound on the weight contribution the caller still cares about;
    /// backends may use it to elide work but never to skip a matching docid.
    fn skip_to(&mut self, target: DocId, w_min: f64) -> Result<()>;

    /// True once the cursor has moved past the last entry. Never does I/O.
    fn at_end(&self) -> bool;

    /// The docid at the current position.
    fn docid(&self) -> Result<DocId>;

    /// The within-document frequency of the term in the current document.
    fn wdf(&self) -> Result<TermCount>;

    /// The length (total wdf) of the current document.
    fn doc_length(&self) -> Result<TermCount>;

    /// The number of distinct terms in the current document.
    fn unique_terms(&self) -> Result<TermCount>;

    /// A cursor over the term's positions within the current document.
    /// Position data is fetched lazily, so this may need the backend.
    fn positions(&self) -> Result<Box<dyn PositionCursor>>;

    /// The number of documents in the whole posting list. Known at cursor
    /// construction; never does I/O.
    fn termfreq(&self) -> DocCount;
}

/// A cursor over a sequence of terms: the term list of a document, the
/// database-wide term enumeration, or one of the side-channel listings
/// (spellings, synonyms, metadata keys).
///
/// Not every term sequence carries frequency data; `wdf` and `termfreq`
/// fail with [`Error::InvalidOperation`] where the sequence has none (for
/// example synonym listings).
pub trait TermCursor {
    fn advance(&mut self) -> Result<()>;

    /// Move forward to the first term `>= target` (in the cursor's order).
    fn skip_to(&mut self, target: &[u8]) -> Result<()>;

    fn at_end(&self) -> bool;

    /// The term at the current position.
    fn term(&self) -> Result<&[u8]>;

    /// The within-document frequency, where the sequence has one.
    fn wdf(&self) -> Result<TermCount>;

    /// The number of documents the current term indexes, where known.
    fn termfreq(&self) -> Result<DocCount>;
}

/// A cursor over the ascending positions of one term within one document.
pub trait PositionCursor {
    fn advance(&mut self) -> Result<()>;

    /// Move forward to the first position `>= target`.
    fn skip_to(&mut self, target: TermPos) -> Result<()>;

    fn at_end(&self) -> bool;

    /// The position at the current position of the cursor.
    fn position(&self) -> Result<TermPos>;
}

/// A cursor over one value slot across all documents that populate it, in
/// strictly ascending docid order.
pub trait ValueCursor {
    fn advance(&mut self) -> Result<()>;

    /// Move forward to the first entry with `docid >= target`.
    fn skip_to(&mut self, target: DocId) -> Result<()>;

    fn at_end(&self) -> bool;

    fn docid(&self) -> Result<DocId>;

    /// The slot's value for the current document.
    fn value(&self) -> Result<&[u8]>;
}

pub(crate) fn not_positioned<T>() -> Result<T> {
    Err(Error::InvalidOperation("cursor is not on an entry"))
}

/// One fully-decoded posting entry, as held by materialized and prefetching
/// cursors.
#[derive(Clone, Debug)]
pub(crate) struct PostingData {
    pub docid: DocId,
    pub wdf: TermCount,
    pub doc_length: TermCount,
    pub unique_terms: TermCount,
    pub positions: Vec<TermPos>,
}

/// A posting cursor over an eagerly-materialized entry list. Iteration never
/// performs I/O, so it survives handle close untouched.
pub(crate) struct MaterializedPostings {
    entries: Vec<PostingData>,
    termfreq: DocCount,
    pos: usize,
    started: bool,
}

impl MaterializedPostings {
    pub(crate) fn new(entries: Vec<PostingData>, termfreq: DocCount) -> Self {
        Self { entries, termfreq, pos: 0, started: false }
    }

    /// An at-end sentinel, as returned by the `*_end` handle operations.
    pub(crate) fn at_end_sentinel() -> Self {
        Self { entries: Vec::new(), termfreq: 0, pos: 0, started: true }
    }

    fn current(&self) -> Result<&PostingData> {
        if !self.started || self.pos >= self.entries.len() {
            return not_positioned();
        }
        Ok(&self.entries[self.pos])
    }
}

impl PostingCursor for MaterializedPostings {
    fn advance(&mut self) -> Result<()> {
        if !self.started {
            self.started = true;
        } else if self.pos < self.entries.len() {
            self.pos += 1;
        }
        Ok(())
    }

    fn skip_to(&mut self, target: DocId, _w_min: f64) -> Result<()> {
        if !self.started {
            self.started = true;
        }
        while self.pos < self.entries.len() && self.entries[self.pos].docid < target {
            self.pos += 1;
        }
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.started && self.pos >= self.entries.len()
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
        Ok(Box::new(MaterializedPositions::new(self.current()?.positions.clone())))
    }

    fn termfreq(&self) -> DocCount {
        self.termfreq
    }
}

/// One term entry with its optional frequency data.
#[derive(Clone, Debug)]
pub(crate) struct TermData {
    pub term: Vec<u8>,
    pub wdf: Option<TermCount>,
    pub termfreq: Option<DocCount>,
}

/// A term cursor over an eagerly-materialized sequence; used for document
/// term lists (which backends materialize at construction) and for the
/// side-channel listings.
pub(crate) struct MaterializedTerms {
    entries: Vec<TermData>,
    pos: usize,
    started: bool,
}

impl MaterializedTerms {
    pub(crate) fn new(entries: Vec<TermData>) -> Self {
        Self { entries, pos: 0, started: false }
    }

    pub(crate) fn at_end_sentinel() -> Self {
        Self { entries: Vec::new(), pos: 0, started: true }
    }

    fn current(&self) -> Result<&TermData> {
        if !self.started || self.pos >= self.entries.len() {
            return not_positioned();
        }
        Ok(&self.entries[self.pos])
    }
}

impl TermCursor for MaterializedTerms {
    fn advance(&mut self) -> Result<()> {
        if !self.started {
            self.started = true;
        } else if self.pos < self.entries.len() {
            self.pos += 1;
        }
        Ok(())
    }

    fn skip_to(&mut self, target: &[u8]) -> Result<()> {
        if !self.started {
            self.started = true;
        }
        while self.pos < self.entries.len() && self.entries[self.pos].term.as_slice() < target {
            self.pos += 1;
        }
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.started && self.pos >= self.entries.len()
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

/// A position cursor over an already-loaded ascending position list.
pub(crate) struct MaterializedPositions {
    positions: Vec<TermPos>,
    pos: usize,
    started: bool,
}

impl MaterializedPositions {
    pub(crate) fn new(positions: Vec<TermPos>) -> Self {
        Self { positions, pos: 0, started: false }
    }

    pub(crate) fn at_end_sentinel() -> Self {
        Self { positions: Vec::new(), pos: 0, started: true }
    }
}

impl PositionCursor for MaterializedPositions {
    fn advance(&mut self) -> Result<()> {
        if !self.started {
            self.started = true;
        } else if self.pos < self.positions.len() {
            self.pos += 1;
        }
        Ok(())
    }

    fn skip_to(&mut self, target: TermPos) -> Result<()> {
        if !self.started {
            self.started = true;
        }
        while self.pos < self.positions.len() && self.positions[self.pos] < target {
            self.pos += 1;
        }
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.started && self.pos >= self.positions.len()
    }

    fn position(&self) -> Result<TermPos> {
        if !self.started || self.pos >= self.positions.len() {
            return not_positioned();
        }
        Ok(self.positions[self.pos])
    }
}

/// A value cursor over eagerly-collected `(docid, value)` pairs.
pub(crate) struct MaterializedValues {
    entries: Vec<(DocId, Vec<u8>)>,
    pos: usize,
    started: bool,
}

impl MaterializedValues {
    pub(crate) fn new(entries: Vec<(DocId, Vec<u8>)>) -> Self {
        Self { entries, pos: 0, started: false }
    }

    pub(crate) fn at_end_sentinel() -> Self {
        Self { entries: Vec::new(), pos: 0, started: true }
    }

    fn current(&self) -> Result<&(DocId, Vec<u8>)> {
        if !self.started || self.pos >= self.entries.len() {
            return not_positioned();
        }
        Ok(&self.entries[self.pos])
    }
}

impl ValueCursor for MaterializedValues {
    fn advance(&mut self) -> Result<()> {
        if !self.started {
            self.started = true;
        } else if self.pos < self.entries.len() {
            self.pos += 1;
        }
        Ok(())
    }

    fn skip_to(&mut self, target: DocId) -> Result<()> {
        if !self.started {
            self.started = true;
        }
        while self.pos < self.entries.len() && self.entries[self.pos].0 < target {
            self.pos += 1;
        }
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.started && self.pos >= self.entries.len()
    }

    fn docid(&self) -> Result<DocId> {
        Ok(self.current()?.0)
    }

    fn value(&self) -> Result<&[u8]> {
        Ok(&self.current()?.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(docid: DocId) -> PostingData {
        PostingData { docid, wdf: 1, doc_length: 1, unique_terms: 1, positions: vec![] }
    }

    #[test]
    fn advance_is_sticky_at_end() {
        let mut c = MaterializedPostings::new(vec![entry(1), entry(4)], 2);
        assert!(!c.at_end());
        assert!(c.docid().is_err());
        c.advance().unwrap();
        assert_eq!(c.docid().unwrap(), 1);
        c.advance().unwrap();
        assert_eq!(c.docid().unwrap(), 4);
        c.advance().unwrap();
        assert!(c.at_end());
        c.advance().unwrap();
        assert!(c.at_end());
        assert!(c.docid().is_err());
    }

    #[test]
    fn skip_to_earlier_docid_is_a_no_op() {
        let mut c = MaterializedPostings::new(vec![entry(2), entry(5), entry(9)], 3);
        c.skip_to(5, 0.0).unwrap();
        assert_eq!(c.docid().unwrap(), 5);
        c.skip_to(1, 0.0).unwrap();
        assert_eq!(c.docid().unwrap(), 5);
        c.skip_to(10, 0.0).unwrap();
        assert!(c.at_end());
    }

    #[test]
    fn end_sentinel_is_at_end_without_io() {
        let c = MaterializedPostings::at_end_sentinel();
        assert!(c.at_end());
        let t = MaterializedTerms::at_end_sentinel();
        assert!(t.at_end());
    }
}
