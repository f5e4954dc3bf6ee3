//! Core value types shared by every backend: document identifiers, count
//! types, and the [`Document`] carrier itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of a document within a database. Positive; zero is never a
/// valid docid and is reserved as a "not started" sentinel by backends.
pub type DocId = u32;

/// A count of term occurrences (wdf, document length, unique-term counts).
pub type TermCount = u32;

/// A count of documents (term frequency, database document count).
pub type DocCount = u32;

/// A position of a term occurrence within a document, starting at 1.
pub type TermPos = u32;

/// A numbered value slot on a document.
pub type ValueSlot = u32;

/// The maximum length of a term name accepted by the on-disk backends.
pub const MAX_TERM_LEN: usize = 255;

/// Per-document information about one term: how often it occurs and at which
/// positions (ascending, possibly empty when positional data wasn't supplied).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub wdf: TermCount,
    pub positions: Vec<TermPos>,
}

/// A document: opaque binary data, a set of numbered value slots, and an
/// explicit set of `(term, wdf, positions)` postings.
///
/// Text analysis is outside this crate; callers index a document by calling
/// [`add_posting`][Document::add_posting] / [`add_term`][Document::add_term]
/// with already-analyzed terms. The empty document is valid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    data: Vec<u8>,
    values: BTreeMap<ValueSlot, Vec<u8>>,
    postings: BTreeMap<Vec<u8>, Posting>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the opaque data payload carried alongside the index entries.
    pub fn set_data(&mut self, data: impl Into<Vec<u8>>) {
        self.data = data.into();
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Set the value stored in a numbered slot, replacing any previous value.
    pub fn set_value(&mut self, slot: ValueSlot, value: impl Into<Vec<u8>>) {
        self.values.insert(slot, value.into());
    }

    pub fn remove_value(&mut self, slot: ValueSlot) {
        self.values.remove(&slot);
    }

    pub fn value(&self, slot: ValueSlot) -> Option<&[u8]> {
        self.values.get(&slot).map(Vec::as_slice)
    }

    /// Iterate the populated value slots in ascending slot order.
    pub fn values(&self) -> impl Iterator<Item = (ValueSlot, &[u8])> {
        self.values.iter().map(|(s, v)| (*s, v.as_slice()))
    }

    /// Add an occurrence of `term` at `position`, increasing its wdf by
    /// `wdf_inc`. Positions are kept ascending and deduplicated.
    pub fn add_posting(&mut self, term: impl AsRef<[u8]>, position: TermPos, wdf_inc: TermCount) {
        let entry = self.postings.entry(term.as_ref().to_vec()).or_default();
        entry.wdf += wdf_inc;
        if let Err(at) = entry.positions.binary_search(&position) {
            entry.positions.insert(at, position);
        }
    }

    /// Add `term` without positional information.
    pub fn add_term(&mut self, term: impl AsRef<[u8]>, wdf_inc: TermCount) {
        let entry = self.postings.entry(term.as_ref().to_vec()).or_default();
        entry.wdf += wdf_inc;
    }

    /// Remove a term and all its occurrences.
    pub fn remove_term(&mut self, term: impl AsRef<[u8]>) {
        self.postings.remove(term.as_ref());
    }

    /// Iterate the postings in ascending term order.
    pub fn postings(&self) -> impl Iterator<Item = (&[u8], &Posting)> {
        self.postings.iter().map(|(t, p)| (t.as_slice(), p))
    }

    pub fn posting(&self, term: impl AsRef<[u8]>) -> Option<&Posting> {
        self.postings.get(term.as_ref())
    }

    /// The document length: the sum of the wdf of every term.
    pub fn length(&self) -> TermCount {
        self.postings.values().map(|p| p.wdf).sum()
    }

    /// The number of distinct terms indexing this document.
    pub fn unique_terms(&self) -> TermCount {
        self.postings.len() as TermCount
    }

    /// True if any posting carries positional data.
    pub fn has_positions(&self) -> bool {
        self.postings.values().any(|p| !p.positions.is_empty())
    }
}
