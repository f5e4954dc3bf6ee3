//! Offline writer for the DA format, used to compact a document set into
//! the two-file layout the read-only backend serves.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::types::{DocId, Document, TermPos, ValueSlot, MAX_TERM_LEN};
use crate::{Error, Result};

use super::{BLOCK_ENTRIES, DOC_RECORD_LEN, RECORD_FILE, RECORD_MAGIC, TERMS_FILE, TERMS_MAGIC};

/// Accumulates documents and writes them out as a DA database directory.
///
/// Docids are assigned sequentially from 1 in insertion order. Everything is
/// staged in memory until [`write`][DaBuilder::write], so the builder suits
/// fixture corpora and compaction of modestly-sized databases.
#[derive(Default)]
pub struct DaBuilder {
    docs: Vec<Document>,
}

struct PostingRef {
    docid: DocId,
    wdf: u32,
    doclen: u32,
    unique: u32,
    positions: Vec<TermPos>,
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

impl DaBuilder {
    pub fn new() -> DaBuilder {
        DaBuilder::default()
    }

    /// Stage a document, returning the docid it will be written under.
    pub fn add_document(&mut self, doc: Document) -> DocId {
        self.docs.push(doc);
        self.docs.len() as DocId
    }

    /// Write the staged documents to `path` as `terms.da` + `record.da`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        for doc in &self.docs {
            for (term, _) in doc.postings() {
                if term.is_empty() || term.len() > MAX_TERM_LEN {
                    return Err(Error::InvalidArgument("term must be 1..=255 bytes"));
                }
            }
        }

        let lastdocid = self.docs.len() as u32;

        // Gather the inverted index: term -> ascending posting refs.
        let mut index: BTreeMap<&[u8], Vec<PostingRef>> = BTreeMap::new();
        for (i, doc) in self.docs.iter().enumerate() {
            let docid = i as DocId + 1;
            for (term, posting) in doc.postings() {
                index.entry(term).or_default().push(PostingRef {
                    docid,
                    wdf: posting.wdf,
                    doclen: doc.length(),
                    unique: doc.unique_terms(),
                    positions: posting.positions.clone(),
                });
            }
        }

        let mut record = Vec::new();
        record.extend_from_slice(RECORD_MAGIC);
        put_u32(&mut record, lastdocid);
        let table_start = record.len();
        record.resize(table_start + lastdocid as usize * DOC_RECORD_LEN as usize, 0);

        for (i, doc) in self.docs.iter().enumerate() {
            let data_off = record.len() as u64;
            record.extend_from_slice(doc.data());

            let termvec_off = record.len() as u64;
            put_u32(&mut record, doc.unique_terms());
            for (term, posting) in doc.postings() {
                record.push(term.len() as u8);
                record.extend_from_slice(term);
                put_u32(&mut record, posting.wdf);
                put_u32(&mut record, index[term].len() as u32);
            }

            let values_off = record.len() as u64;
            let values: Vec<(ValueSlot, &[u8])> = doc.values().collect();
            put_u32(&mut record, values.len() as u32);
            for (slot, value) in &values {
                put_u32(&mut record, *slot);
                put_u32(&mut record, value.len() as u32);
                record.extend_from_slice(value);
            }

            let mut entry = Vec::with_capacity(DOC_RECORD_LEN as usize);
            put_u32(&mut entry, 1);
            put_u32(&mut entry, doc.length());
            put_u32(&mut entry, doc.unique_terms());
            put_u32(&mut entry, doc.data().len() as u32);
            put_u64(&mut entry, data_off);
            put_u64(&mut entry, termvec_off);
            put_u64(&mut entry, values_off);
            let at = table_start + i * DOC_RECORD_LEN as usize;
            record[at..at + DOC_RECORD_LEN as usize].copy_from_slice(&entry);
        }

        // Posting blocks, chained by next-block offsets. Blocks are emitted
        // back to front so each can record where its successor landed.
        let mut first_blocks: BTreeMap<&[u8], u64> = BTreeMap::new();
        for (term, refs) in &index {
            let pos_offs: Vec<(u64, u32)> = refs
                .iter()
                .map(|r| {
                    if r.positions.is_empty() {
                        (0, 0)
                    } else {
                        let off = record.len() as u64;
                        for p in &r.positions {
                            put_u32(&mut record, *p);
                        }
                        (off, r.positions.len() as u32)
                    }
                })
                .collect();

            let chunks: Vec<_> = refs.chunks(BLOCK_ENTRIES).collect();
            let mut next_off = 0u64;
            for (ci, chunk) in chunks.iter().enumerate().rev() {
                let off = record.len() as u64;
                put_u16(&mut record, chunk.len() as u16);
                put_u32(&mut record, chunk.last().unwrap().docid);
                put_u64(&mut record, next_off);
                for (ei, r) in chunk.iter().enumerate() {
                    let (pos_off, pos_count) = pos_offs[ci * BLOCK_ENTRIES + ei];
                    put_u32(&mut record, r.docid);
                    put_u32(&mut record, r.wdf);
                    put_u32(&mut record, r.doclen);
                    put_u32(&mut record, r.unique);
                    put_u64(&mut record, pos_off);
                    put_u32(&mut record, pos_count);
                }
                next_off = off;
            }
            first_blocks.insert(*term, next_off);
        }

        // Slot statistics: population count and bytewise value bounds.
        let mut slots: BTreeMap<ValueSlot, (u32, Vec<u8>, Vec<u8>)> = BTreeMap::new();
        for doc in &self.docs {
            for (slot, value) in doc.values() {
                match slots.get_mut(&slot) {
                    None => {
                        slots.insert(slot, (1, value.to_vec(), value.to_vec()));
                    }
                    Some((freq, lb, ub)) => {
                        *freq += 1;
                        if value < lb.as_slice() {
                            *lb = value.to_vec();
                        }
                        if value > ub.as_slice() {
                            *ub = value.to_vec();
                        }
                    }
                }
            }
        }

        let doclens: Vec<u32> = self.docs.iter().map(|d| d.length()).collect();
        let total_doclen: u64 = doclens.iter().map(|&l| l as u64).sum();
        let has_positions = self.docs.iter().any(|d| d.has_positions());

        let mut terms = Vec::new();
        terms.extend_from_slice(TERMS_MAGIC);
        put_u32(&mut terms, lastdocid);
        put_u32(&mut terms, lastdocid);
        put_u32(&mut terms, doclens.iter().copied().min().unwrap_or(0));
        put_u32(&mut terms, doclens.iter().copied().max().unwrap_or(0));
        put_u64(&mut terms, total_doclen);
        put_u32(&mut terms, index.len() as u32);
        put_u32(&mut terms, slots.len() as u32);
        terms.push(has_positions as u8);
        terms.extend_from_slice(&[0; 3]);
        terms.extend_from_slice(uuid::Uuid::new_v4().as_bytes());

        for (slot, (freq, lb, ub)) in &slots {
            put_u32(&mut terms, *slot);
            put_u32(&mut terms, *freq);
            put_u16(&mut terms, lb.len() as u16);
            put_u16(&mut terms, ub.len() as u16);
            terms.extend_from_slice(lb);
            terms.extend_from_slice(ub);
        }

        let mut dir = Vec::with_capacity(index.len());
        for (term, refs) in &index {
            dir.push(terms.len() as u64);
            terms.push(term.len() as u8);
            terms.extend_from_slice(term);
            put_u32(&mut terms, refs.len() as u32);
            put_u64(&mut terms, refs.iter().map(|r| r.wdf as u64).sum());
            put_u32(&mut terms, refs.iter().map(|r| r.wdf).max().unwrap_or(0));
            put_u64(&mut terms, first_blocks[term]);
        }
        let dir_offset = terms.len() as u64;
        for off in dir {
            put_u64(&mut terms, off);
        }
        put_u64(&mut terms, dir_offset);

        fs::create_dir_all(path).map_err(|e| Error::Opening {
            path: path.display().to_string(),
            source: e,
        })?;
        let write = |name: &str, bytes: &[u8]| {
            fs::write(path.join(name), bytes).map_err(|e| Error::Opening {
                path: path.join(name).display().to_string(),
                source: e,
            })
        };
        write(RECORD_FILE, &record)?;
        write(TERMS_FILE, &terms)?;
        Ok(())
    }
}
