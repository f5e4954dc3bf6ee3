//! The DA backend: a read-only reader for a legacy two-file binary format.
//!
//! A DA database directory holds a `terms.da` file (the sorted term
//! dictionary, with a fixed offset directory at its tail for binary
//! probing) and a `record.da` file (per-document stats and data, chained
//! posting blocks, position arrays, and eagerly-readable term vectors).
//! All integers are big-endian.
//!
//! Term lookup is two-phase: a probe of the dictionary fetches the heavy
//! per-term record (frequencies, block pointer) on first use, and a
//! per-database cache memoizes the result, hits and misses both, for the
//! life of the handle. Posting cursors decode one block at a time, so
//! stepping within the current block never touches the file.
//!
//! The format is produced offline by [`DaBuilder`]; the backend itself
//! refuses every mutation with [`Error::Unavailable`].

mod builder;
mod postings;
mod terms;

pub use builder::DaBuilder;

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{Backend, BackendStats};
use crate::cursor::{
    MaterializedTerms, MaterializedValues, PostingCursor, PositionCursor, TermCursor, TermData,
    ValueCursor,
};
use crate::types::{DocCount, DocId, Document, TermCount, ValueSlot, MAX_TERM_LEN};
use crate::{Error, Result};

pub(crate) const TERMS_MAGIC: &[u8; 4] = b"DAt1";
pub(crate) const RECORD_MAGIC: &[u8; 4] = b"DAr1";
pub(crate) const TERMS_FILE: &str = "terms.da";
pub(crate) const RECORD_FILE: &str = "record.da";

/// Size of the fixed header at the start of `terms.da`.
pub(crate) const TERMS_HEADER_LEN: usize = 56;
/// Size of one entry in the `record.da` document table.
pub(crate) const DOC_RECORD_LEN: u64 = 40;
/// Maximum posting entries per block.
pub(crate) const BLOCK_ENTRIES: usize = 16;

/// The dictionary record for one term, fetched by a probe and memoized.
#[derive(Clone, Debug)]
pub(crate) struct TermInfo {
    pub termfreq: DocCount,
    pub collfreq: u64,
    pub wdf_upper_bound: TermCount,
    pub first_block: u64,
}

/// A term-cache entry: the probe result, kept for the life of the handle.
pub(crate) enum TermEntry {
    Resolved(Arc<TermInfo>),
    Absent,
}

#[derive(Clone, Debug)]
pub(crate) struct DaHeader {
    pub doccount: DocCount,
    pub lastdocid: DocId,
    pub doclen_lower_bound: TermCount,
    pub doclen_upper_bound: TermCount,
    pub total_doclen: u64,
    pub term_count: u32,
    pub has_positions: bool,
    pub uuid: String,
}

#[derive(Clone, Debug)]
pub(crate) struct SlotStats {
    pub slot: ValueSlot,
    pub freq: DocCount,
    pub lower_bound: Vec<u8>,
    pub upper_bound: Vec<u8>,
}

pub(crate) struct DaFiles {
    pub terms: File,
    pub record: File,
    /// Offset of the term-offset directory at the tail of `terms.da`.
    pub dir_offset: u64,
}

impl DaFiles {
    pub(crate) fn read_terms_at(&mut self, off: u64, buf: &mut [u8]) -> Result<()> {
        read_at(&mut self.terms, off, buf)
    }

    pub(crate) fn read_record_at(&mut self, off: u64, buf: &mut [u8]) -> Result<()> {
        read_at(&mut self.record, off, buf)
    }
}

fn read_at(file: &mut File, off: u64, buf: &mut [u8]) -> Result<()> {
    file.seek(SeekFrom::Start(off))
        .and_then(|_| file.read_exact(buf))
        .map_err(|e| Error::Corrupt(format!("short read at offset {off}: {e}")))
}

pub(crate) struct DaInner {
    path: PathBuf,
    pub(crate) files: Mutex<Option<DaFiles>>,
    pub(crate) header: Mutex<DaHeader>,
    slots: Mutex<Vec<SlotStats>>,
    term_cache: Mutex<HashMap<Vec<u8>, TermEntry>>,
}

/// Read-only handle state for one DA database directory.
pub struct DaDatabase {
    inner: Arc<DaInner>,
}

impl DaDatabase {
    /// Open the DA database in `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<DaDatabase> {
        let path = path.as_ref().to_path_buf();
        let open_file = |name: &str| {
            File::open(path.join(name)).map_err(|e| Error::Opening {
                path: path.join(name).display().to_string(),
                source: e,
            })
        };
        let terms = open_file(TERMS_FILE)?;
        let record = open_file(RECORD_FILE)?;
        let mut files = DaFiles { terms, record, dir_offset: 0 };
        let (header, slots) = read_header(&mut files)?;
        debug!(path = %path.display(), doccount = header.doccount, "opened da database");
        Ok(DaDatabase {
            inner: Arc::new(DaInner {
                path,
                files: Mutex::new(Some(files)),
                header: Mutex::new(header),
                slots: Mutex::new(slots),
                term_cache: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// True if `path` looks like a DA database directory.
    pub fn detect(path: &Path) -> bool {
        path.join(TERMS_FILE).is_file()
    }
}

/// Parse the `terms.da` header and slot statistics, and locate the
/// dictionary directory. Fills in `files.dir_offset`.
fn read_header(files: &mut DaFiles) -> Result<(DaHeader, Vec<SlotStats>)> {
    let file_len = files
        .terms
        .metadata()
        .map_err(|e| Error::Corrupt(format!("unreadable terms file: {e}")))?
        .len();
    if file_len < (TERMS_HEADER_LEN + 8) as u64 {
        return Err(Error::Corrupt("terms file is truncated".into()));
    }

    let mut buf = [0u8; TERMS_HEADER_LEN];
    files.read_terms_at(0, &mut buf)?;
    if &buf[0..4] != TERMS_MAGIC {
        return Err(Error::Corrupt("bad magic in terms file".into()));
    }
    let mut record_head = [0u8; 8];
    files.read_record_at(0, &mut record_head)?;
    if &record_head[0..4] != RECORD_MAGIC {
        return Err(Error::Corrupt("bad magic in record file".into()));
    }
    let u32_at = |at: usize| u32::from_be_bytes(buf[at..at + 4].try_into().unwrap());
    let header = DaHeader {
        doccount: u32_at(4),
        lastdocid: u32_at(8),
        doclen_lower_bound: u32_at(12),
        doclen_upper_bound: u32_at(16),
        total_doclen: u64::from_be_bytes(buf[20..28].try_into().unwrap()),
        term_count: u32_at(28),
        has_positions: buf[36] != 0,
        uuid: uuid::Uuid::from_bytes(buf[40..56].try_into().unwrap()).to_string(),
    };
    let slot_count = u32_at(32);

    let mut trailer = [0u8; 8];
    files.read_terms_at(file_len - 8, &mut trailer)?;
    let dir_offset = u64::from_be_bytes(trailer);
    if dir_offset
        .checked_add(8 * header.term_count as u64 + 8)
        .is_none_or(|end| end != file_len)
    {
        return Err(Error::Corrupt("dictionary directory mismatch".into()));
    }
    files.dir_offset = dir_offset;

    let mut slots = Vec::with_capacity(slot_count as usize);
    let mut off = TERMS_HEADER_LEN as u64;
    for _ in 0..slot_count {
        let mut fixed = [0u8; 12];
        files.read_terms_at(off, &mut fixed)?;
        let slot = u32::from_be_bytes(fixed[0..4].try_into().unwrap());
        let freq = u32::from_be_bytes(fixed[4..8].try_into().unwrap());
        let lb_len = u16::from_be_bytes(fixed[8..10].try_into().unwrap()) as usize;
        let ub_len = u16::from_be_bytes(fixed[10..12].try_into().unwrap()) as usize;
        let mut bounds = vec![0u8; lb_len + ub_len];
        files.read_terms_at(off + 12, &mut bounds)?;
        let upper_bound = bounds.split_off(lb_len);
        slots.push(SlotStats { slot, freq, lower_bound: bounds, upper_bound });
        off += 12 + (lb_len + ub_len) as u64;
    }
    Ok((header, slots))
}

impl DaInner {
    /// Run `f` with the open files, or fail if the handle has been closed.
    pub(crate) fn with_files<T>(&self, f: impl FnOnce(&mut DaFiles) -> Result<T>) -> Result<T> {
        let mut guard = self.files.lock();
        match guard.as_mut() {
            Some(files) => f(files),
            None => Err(Error::Closed),
        }
    }

    /// Look up the dictionary record for `term`, probing the terms file on
    /// the first request and memoizing the outcome.
    pub(crate) fn term_info(&self, term: &[u8]) -> Result<Option<Arc<TermInfo>>> {
        if term.is_empty() || term.len() > MAX_TERM_LEN {
            return Ok(None);
        }
        {
            let cache = self.term_cache.lock();
            match cache.get(term) {
                Some(TermEntry::Resolved(info)) => return Ok(Some(info.clone())),
                Some(TermEntry::Absent) => return Ok(None),
                None => {}
            }
        }
        let probed = self.with_files(|files| {
            let term_count = self.header.lock().term_count;
            terms::probe(files, term_count, term)
        })?;
        let mut cache = self.term_cache.lock();
        Ok(match probed {
            Some(info) => {
                let info = Arc::new(info);
                cache.insert(term.to_vec(), TermEntry::Resolved(info.clone()));
                Some(info)
            }
            None => {
                cache.insert(term.to_vec(), TermEntry::Absent);
                None
            }
        })
    }

    /// Read the document-table record for `docid`; `None` when the docid is
    /// out of range or deleted.
    pub(crate) fn doc_record(
        &self,
        files: &mut DaFiles,
        docid: DocId,
    ) -> Result<Option<DocRecord>> {
        let lastdocid = self.header.lock().lastdocid;
        if docid == 0 || docid > lastdocid {
            return Ok(None);
        }
        let mut buf = [0u8; DOC_RECORD_LEN as usize];
        files.read_record_at(8 + (docid as u64 - 1) * DOC_RECORD_LEN, &mut buf)?;
        let u32_at = |at: usize| u32::from_be_bytes(buf[at..at + 4].try_into().unwrap());
        let u64_at = |at: usize| u64::from_be_bytes(buf[at..at + 8].try_into().unwrap());
        if u32_at(0) == 0 {
            return Ok(None);
        }
        Ok(Some(DocRecord {
            doclen: u32_at(4),
            unique_terms: u32_at(8),
            data_len: u32_at(12),
            data_off: u64_at(16),
            termvec_off: u64_at(24),
            values_off: u64_at(32),
        }))
    }

    /// Read a document's value list: ascending `(slot, value)` pairs.
    pub(crate) fn read_values(
        &self,
        files: &mut DaFiles,
        rec: &DocRecord,
    ) -> Result<Vec<(ValueSlot, Vec<u8>)>> {
        let mut count = [0u8; 4];
        files.read_record_at(rec.values_off, &mut count)?;
        let count = u32::from_be_bytes(count);
        let mut off = rec.values_off + 4;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut head = [0u8; 8];
            files.read_record_at(off, &mut head)?;
            let slot = u32::from_be_bytes(head[0..4].try_into().unwrap());
            let len = u32::from_be_bytes(head[4..8].try_into().unwrap()) as usize;
            let mut value = vec![0u8; len];
            files.read_record_at(off + 8, &mut value)?;
            out.push((slot, value));
            off += 8 + len as u64;
        }
        Ok(out)
    }

    /// Materialize a document's term vector.
    pub(crate) fn read_termvec(
        &self,
        files: &mut DaFiles,
        rec: &DocRecord,
    ) -> Result<Vec<TermData>> {
        let mut count = [0u8; 4];
        files.read_record_at(rec.termvec_off, &mut count)?;
        let count = u32::from_be_bytes(count);
        let mut off = rec.termvec_off + 4;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut len = [0u8; 1];
            files.read_record_at(off, &mut len)?;
            let name_len = len[0] as usize;
            let mut rest = vec![0u8; name_len + 8];
            files.read_record_at(off + 1, &mut rest)?;
            let freqs = rest.split_off(name_len);
            out.push(TermData {
                term: rest,
                wdf: Some(u32::from_be_bytes(freqs[0..4].try_into().unwrap())),
                termfreq: Some(u32::from_be_bytes(freqs[4..8].try_into().unwrap())),
            });
            off += 1 + name_len as u64 + 8;
        }
        Ok(out)
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct DocRecord {
    pub doclen: TermCount,
    pub unique_terms: TermCount,
    pub data_len: u32,
    pub data_off: u64,
    pub termvec_off: u64,
    pub values_off: u64,
}

impl Backend for DaDatabase {
    fn stats(&self) -> Result<BackendStats> {
        self.inner.with_files(|_| Ok(()))?;
        let header = self.inner.header.lock();
        Ok(BackendStats {
            uuid: header.uuid.clone(),
            doccount: header.doccount,
            lastdocid: header.lastdocid,
            total_doclen: header.total_doclen,
            doclen_lower_bound: header.doclen_lower_bound,
            doclen_upper_bound: header.doclen_upper_bound,
            has_positions: header.has_positions,
        })
    }

    fn postings(&self, term: &[u8]) -> Result<Box<dyn PostingCursor>> {
        Ok(Box::new(postings::DaPostings::open(self.inner.clone(), term)?))
    }

    fn termlist(&self, docid: DocId) -> Result<Box<dyn TermCursor>> {
        let entries = self.inner.with_files(|files| {
            let rec = self
                .inner
                .doc_record(files, docid)?
                .ok_or(Error::InvalidArgument("no such document"))?;
            self.inner.read_termvec(files, &rec)
        })?;
        Ok(Box::new(MaterializedTerms::new(entries)))
    }

    fn positions(&self, docid: DocId, term: &[u8]) -> Result<Box<dyn PositionCursor>> {
        let mut postings = postings::DaPostings::open(self.inner.clone(), term)?;
        postings.skip_to(docid, 0.0)?;
        if postings.at_end() || postings.docid()? != docid {
            return Err(Error::InvalidArgument("term does not index that document"));
        }
        postings.positions()
    }

    fn allterms(&self, prefix: &[u8]) -> Result<Box<dyn TermCursor>> {
        Ok(Box::new(terms::DaAllTerms::open(self.inner.clone(), prefix)?))
    }

    fn document(&self, docid: DocId) -> Result<Document> {
        self.inner.with_files(|files| {
            let rec = self
                .inner
                .doc_record(files, docid)?
                .ok_or(Error::InvalidArgument("no such document"))?;
            let mut doc = Document::new();
            let mut data = vec![0u8; rec.data_len as usize];
            files.read_record_at(rec.data_off, &mut data)?;
            doc.set_data(data);
            for (slot, value) in self.inner.read_values(files, &rec)? {
                doc.set_value(slot, value);
            }
            for td in self.inner.read_termvec(files, &rec)? {
                doc.add_term(&td.term, td.wdf.unwrap_or(0));
            }
            Ok(doc)
        })
    }

    fn termfreq(&self, term: &[u8]) -> Result<DocCount> {
        Ok(self.inner.term_info(term)?.map_or(0, |info| info.termfreq))
    }

    fn collection_freq(&self, term: &[u8]) -> Result<u64> {
        Ok(self.inner.term_info(term)?.map_or(0, |info| info.collfreq))
    }

    fn term_exists(&self, term: &[u8]) -> Result<bool> {
        Ok(self.inner.term_info(term)?.is_some())
    }

    fn value_freq(&self, slot: ValueSlot) -> Result<DocCount> {
        self.inner.with_files(|_| Ok(()))?;
        let slots = self.inner.slots.lock();
        Ok(slots.iter().find(|s| s.slot == slot).map_or(0, |s| s.freq))
    }

    fn value_lower_bound(&self, slot: ValueSlot) -> Result<Vec<u8>> {
        self.inner.with_files(|_| Ok(()))?;
        let slots = self.inner.slots.lock();
        Ok(slots.iter().find(|s| s.slot == slot).map_or(Vec::new(), |s| s.lower_bound.clone()))
    }

    fn value_upper_bound(&self, slot: ValueSlot) -> Result<Vec<u8>> {
        self.inner.with_files(|_| Ok(()))?;
        let slots = self.inner.slots.lock();
        Ok(slots.iter().find(|s| s.slot == slot).map_or(Vec::new(), |s| s.upper_bound.clone()))
    }

    fn valuestream(&self, slot: ValueSlot) -> Result<Box<dyn ValueCursor>> {
        let lastdocid = self.inner.header.lock().lastdocid;
        let entries = self.inner.with_files(|files| {
            let mut entries = Vec::new();
            for docid in 1..=lastdocid {
                let Some(rec) = self.inner.doc_record(files, docid)? else {
                    continue;
                };
                let values = self.inner.read_values(files, &rec)?;
                if let Some((_, value)) = values.into_iter().find(|(s, _)| *s == slot) {
                    entries.push((docid, value));
                }
            }
            Ok(entries)
        })?;
        Ok(Box::new(MaterializedValues::new(entries)))
    }

    fn doc_length(&self, docid: DocId) -> Result<TermCount> {
        self.inner.with_files(|files| {
            self.inner
                .doc_record(files, docid)?
                .map(|rec| rec.doclen)
                .ok_or(Error::InvalidArgument("no such document"))
        })
    }

    fn unique_terms(&self, docid: DocId) -> Result<TermCount> {
        self.inner.with_files(|files| {
            self.inner
                .doc_record(files, docid)?
                .map(|rec| rec.unique_terms)
                .ok_or(Error::InvalidArgument("no such document"))
        })
    }

    fn wdf_upper_bound(&self, term: &[u8]) -> Result<TermCount> {
        Ok(self.inner.term_info(term)?.map_or(0, |info| info.wdf_upper_bound))
    }

    fn metadata(&self, _key: &[u8]) -> Result<Option<Vec<u8>>> {
        // The format has no metadata table; absence is the honest answer.
        Ok(None)
    }

    fn reopen(&self) -> Result<()> {
        let mut guard = self.inner.files.lock();
        if guard.is_none() {
            return Err(Error::Closed);
        }
        let open_file = |name: &str| {
            File::open(self.inner.path.join(name)).map_err(|e| Error::Opening {
                path: self.inner.path.join(name).display().to_string(),
                source: e,
            })
        };
        let terms = open_file(TERMS_FILE)?;
        let record = open_file(RECORD_FILE)?;
        let mut files = DaFiles { terms, record, dir_offset: 0 };
        let (header, slots) = read_header(&mut files)?;
        *guard = Some(files);
        *self.inner.header.lock() = header;
        *self.inner.slots.lock() = slots;
        self.inner.term_cache.lock().clear();
        debug!(path = %self.inner.path.display(), "reopened da database");
        Ok(())
    }

    fn close(&self) {
        let files = self.inner.files.lock().take();
        if files.is_some() {
            debug!(path = %self.inner.path.display(), "closed da database");
        }
        drop(files);
    }

    fn is_closed(&self) -> bool {
        self.inner.files.lock().is_none()
    }

    fn description(&self) -> String {
        format!("da:{}", self.inner.path.display())
    }
}
