//! Dictionary probing and database-wide term enumeration.
//!
//! The dictionary is a run of variable-length term records in `terms.da`,
//! sorted by term name, with a directory of fixed-size record offsets at the
//! file's tail. Probes binary-search the directory, reading records as they
//! go; nothing is loaded ahead of time.

use std::sync::Arc;

use crate::cursor::{not_positioned, TermCursor, TermData};
use crate::types::{DocCount, TermCount};
use crate::{Error, Result};

use super::{DaFiles, DaInner, TermInfo};

/// Read the term record that the directory entry at `idx` points to.
fn read_record(files: &mut DaFiles, idx: u32) -> Result<(Vec<u8>, TermInfo)> {
    let mut dir = [0u8; 8];
    let dir_offset = files.dir_offset;
    files.read_terms_at(dir_offset + idx as u64 * 8, &mut dir)?;
    let off = u64::from_be_bytes(dir);

    let mut len = [0u8; 1];
    files.read_terms_at(off, &mut len)?;
    let name_len = len[0] as usize;
    let mut rest = vec![0u8; name_len + 24];
    files.read_terms_at(off + 1, &mut rest)?;
    let tail = rest.split_off(name_len);
    let info = TermInfo {
        termfreq: u32::from_be_bytes(tail[0..4].try_into().unwrap()),
        collfreq: u64::from_be_bytes(tail[4..12].try_into().unwrap()),
        wdf_upper_bound: u32::from_be_bytes(tail[12..16].try_into().unwrap()),
        first_block: u64::from_be_bytes(tail[16..24].try_into().unwrap()),
    };
    Ok((rest, info))
}

/// Index of the first dictionary entry with name `>= target`.
fn lower_bound(files: &mut DaFiles, term_count: u32, target: &[u8]) -> Result<u32> {
    let mut lo = 0u32;
    let mut hi = term_count;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let (name, _) = read_record(files, mid)?;
        if name.as_slice() < target {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

/// Probe the dictionary for one exact term.
pub(crate) fn probe(
    files: &mut DaFiles,
    term_count: u32,
    term: &[u8],
) -> Result<Option<TermInfo>> {
    let idx = lower_bound(files, term_count, term)?;
    if idx >= term_count {
        return Ok(None);
    }
    let (name, info) = read_record(files, idx)?;
    Ok((name == term).then_some(info))
}

/// Lexicographic cursor over the term dictionary, optionally restricted to a
/// prefix. Each step reads one record; the current record's data is held by
/// the cursor, so positioned accessors never touch the file.
pub(crate) struct DaAllTerms {
    inner: Arc<DaInner>,
    prefix: Vec<u8>,
    term_count: u32,
    /// Directory index of the next record to load.
    next_idx: u32,
    current: Option<TermData>,
    started: bool,
    done: bool,
}

impl DaAllTerms {
    pub(crate) fn open(inner: Arc<DaInner>, prefix: &[u8]) -> Result<DaAllTerms> {
        let term_count = inner.header.lock().term_count;
        let next_idx =
            inner.with_files(|files| lower_bound(files, term_count, prefix))?;
        Ok(DaAllTerms {
            inner,
            prefix: prefix.to_vec(),
            term_count,
            next_idx,
            current: None,
            started: false,
            done: false,
        })
    }

    fn load_next(&mut self) -> Result<()> {
        if self.next_idx >= self.term_count {
            self.current = None;
            self.done = true;
            return Ok(());
        }
        let idx = self.next_idx;
        let (name, info) = self.inner.with_files(|files| read_record(files, idx))?;
        if !name.starts_with(&self.prefix) {
            self.current = None;
            self.done = true;
            return Ok(());
        }
        self.current = Some(TermData { term: name, wdf: None, termfreq: Some(info.termfreq) });
        self.next_idx += 1;
        Ok(())
    }
}

impl TermCursor for DaAllTerms {
    fn advance(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.started = true;
        self.load_next()
    }

    fn skip_to(&mut self, target: &[u8]) -> Result<()> {
        if self.done {
            return Ok(());
        }
        if let Some(cur) = &self.current {
            if cur.term.as_slice() >= target {
                return Ok(());
            }
        }
        let effective = target.max(self.prefix.as_slice());
        let term_count = self.term_count;
        self.next_idx =
            self.inner.with_files(|files| lower_bound(files, term_count, effective))?;
        self.started = true;
        self.load_next()
    }

    fn at_end(&self) -> bool {
        self.done
    }

    fn term(&self) -> Result<&[u8]> {
        match &self.current {
            Some(cur) if self.started => Ok(&cur.term),
            _ => not_positioned(),
        }
    }

    fn wdf(&self) -> Result<TermCount> {
        Err(Error::InvalidOperation("term dictionary entries have no wdf"))
    }

    fn termfreq(&self) -> Result<DocCount> {
        match &self.current {
            Some(cur) if self.started => Ok(cur.termfreq.unwrap_or(0)),
            _ => not_positioned(),
        }
    }
}
