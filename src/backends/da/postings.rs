//! The DA posting cursor: block-at-a-time iteration over one term's
//! posting list.
//!
//! Posting entries are grouped into fixed-capacity blocks chained by a
//! next-block offset, each block recording its last docid so `skip_to` can
//! walk the chain without decoding every entry. The cursor keeps the
//! decoded current block, so advancing within it, like every positioned
//! accessor, costs no I/O. `currdoc == 0` means the cursor hasn't started;
//! `currdoc == u32::MAX` means it is at the end.

use std::sync::Arc;

use crate::cursor::{
    not_positioned, MaterializedPositions, PostingCursor, PositionCursor,
};
use crate::types::{DocCount, DocId, TermCount, TermPos};
use crate::{Error, Result};

use super::DaInner;

const UNSTARTED: DocId = 0;
const AT_END: DocId = DocId::MAX;

/// Block header: entry count, last docid in the block, offset of the next
/// block (0 = final block).
const BLOCK_HEADER_LEN: usize = 14;
/// One in-block posting entry.
const ENTRY_LEN: usize = 28;

#[derive(Clone, Copy, Debug)]
struct RawPosting {
    docid: DocId,
    wdf: TermCount,
    doclen: TermCount,
    unique_terms: TermCount,
    pos_off: u64,
    pos_count: u32,
}

pub(crate) struct DaPostings {
    inner: Arc<DaInner>,
    termfreq: DocCount,
    block: Vec<RawPosting>,
    next_off: u64,
    idx: usize,
    currdoc: DocId,
}

impl DaPostings {
    /// Open a cursor for `term`. An unknown term yields an empty cursor.
    /// The first block is decoded here, so stepping onto (and through) it
    /// needs no further I/O.
    pub(crate) fn open(inner: Arc<DaInner>, term: &[u8]) -> Result<DaPostings> {
        let mut cursor = DaPostings {
            inner,
            termfreq: 0,
            block: Vec::new(),
            next_off: 0,
            idx: 0,
            currdoc: UNSTARTED,
        };
        if let Some(info) = cursor.inner.term_info(term)? {
            cursor.termfreq = info.termfreq;
            cursor.load_block(info.first_block)?;
        }
        Ok(cursor)
    }

    fn load_block(&mut self, off: u64) -> Result<()> {
        let (entries, next_off) = self.inner.with_files(|files| {
            let mut head = [0u8; BLOCK_HEADER_LEN];
            files.read_record_at(off, &mut head)?;
            let count = u16::from_be_bytes(head[0..2].try_into().unwrap()) as usize;
            let next_off = u64::from_be_bytes(head[6..14].try_into().unwrap());
            if count == 0 {
                return Err(Error::Corrupt("empty posting block".into()));
            }
            let mut raw = vec![0u8; count * ENTRY_LEN];
            files.read_record_at(off + BLOCK_HEADER_LEN as u64, &mut raw)?;
            let entries = raw
                .chunks_exact(ENTRY_LEN)
                .map(|e| RawPosting {
                    docid: u32::from_be_bytes(e[0..4].try_into().unwrap()),
                    wdf: u32::from_be_bytes(e[4..8].try_into().unwrap()),
                    doclen: u32::from_be_bytes(e[8..12].try_into().unwrap()),
                    unique_terms: u32::from_be_bytes(e[12..16].try_into().unwrap()),
                    pos_off: u64::from_be_bytes(e[16..24].try_into().unwrap()),
                    pos_count: u32::from_be_bytes(e[24..28].try_into().unwrap()),
                })
                .collect();
            Ok((entries, next_off))
        })?;
        self.block = entries;
        self.next_off = next_off;
        self.idx = 0;
        Ok(())
    }

    fn current(&self) -> Result<&RawPosting> {
        if self.currdoc == UNSTARTED || self.currdoc == AT_END {
            return not_positioned();
        }
        Ok(&self.block[self.idx])
    }
}

impl PostingCursor for DaPostings {
    fn advance(&mut self) -> Result<()> {
        match self.currdoc {
            AT_END => Ok(()),
            UNSTARTED => {
                if self.block.is_empty() {
                    self.currdoc = AT_END;
                } else {
                    self.idx = 0;
                    self.currdoc = self.block[0].docid;
                }
                Ok(())
            }
            _ => {
                if self.idx + 1 < self.block.len() {
                    self.idx += 1;
                    self.currdoc = self.block[self.idx].docid;
                } else if self.next_off != 0 {
                    let off = self.next_off;
                    self.load_block(off)?;
                    self.currdoc = self.block[0].docid;
                } else {
                    self.currdoc = AT_END;
                }
                Ok(())
            }
        }
    }

    fn skip_to(&mut self, target: DocId, _w_min: f64) -> Result<()> {
        if self.currdoc == AT_END {
            return Ok(());
        }
        if self.currdoc != UNSTARTED && target <= self.currdoc {
            return Ok(());
        }
        let mut search_from = if self.currdoc == UNSTARTED { 0 } else { self.idx };
        loop {
            match self.block.last() {
                Some(last) if target <= last.docid => {
                    let at = self.block[search_from..]
                        .partition_point(|e| e.docid < target)
                        + search_from;
                    self.idx = at;
                    self.currdoc = self.block[at].docid;
                    return Ok(());
                }
                _ => {
                    if self.next_off == 0 {
                        self.currdoc = AT_END;
                        return Ok(());
                    }
                    let off = self.next_off;
                    self.load_block(off)?;
                    search_from = 0;
                }
            }
        }
    }

    fn at_end(&self) -> bool {
        self.currdoc == AT_END
    }

    fn docid(&self) -> Result<DocId> {
        Ok(self.current()?.docid)
    }

    fn wdf(&self) -> Result<TermCount> {
        Ok(self.current()?.wdf)
    }

    fn doc_length(&self) -> Result<TermCount> {
        Ok(self.current()?.doclen)
    }

    fn unique_terms(&self) -> Result<TermCount> {
        Ok(self.current()?.unique_terms)
    }

    fn positions(&self) -> Result<Box<dyn PositionCursor>> {
        let entry = *self.current()?;
        if entry.pos_count == 0 {
            return Ok(Box::new(MaterializedPositions::new(Vec::new())));
        }
        let positions = self.inner.with_files(|files| {
            let mut raw = vec![0u8; entry.pos_count as usize * 4];
            files.read_record_at(entry.pos_off, &mut raw)?;
            Ok(raw
                .chunks_exact(4)
                .map(|p| TermPos::from_be_bytes(p.try_into().unwrap()))
                .collect::<Vec<_>>())
        })?;
        Ok(Box::new(MaterializedPositions::new(positions)))
    }

    fn termfreq(&self) -> DocCount {
        self.termfreq
    }
}
