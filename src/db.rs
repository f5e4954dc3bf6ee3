//! The user-facing read handle.
//!
//! A [`Database`] owns one or more backend shards and mediates every read.
//! With several shards, docids interleave: global docid `g` lives in shard
//! `(g-1) % n` at local docid `(g-1)/n + 1`, and merged cursors present the
//! shards as one database.
//!
//! The handle snapshots each shard's statistics at open and reopen. Those
//! cached statistics are what the statistics getters answer with, which is
//! also why they keep working after [`close`][Database::close], when
//! operations that need a fresh backend read fail with [`Error::Closed`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{Backend, BackendStats};
use crate::backends::da::DaDatabase;
use crate::backends::slate::SlateDatabase;
use crate::cursor::{
    MaterializedPositions, MaterializedPostings, MaterializedTerms, MaterializedValues,
    PostingCursor, PositionCursor, TermCursor, ValueCursor,
};
use crate::remote::client::{RemoteBackend, RemoteOptions};
use crate::types::{DocCount, DocId, TermCount, ValueSlot};
use crate::{backend::OpenMode, Document, Error, OpenFlags, Result};

/// A read-only handle over one or more database shards.
pub struct Database {
    shards: Vec<Arc<dyn Backend>>,
    stats: Mutex<Vec<BackendStats>>,
    closed: AtomicBool,
}

impl Database {
    /// Open the database in `path`, sniffing which backend's files live
    /// there.
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        let path = path.as_ref();
        let backend: Arc<dyn Backend> = if DaDatabase::detect(path) {
            Arc::new(DaDatabase::open(path)?)
        } else if SlateDatabase::detect(path) {
            Arc::new(SlateDatabase::open(path, OpenMode::Read, OpenFlags::default())?)
        } else {
            return Err(Error::Opening {
                path: path.display().to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        };
        Database::from_backend(backend)
    }

    /// Connect to a database served over TCP.
    pub fn open_remote(opts: RemoteOptions) -> Result<Database> {
        Database::from_backend(Arc::new(RemoteBackend::connect(&opts)?))
    }

    pub(crate) fn from_backend(backend: Arc<dyn Backend>) -> Result<Database> {
        let stats = backend.stats()?;
        Ok(Database {
            shards: vec![backend],
            stats: Mutex::new(vec![stats]),
            closed: AtomicBool::new(false),
        })
    }

    /// Absorb another handle's shards, interleaving docids across the
    /// combined set.
    pub fn add_database(&mut self, other: Database) -> Result<()> {
        self.check_open()?;
        other.check_open()?;
        self.shards.extend(other.shards.iter().cloned());
        self.stats.get_mut().extend(other.stats.lock().iter().cloned());
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn shard_of(&self, docid: DocId) -> Result<(usize, DocId)> {
        if docid == 0 {
            return Err(Error::InvalidArgument("docid must be positive"));
        }
        let n = self.shards.len() as DocId;
        Ok((((docid - 1) % n) as usize, (docid - 1) / n + 1))
    }

    // -- posting lists -------------------------------------------------

    /// A cursor positioned on the first document containing `term` (or at
    /// the end for an unknown term).
    pub fn postlist_begin(&self, term: impl AsRef<[u8]>) -> Result<Box<dyn PostingCursor>> {
        self.check_open()?;
        let term = term.as_ref();
        let mut cursor: Box<dyn PostingCursor> = if self.shards.len() == 1 {
            self.shards[0].postings(term)?
        } else {
            let subs = self
                .shards
                .iter()
                .map(|shard| shard.postings(term))
                .collect::<Result<Vec<_>>>()?;
            Box::new(ShardedPostings::new(subs))
        };
        cursor.advance()?;
        Ok(cursor)
    }

    /// The end sentinel for `term`'s posting list. Needs no I/O and works
    /// on a closed handle.
    pub fn postlist_end(&self, _term: impl AsRef<[u8]>) -> Box<dyn PostingCursor> {
        Box::new(MaterializedPostings::at_end_sentinel())
    }

    // -- term lists ----------------------------------------------------

    /// A cursor positioned on the first term indexing `docid`.
    pub fn termlist_begin(&self, docid: DocId) -> Result<Box<dyn TermCursor>> {
        self.check_open()?;
        let (shard, local) = self.shard_of(docid)?;
        let mut cursor = self.shards[shard].termlist(local)?;
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn termlist_end(&self, _docid: DocId) -> Box<dyn TermCursor> {
        Box::new(MaterializedTerms::at_end_sentinel())
    }

    // -- position lists ------------------------------------------------

    /// A cursor positioned on the first position of `term` in `docid`.
    pub fn positionlist_begin(
        &self,
        docid: DocId,
        term: impl AsRef<[u8]>,
    ) -> Result<Box<dyn PositionCursor>> {
        self.check_open()?;
        let (shard, local) = self.shard_of(docid)?;
        let mut cursor = self.shards[shard].positions(local, term.as_ref())?;
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn positionlist_end(&self, _docid: DocId, _term: impl AsRef<[u8]>) -> Box<dyn PositionCursor> {
        Box::new(MaterializedPositions::at_end_sentinel())
    }

    // -- the term dictionary -------------------------------------------

    /// A cursor positioned on the first term with the given prefix (empty
    /// prefix: the whole dictionary), in lexicographic order.
    pub fn allterms_begin(&self, prefix: impl AsRef<[u8]>) -> Result<Box<dyn TermCursor>> {
        self.check_open()?;
        let prefix = prefix.as_ref();
        let mut cursor: Box<dyn TermCursor> = if self.shards.len() == 1 {
            self.shards[0].allterms(prefix)?
        } else {
            let subs = self
                .shards
                .iter()
                .map(|shard| shard.allterms(prefix))
                .collect::<Result<Vec<_>>>()?;
            Box::new(ShardedTerms::new(subs))
        };
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn allterms_end(&self, _prefix: impl AsRef<[u8]>) -> Box<dyn TermCursor> {
        Box::new(MaterializedTerms::at_end_sentinel())
    }

    // -- documents -----------------------------------------------------

    pub fn get_document(&self, docid: DocId) -> Result<Document> {
        self.check_open()?;
        let (shard, local) = self.shard_of(docid)?;
        self.shards[shard].document(local)
    }

    pub fn get_doclength(&self, docid: DocId) -> Result<TermCount> {
        self.check_open()?;
        let (shard, local) = self.shard_of(docid)?;
        self.shards[shard].doc_length(local)
    }

    pub fn get_unique_terms(&self, docid: DocId) -> Result<TermCount> {
        self.check_open()?;
        let (shard, local) = self.shard_of(docid)?;
        self.shards[shard].unique_terms(local)
    }

    // -- term statistics -----------------------------------------------

    pub fn get_termfreq(&self, term: impl AsRef<[u8]>) -> Result<DocCount> {
        self.check_open()?;
        let mut freq = 0;
        for shard in &self.shards {
            freq += shard.termfreq(term.as_ref())?;
        }
        Ok(freq)
    }

    pub fn get_collection_freq(&self, term: impl AsRef<[u8]>) -> Result<u64> {
        self.check_open()?;
        let mut freq = 0;
        for shard in &self.shards {
            freq += shard.collection_freq(term.as_ref())?;
        }
        Ok(freq)
    }

    pub fn term_exists(&self, term: impl AsRef<[u8]>) -> Result<bool> {
        self.check_open()?;
        for shard in &self.shards {
            if shard.term_exists(term.as_ref())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn get_wdf_upper_bound(&self, term: impl AsRef<[u8]>) -> Result<TermCount> {
        self.check_open()?;
        let mut bound = 0;
        for shard in &self.shards {
            bound = bound.max(shard.wdf_upper_bound(term.as_ref())?);
        }
        Ok(bound)
    }

    // -- value slots ---------------------------------------------------

    pub fn get_value_freq(&self, slot: ValueSlot) -> Result<DocCount> {
        self.check_open()?;
        let mut freq = 0;
        for shard in &self.shards {
            freq += shard.value_freq(slot)?;
        }
        Ok(freq)
    }

    pub fn get_value_lower_bound(&self, slot: ValueSlot) -> Result<Vec<u8>> {
        self.check_open()?;
        let mut bound: Option<Vec<u8>> = None;
        for shard in &self.shards {
            if shard.value_freq(slot)? == 0 {
                continue;
            }
            let lb = shard.value_lower_bound(slot)?;
            bound = Some(match bound {
                Some(prev) => prev.min(lb),
                None => lb,
            });
        }
        Ok(bound.unwrap_or_default())
    }

    pub fn get_value_upper_bound(&self, slot: ValueSlot) -> Result<Vec<u8>> {
        self.check_open()?;
        let mut bound: Option<Vec<u8>> = None;
        for shard in &self.shards {
            if shard.value_freq(slot)? == 0 {
                continue;
            }
            let ub = shard.value_upper_bound(slot)?;
            bound = Some(match bound {
                Some(prev) => prev.max(ub),
                None => ub,
            });
        }
        Ok(bound.unwrap_or_default())
    }

    /// A cursor positioned on the first document populating `slot`.
    pub fn valuestream_begin(&self, slot: ValueSlot) -> Result<Box<dyn ValueCursor>> {
        self.check_open()?;
        let mut cursor: Box<dyn ValueCursor> = if self.shards.len() == 1 {
            self.shards[0].valuestream(slot)?
        } else {
            let subs = self
                .shards
                .iter()
                .map(|shard| shard.valuestream(slot))
                .collect::<Result<Vec<_>>>()?;
            Box::new(ShardedValues::new(subs))
        };
        cursor.advance()?;
        Ok(cursor)
    }

    pub fn valuestream_end(&self, _slot: ValueSlot) -> Box<dyn ValueCursor> {
        Box::new(MaterializedValues::at_end_sentinel())
    }

    // -- metadata ------------------------------------------------------

    /// The metadata value stored under `key`; empty if there is none.
    pub fn get_metadata(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        self.check_open()?;
        Ok(self.shards[0].metadata(key.as_ref())?.unwrap_or_default())
    }

    pub fn metadata_keys_begin(&self, prefix: impl AsRef<[u8]>) -> Result<Box<dyn TermCursor>> {
        self.check_open()?;
        let mut cursor = self.shards[0].metadata_keys(prefix.as_ref())?;
        cursor.advance()?;
        Ok(cursor)
    }

    // -- cached statistics ---------------------------------------------
    //
    // Answered from the open/reopen snapshot, so they remain available on
    // a closed handle.

    pub fn get_doccount(&self) -> DocCount {
        self.stats.lock().iter().map(|s| s.doccount).sum()
    }

    pub fn get_lastdocid(&self) -> DocId {
        let n = self.shards.len() as DocId;
        self.stats
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.lastdocid > 0)
            .map(|(i, s)| (s.lastdocid - 1) * n + i as DocId + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn get_avlength(&self) -> f64 {
        let stats = self.stats.lock();
        let doccount: u64 = stats.iter().map(|s| s.doccount as u64).sum();
        if doccount == 0 {
            return 0.0;
        }
        stats.iter().map(|s| s.total_doclen).sum::<u64>() as f64 / doccount as f64
    }

    pub fn get_doclength_lower_bound(&self) -> TermCount {
        self.stats.lock().iter().map(|s| s.doclen_lower_bound).min().unwrap_or(0)
    }

    pub fn get_doclength_upper_bound(&self) -> TermCount {
        self.stats.lock().iter().map(|s| s.doclen_upper_bound).max().unwrap_or(0)
    }

    pub fn has_positions(&self) -> bool {
        self.stats.lock().iter().any(|s| s.has_positions)
    }

    /// The database identity: shard uuids joined with `:`.
    pub fn get_uuid(&self) -> String {
        self.stats.lock().iter().map(|s| s.uuid.as_str()).collect::<Vec<_>>().join(":")
    }

    // -- lifecycle -----------------------------------------------------

    /// A live aggregate of the shard statistics (not the cached snapshot).
    pub(crate) fn stats_snapshot(&self) -> Result<BackendStats> {
        self.check_open()?;
        let fresh = self
            .shards
            .iter()
            .map(|shard| shard.stats())
            .collect::<Result<Vec<_>>>()?;
        Ok(combine_stats(&fresh))
    }

    /// Probe shard liveness: a no-op for local shards, a real ping for
    /// remote ones.
    pub fn keep_alive(&self) -> Result<()> {
        for shard in &self.shards {
            shard.keep_alive()?;
        }
        Ok(())
    }

    /// Re-snapshot on-disk state so the handle observes the latest
    /// committed revision.
    pub fn reopen(&self) -> Result<()> {
        self.check_open()?;
        let mut fresh = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            shard.reopen()?;
            fresh.push(shard.stats()?);
        }
        *self.stats.lock() = fresh;
        Ok(())
    }

    /// Close the handle: release every shard's descriptors and move to the
    /// terminal Closed state. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        for shard in &self.shards {
            shard.close();
        }
        debug!("closed database handle");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// A human-readable summary. Never fails, even on a closed handle.
    pub fn get_description(&self) -> String {
        let shards: Vec<String> = self.shards.iter().map(|s| s.description()).collect();
        format!("Database({})", shards.join(", "))
    }
}

pub(crate) fn combine_stats(stats: &[BackendStats]) -> BackendStats {
    let n = stats.len() as DocId;
    BackendStats {
        uuid: stats.iter().map(|s| s.uuid.as_str()).collect::<Vec<_>>().join(":"),
        doccount: stats.iter().map(|s| s.doccount).sum(),
        lastdocid: stats
            .iter()
            .enumerate()
            .filter(|(_, s)| s.lastdocid > 0)
            .map(|(i, s)| (s.lastdocid - 1) * n.max(1) + i as DocId + 1)
            .max()
            .unwrap_or(0),
        total_doclen: stats.iter().map(|s| s.total_doclen).sum(),
        doclen_lower_bound: stats.iter().map(|s| s.doclen_lower_bound).min().unwrap_or(0),
        doclen_upper_bound: stats.iter().map(|s| s.doclen_upper_bound).max().unwrap_or(0),
        has_positions: stats.iter().any(|s| s.has_positions),
    }
}

/// Merge of per-shard posting cursors into one globally-ordered cursor.
struct ShardedPostings {
    subs: Vec<Box<dyn PostingCursor>>,
    current: Option<usize>,
    started: bool,
    done: bool,
    termfreq: DocCount,
}

impl ShardedPostings {
    fn new(subs: Vec<Box<dyn PostingCursor>>) -> ShardedPostings {
        let termfreq = subs.iter().map(|s| s.termfreq()).sum();
        ShardedPostings { subs, current: None, started: false, done: false, termfreq }
    }

    fn global(&self, shard: usize, local: DocId) -> DocId {
        (local - 1) * self.subs.len() as DocId + shard as DocId + 1
    }

    fn pick_min(&mut self) -> Result<()> {
        let mut best: Option<(DocId, usize)> = None;
        for (i, sub) in self.subs.iter().enumerate() {
            if sub.at_end() {
                continue;
            }
            let g = self.global(i, sub.docid()?);
            if best.is_none_or(|(bg, _)| g < bg) {
                best = Some((g, i));
            }
        }
        match best {
            Some((_, i)) => self.current = Some(i),
            None => {
                self.current = None;
                self.done = true;
            }
        }
        Ok(())
    }

    fn sub(&self) -> Result<&dyn PostingCursor> {
        match self.current {
            Some(i) if self.started && !self.done => Ok(self.subs[i].as_ref()),
            _ => crate::cursor::not_positioned(),
        }
    }
}

impl PostingCursor for ShardedPostings {
    fn advance(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        if !self.started {
            self.started = true;
            for sub in &mut self.subs {
                sub.advance()?;
            }
        } else if let Some(i) = self.current {
            self.subs[i].advance()?;
        }
        self.pick_min()
    }

    fn skip_to(&mut self, target: DocId, w_min: f64) -> Result<()> {
        if self.done {
            return Ok(());
        }
        let n = self.subs.len() as DocId;
        for (i, sub) in self.subs.iter_mut().enumerate() {
            // Smallest local docid whose global mapping reaches the target.
            let local = target.saturating_sub(i as DocId + 1).div_ceil(n) + 1;
            sub.skip_to(local, w_min)?;
        }
        self.started = true;
        self.pick_min()
    }

    fn at_end(&self) -> bool {
        self.done
    }

    fn docid(&self) -> Result<DocId> {
        let i = self.current.ok_or(Error::InvalidOperation("cursor is not on an entry"))?;
        Ok(self.global(i, self.sub()?.docid()?))
    }

    fn wdf(&self) -> Result<TermCount> {
        self.sub()?.wdf()
    }

    fn doc_length(&self) -> Result<TermCount> {
        self.sub()?.doc_length()
    }

    fn unique_terms(&self) -> Result<TermCount> {
        self.sub()?.unique_terms()
    }

    fn positions(&self) -> Result<Box<dyn PositionCursor>> {
        self.sub()?.positions()
    }

    fn termfreq(&self) -> DocCount {
        self.termfreq
    }
}

/// Merge of per-shard dictionary cursors: lexicographic order, with the
/// frequencies of equal terms summed across shards.
struct ShardedTerms {
    subs: Vec<Box<dyn TermCursor>>,
    current_term: Option<Vec<u8>>,
    current_freq: DocCount,
    started: bool,
    done: bool,
}

impl ShardedTerms {
    fn new(subs: Vec<Box<dyn TermCursor>>) -> ShardedTerms {
        ShardedTerms { subs, current_term: None, current_freq: 0, started: false, done: false }
    }

    fn pick_min(&mut self) -> Result<()> {
        let mut min: Option<Vec<u8>> = None;
        for sub in &self.subs {
            if sub.at_end() {
                continue;
            }
            let term = sub.term()?;
            if min.as_deref().is_none_or(|m| term < m) {
                min = Some(term.to_vec());
            }
        }
        match min {
            Some(term) => {
                let mut freq = 0;
                for sub in &self.subs {
                    if !sub.at_end() && sub.term()? == term.as_slice() {
                        freq += sub.termfreq().unwrap_or(0);
                    }
                }
                self.current_term = Some(term);
                self.current_freq = freq;
            }
            None => {
                self.current_term = None;
                self.done = true;
            }
        }
        Ok(())
    }
}

impl TermCursor for ShardedTerms {
    fn advance(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        if !self.started {
            self.started = true;
            for sub in &mut self.subs {
                sub.advance()?;
            }
        } else if let Some(term) = self.current_term.take() {
            for sub in &mut self.subs {
                if !sub.at_end() && sub.term()? == term.as_slice() {
                    sub.advance()?;
                }
            }
        }
        self.pick_min()
    }

    fn skip_to(&mut self, target: &[u8]) -> Result<()> {
        if self.done {
            return Ok(());
        }
        for sub in &mut self.subs {
            sub.skip_to(target)?;
        }
        self.started = true;
        self.pick_min()
    }

    fn at_end(&self) -> bool {
        self.done
    }

    fn term(&self) -> Result<&[u8]> {
        match &self.current_term {
            Some(term) if self.started && !self.done => Ok(term),
            _ => crate::cursor::not_positioned(),
        }
    }

    fn wdf(&self) -> Result<TermCount> {
        Err(Error::InvalidOperation("term dictionary entries have no wdf"))
    }

    fn termfreq(&self) -> Result<DocCount> {
        if self.current_term.is_none() || !self.started || self.done {
            return crate::cursor::not_positioned();
        }
        Ok(self.current_freq)
    }
}

/// Merge of per-shard value streams into global docid order.
struct ShardedValues {
    subs: Vec<Box<dyn ValueCursor>>,
    current: Option<usize>,
    started: bool,
    done: bool,
}

impl ShardedValues {
    fn new(subs: Vec<Box<dyn ValueCursor>>) -> ShardedValues {
        ShardedValues { subs, current: None, started: false, done: false }
    }

    fn global(&self, shard: usize, local: DocId) -> DocId {
        (local - 1) * self.subs.len() as DocId + shard as DocId + 1
    }

    fn pick_min(&mut self) -> Result<()> {
        let mut best: Option<(DocId, usize)> = None;
        for (i, sub) in self.subs.iter().enumerate() {
            if sub.at_end() {
                continue;
            }
            let g = self.global(i, sub.docid()?);
            if best.is_none_or(|(bg, _)| g < bg) {
                best = Some((g, i));
            }
        }
        match best {
            Some((_, i)) => self.current = Some(i),
            None => {
                self.current = None;
                self.done = true;
            }
        }
        Ok(())
    }

    fn sub(&self) -> Result<&dyn ValueCursor> {
        match self.current {
            Some(i) if self.started && !self.done => Ok(self.subs[i].as_ref()),
            _ => crate::cursor::not_positioned(),
        }
    }
}

impl ValueCursor for ShardedValues {
    fn advance(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        if !self.started {
            self.started = true;
            for sub in &mut self.subs {
                sub.advance()?;
            }
        } else if let Some(i) = self.current {
            self.subs[i].advance()?;
        }
        self.pick_min()
    }

    fn skip_to(&mut self, target: DocId) -> Result<()> {
        if self.done {
            return Ok(());
        }
        let n = self.subs.len() as DocId;
        for (i, sub) in self.subs.iter_mut().enumerate() {
            let local = target.saturating_sub(i as DocId + 1).div_ceil(n) + 1;
            sub.skip_to(local)?;
        }
        self.started = true;
        self.pick_min()
    }

    fn at_end(&self) -> bool {
        self.done
    }

    fn docid(&self) -> Result<DocId> {
        let i = self.current.ok_or(Error::InvalidOperation("cursor is not on an entry"))?;
        Ok(self.global(i, self.sub()?.docid()?))
    }

    fn value(&self) -> Result<&[u8]> {
        self.sub()?.value()
    }
}
