//! The slate backend: the writable local backend.
//!
//! A slate database directory holds a bincode snapshot (`snapshot.slate`),
//! an append-only changeset journal (`journal.slate`), and the writer's
//! lockfile (`slate.lock`). The live state is memory-resident; every
//! mutation is applied to it and appended to the journal, and `commit`
//! rewrites the snapshot and truncates the journal. A writable open replays
//! any journal left behind by a writer that never reached its next commit;
//! read-only opens load the snapshot alone, so readers only ever observe
//! committed revisions.
//!
//! The lockfile is an advisory exclusive lock scoped to the directory; it is
//! held for the whole life of the writable handle and released on close.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{Backend, BackendStats, OpenFlags, OpenMode, WritableBackend};
use crate::cursor::{
    MaterializedPositions, MaterializedPostings, MaterializedTerms, MaterializedValues,
    PostingCursor, PositionCursor, PostingData, TermCursor, TermData, ValueCursor,
};
use crate::types::{DocCount, DocId, Document, TermCount, ValueSlot, MAX_TERM_LEN};
use crate::{Error, Result};

const SNAPSHOT_FILE: &str = "snapshot.slate";
const JOURNAL_FILE: &str = "journal.slate";
const LOCK_FILE: &str = "slate.lock";

/// Everything the snapshot persists.
#[derive(Clone, Serialize, Deserialize)]
struct State {
    uuid: String,
    lastdocid: DocId,
    docs: BTreeMap<DocId, Document>,
    spelling: BTreeMap<Vec<u8>, DocCount>,
    synonyms: BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>>,
    metadata: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl State {
    fn fresh() -> State {
        State {
            uuid: uuid::Uuid::new_v4().to_string(),
            lastdocid: 0,
            docs: BTreeMap::new(),
            spelling: BTreeMap::new(),
            synonyms: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// One journal frame.
#[derive(Serialize, Deserialize)]
enum Change {
    /// Add or replace the document at `docid`.
    Put { docid: DocId, doc: Document },
    Delete { docid: DocId },
    AddSpelling { word: Vec<u8>, freq: DocCount },
    RemoveSpelling { word: Vec<u8>, freq: DocCount },
    AddSynonym { term: Vec<u8>, synonym: Vec<u8> },
    RemoveSynonym { term: Vec<u8>, synonym: Vec<u8> },
    ClearSynonyms { term: Vec<u8> },
    SetMetadata { key: Vec<u8>, value: Vec<u8> },
}

/// The inverted index derived from the document set. Rebuilt on load,
/// maintained incrementally by mutations.
#[derive(Default)]
struct Index {
    /// term -> docid -> wdf
    postings: BTreeMap<Vec<u8>, BTreeMap<DocId, TermCount>>,
}

impl Index {
    fn build(docs: &BTreeMap<DocId, Document>) -> Index {
        let mut index = Index::default();
        for (docid, doc) in docs {
            index.add_doc(*docid, doc);
        }
        index
    }

    fn add_doc(&mut self, docid: DocId, doc: &Document) {
        for (term, posting) in doc.postings() {
            self.postings.entry(term.to_vec()).or_default().insert(docid, posting.wdf);
        }
    }

    fn remove_doc(&mut self, docid: DocId, doc: &Document) {
        for (term, _) in doc.postings() {
            if let Some(entry) = self.postings.get_mut(term) {
                entry.remove(&docid);
                if entry.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }
}

struct Live {
    state: State,
    index: Index,
}

impl Live {
    fn apply(&mut self, change: &Change) {
        match change {
            Change::Put { docid, doc } => {
                if let Some(old) = self.state.docs.remove(docid) {
                    self.index.remove_doc(*docid, &old);
                }
                self.index.add_doc(*docid, doc);
                self.state.docs.insert(*docid, doc.clone());
                self.state.lastdocid = self.state.lastdocid.max(*docid);
            }
            Change::Delete { docid } => {
                if let Some(old) = self.state.docs.remove(docid) {
                    self.index.remove_doc(*docid, &old);
                }
            }
            Change::AddSpelling { word, freq } => {
                *self.state.spelling.entry(word.clone()).or_insert(0) += freq;
            }
            Change::RemoveSpelling { word, freq } => {
                if let Some(current) = self.state.spelling.get_mut(word) {
                    if *current <= *freq {
                        self.state.spelling.remove(word);
                    } else {
                        *current -= freq;
                    }
                }
            }
            Change::AddSynonym { term, synonym } => {
                self.state.synonyms.entry(term.clone()).or_default().insert(synonym.clone());
            }
            Change::RemoveSynonym { term, synonym } => {
                if let Some(set) = self.state.synonyms.get_mut(term) {
                    set.remove(synonym);
                    if set.is_empty() {
                        self.state.synonyms.remove(term);
                    }
                }
            }
            Change::ClearSynonyms { term } => {
                self.state.synonyms.remove(term);
            }
            Change::SetMetadata { key, value } => {
                if value.is_empty() {
                    self.state.metadata.remove(key);
                } else {
                    self.state.metadata.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

struct SlateInner {
    path: PathBuf,
    writable: bool,
    flags: OpenFlags,
    cell: RwLock<Option<Live>>,
    journal: Mutex<Option<File>>,
    lock: Mutex<Option<File>>,
    uncommitted: AtomicBool,
}

/// A slate database handle's backend state, read-only or writable.
pub struct SlateDatabase {
    inner: SlateInner,
}

fn io_open_err(path: &Path, source: std::io::Error) -> Error {
    Error::Opening { path: path.display().to_string(), source }
}

fn write_snapshot(path: &Path, flags: &OpenFlags, state: &State) -> Result<()> {
    let bytes =
        bincode::serialize(state).map_err(|e| Error::Corrupt(format!("unencodable state: {e}")))?;
    let snap = path.join(SNAPSHOT_FILE);
    let tmp = path.join("snapshot.tmp");
    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        if !flags.no_sync {
            file.sync_all()?;
        }
        fs::rename(&tmp, &snap)?;
        if flags.full_sync {
            File::open(path)?.sync_all()?;
        }
        Ok(())
    };
    write().map_err(|e| io_open_err(&snap, e))
}

fn load_snapshot(path: &Path) -> Result<State> {
    let snap = path.join(SNAPSHOT_FILE);
    match fs::read(&snap) {
        Ok(bytes) => bincode::deserialize(&bytes)
            .map_err(|e| Error::Corrupt(format!("bad snapshot: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(State::fresh()),
        Err(e) => Err(io_open_err(&snap, e)),
    }
}

/// Replay journal frames onto `live`. A torn final frame (a writer died
/// mid-append) ends the replay cleanly.
fn replay_journal(path: &Path, live: &mut Live) -> Result<()> {
    let mut file = match File::open(path.join(JOURNAL_FILE)) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_open_err(&path.join(JOURNAL_FILE), e)),
    };
    let mut replayed = 0usize;
    loop {
        let mut len = [0u8; 4];
        match file.read_exact(&mut len) {
            Ok(()) => {}
            Err(_) => break,
        }
        let mut frame = vec![0u8; u32::from_be_bytes(len) as usize];
        if file.read_exact(&mut frame).is_err() {
            break;
        }
        let change: Change = bincode::deserialize(&frame)
            .map_err(|e| Error::Corrupt(format!("bad journal frame: {e}")))?;
        live.apply(&change);
        replayed += 1;
    }
    if replayed > 0 {
        debug!(path = %path.display(), frames = replayed, "replayed journal");
    }
    Ok(())
}

impl SlateDatabase {
    /// Open a slate directory. `OpenMode::Read` opens read-only (no lock, no
    /// journal replay); every other mode opens for writing and takes the
    /// exclusive lock.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, flags: OpenFlags) -> Result<SlateDatabase> {
        let path = path.as_ref().to_path_buf();
        let writable = mode != OpenMode::Read;

        if !writable {
            if !path.join(SNAPSHOT_FILE).is_file() {
                return Err(io_open_err(
                    &path.join(SNAPSHOT_FILE),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
            let state = load_snapshot(&path)?;
            let index = Index::build(&state.docs);
            return Ok(SlateDatabase {
                inner: SlateInner {
                    path,
                    writable,
                    flags,
                    cell: RwLock::new(Some(Live { state, index })),
                    journal: Mutex::new(None),
                    lock: Mutex::new(None),
                    uncommitted: AtomicBool::new(false),
                },
            });
        }

        let exists = path.join(SNAPSHOT_FILE).is_file();
        match mode {
            OpenMode::Open if !exists => {
                return Err(io_open_err(
                    &path.join(SNAPSHOT_FILE),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
            OpenMode::Create if exists => {
                return Err(io_open_err(
                    &path.join(SNAPSHOT_FILE),
                    std::io::Error::from(std::io::ErrorKind::AlreadyExists),
                ));
            }
            _ => {}
        }
        fs::create_dir_all(&path).map_err(|e| io_open_err(&path, e))?;

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| io_open_err(&lock_path, e))?;
        let locked = if flags.retry_lock {
            lock_file.lock_exclusive().is_ok()
        } else {
            lock_file.try_lock_exclusive().is_ok()
        };
        if !locked {
            return Err(Error::Lock(path.display().to_string()));
        }

        if mode == OpenMode::CreateOrOverwrite {
            let _ = fs::remove_file(path.join(SNAPSHOT_FILE));
            let _ = fs::remove_file(path.join(JOURNAL_FILE));
        }

        let state = load_snapshot(&path)?;
        let mut live = Live { state, index: Index::default() };
        replay_journal(&path, &mut live)?;
        live.index = Index::build(&live.state.docs);

        // Creating a database writes its files right away, so a freshly
        // created (empty) database is already openable by readers and
        // visibly "exists" to other would-be writers.
        if !path.join(SNAPSHOT_FILE).is_file() {
            write_snapshot(&path, &flags, &live.state)?;
        }

        let journal_path = path.join(JOURNAL_FILE);
        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .map_err(|e| io_open_err(&journal_path, e))?;

        // A non-empty journal means a previous writer left uncommitted
        // changes behind; keep them pending so the next commit persists them.
        let pending = fs::metadata(path.join(JOURNAL_FILE)).map(|m| m.len() > 0).unwrap_or(false);

        debug!(path = %path.display(), docs = live.state.docs.len(), "opened slate database for writing");
        Ok(SlateDatabase {
            inner: SlateInner {
                path,
                writable,
                flags,
                cell: RwLock::new(Some(live)),
                journal: Mutex::new(Some(journal)),
                lock: Mutex::new(Some(lock_file)),
                uncommitted: AtomicBool::new(pending),
            },
        })
    }

    /// True if `path` looks like a slate database directory.
    pub fn detect(path: &Path) -> bool {
        path.join(SNAPSHOT_FILE).is_file() || path.join(JOURNAL_FILE).is_file()
    }

    fn with_live<T>(&self, f: impl FnOnce(&Live) -> Result<T>) -> Result<T> {
        let guard = self.inner.cell.read();
        match guard.as_ref() {
            Some(live) => f(live),
            None => Err(Error::Closed),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.inner.writable {
            Ok(())
        } else {
            Err(Error::Unavailable("database was opened read-only"))
        }
    }

    /// Apply a mutation to the live state and append it to the journal.
    fn mutate(&self, change: Change) -> Result<()> {
        self.check_writable()?;
        let mut guard = self.inner.cell.write();
        let live = guard.as_mut().ok_or(Error::Closed)?;
        let frame = bincode::serialize(&change)
            .map_err(|e| Error::Corrupt(format!("unencodable change: {e}")))?;
        {
            let mut journal = self.inner.journal.lock();
            let journal = journal.as_mut().ok_or(Error::Closed)?;
            journal
                .write_all(&(frame.len() as u32).to_be_bytes())
                .and_then(|_| journal.write_all(&frame))
                .map_err(|e| Error::Corrupt(format!("journal append failed: {e}")))?;
        }
        live.apply(&change);
        self.inner.uncommitted.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn validate_doc(doc: &Document) -> Result<()> {
        for (term, _) in doc.postings() {
            if term.is_empty() || term.len() > MAX_TERM_LEN {
                return Err(Error::InvalidArgument("term must be 1..=255 bytes"));
            }
        }
        Ok(())
    }

    fn posting_data(live: &Live, term: &[u8]) -> Vec<PostingData> {
        let Some(entries) = live.index.postings.get(term) else {
            return Vec::new();
        };
        entries
            .iter()
            .map(|(docid, wdf)| {
                let doc = &live.state.docs[docid];
                PostingData {
                    docid: *docid,
                    wdf: *wdf,
                    doc_length: doc.length(),
                    unique_terms: doc.unique_terms(),
                    positions: doc.posting(term).map(|p| p.positions.clone()).unwrap_or_default(),
                }
            })
            .collect()
    }
}

impl Backend for SlateDatabase {
    fn stats(&self) -> Result<BackendStats> {
        self.with_live(|live| {
            let doclens = live.state.docs.values().map(Document::length);
            Ok(BackendStats {
                uuid: live.state.uuid.clone(),
                doccount: live.state.docs.len() as DocCount,
                lastdocid: live.state.lastdocid,
                total_doclen: live.state.docs.values().map(|d| d.length() as u64).sum(),
                doclen_lower_bound: doclens.clone().min().unwrap_or(0),
                doclen_upper_bound: doclens.max().unwrap_or(0),
                has_positions: live.state.docs.values().any(Document::has_positions),
            })
        })
    }

    fn postings(&self, term: &[u8]) -> Result<Box<dyn PostingCursor>> {
        self.with_live(|live| {
            let entries = Self::posting_data(live, term);
            let termfreq = entries.len() as DocCount;
            Ok(Box::new(MaterializedPostings::new(entries, termfreq)) as Box<dyn PostingCursor>)
        })
    }

    fn termlist(&self, docid: DocId) -> Result<Box<dyn TermCursor>> {
        self.with_live(|live| {
            let doc =
                live.state.docs.get(&docid).ok_or(Error::InvalidArgument("no such document"))?;
            let entries = doc
                .postings()
                .map(|(term, posting)| TermData {
                    term: term.to_vec(),
                    wdf: Some(posting.wdf),
                    termfreq: Some(
                        live.index.postings.get(term).map_or(0, |e| e.len() as DocCount),
                    ),
                })
                .collect();
            Ok(Box::new(MaterializedTerms::new(entries)) as Box<dyn TermCursor>)
        })
    }

    fn positions(&self, docid: DocId, term: &[u8]) -> Result<Box<dyn PositionCursor>> {
        self.with_live(|live| {
            let doc =
                live.state.docs.get(&docid).ok_or(Error::InvalidArgument("no such document"))?;
            let posting =
                doc.posting(term).ok_or(Error::InvalidArgument("term does not index that document"))?;
            Ok(Box::new(MaterializedPositions::new(posting.positions.clone()))
                as Box<dyn PositionCursor>)
        })
    }

    fn allterms(&self, prefix: &[u8]) -> Result<Box<dyn TermCursor>> {
        self.with_live(|live| {
            let entries = live
                .index
                .postings
                .range(prefix.to_vec()..)
                .take_while(|(term, _)| term.starts_with(prefix))
                .map(|(term, entry)| TermData {
                    term: term.clone(),
                    wdf: None,
                    termfreq: Some(entry.len() as DocCount),
                })
                .collect();
            Ok(Box::new(MaterializedTerms::new(entries)) as Box<dyn TermCursor>)
        })
    }

    fn document(&self, docid: DocId) -> Result<Document> {
        self.with_live(|live| {
            live.state.docs.get(&docid).cloned().ok_or(Error::InvalidArgument("no such document"))
        })
    }

    fn termfreq(&self, term: &[u8]) -> Result<DocCount> {
        self.with_live(|live| {
            Ok(live.index.postings.get(term).map_or(0, |e| e.len() as DocCount))
        })
    }

    fn collection_freq(&self, term: &[u8]) -> Result<u64> {
        self.with_live(|live| {
            Ok(live
                .index
                .postings
                .get(term)
                .map_or(0, |e| e.values().map(|wdf| *wdf as u64).sum()))
        })
    }

    fn term_exists(&self, term: &[u8]) -> Result<bool> {
        self.with_live(|live| Ok(live.index.postings.contains_key(term)))
    }

    fn value_freq(&self, slot: ValueSlot) -> Result<DocCount> {
        self.with_live(|live| {
            Ok(live.state.docs.values().filter(|d| d.value(slot).is_some()).count() as DocCount)
        })
    }

    fn value_lower_bound(&self, slot: ValueSlot) -> Result<Vec<u8>> {
        self.with_live(|live| {
            Ok(live
                .state
                .docs
                .values()
                .filter_map(|d| d.value(slot))
                .min()
                .map(<[u8]>::to_vec)
                .unwrap_or_default())
        })
    }

    fn value_upper_bound(&self, slot: ValueSlot) -> Result<Vec<u8>> {
        self.with_live(|live| {
            Ok(live
                .state
                .docs
                .values()
                .filter_map(|d| d.value(slot))
                .max()
                .map(<[u8]>::to_vec)
                .unwrap_or_default())
        })
    }

    fn valuestream(&self, slot: ValueSlot) -> Result<Box<dyn ValueCursor>> {
        self.with_live(|live| {
            let entries = live
                .state
                .docs
                .iter()
                .filter_map(|(docid, doc)| doc.value(slot).map(|v| (*docid, v.to_vec())))
                .collect();
            Ok(Box::new(MaterializedValues::new(entries)) as Box<dyn ValueCursor>)
        })
    }

    fn doc_length(&self, docid: DocId) -> Result<TermCount> {
        self.with_live(|live| {
            live.state
                .docs
                .get(&docid)
                .map(Document::length)
                .ok_or(Error::InvalidArgument("no such document"))
        })
    }

    fn unique_terms(&self, docid: DocId) -> Result<TermCount> {
        self.with_live(|live| {
            live.state
                .docs
                .get(&docid)
                .map(Document::unique_terms)
                .ok_or(Error::InvalidArgument("no such document"))
        })
    }

    fn wdf_upper_bound(&self, term: &[u8]) -> Result<TermCount> {
        self.with_live(|live| {
            Ok(live.index.postings.get(term).map_or(0, |e| e.values().copied().max().unwrap_or(0)))
        })
    }

    fn metadata(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_live(|live| Ok(live.state.metadata.get(key).cloned()))
    }

    fn metadata_keys(&self, prefix: &[u8]) -> Result<Box<dyn TermCursor>> {
        self.with_live(|live| {
            let entries = live
                .state
                .metadata
                .range(prefix.to_vec()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, _)| TermData { term: key.clone(), wdf: None, termfreq: None })
                .collect();
            Ok(Box::new(MaterializedTerms::new(entries)) as Box<dyn TermCursor>)
        })
    }

    fn spellings(&self) -> Result<Box<dyn TermCursor>> {
        self.with_live(|live| {
            let entries = live
                .state
                .spelling
                .iter()
                .map(|(word, freq)| TermData {
                    term: word.clone(),
                    wdf: None,
                    termfreq: Some(*freq),
                })
                .collect();
            Ok(Box::new(MaterializedTerms::new(entries)) as Box<dyn TermCursor>)
        })
    }

    fn spelling_suggestion(&self, word: &[u8], max_edit_distance: u32) -> Result<Option<Vec<u8>>> {
        self.with_live(|live| {
            Ok(crate::spelling::best_suggestion(
                word,
                max_edit_distance,
                live.state.spelling.iter().map(|(w, f)| (w.as_slice(), *f)),
            ))
        })
    }

    fn synonyms(&self, term: &[u8]) -> Result<Box<dyn TermCursor>> {
        self.with_live(|live| {
            let entries = live
                .state
                .synonyms
                .get(term)
                .map(|set| {
                    set.iter()
                        .map(|s| TermData { term: s.clone(), wdf: None, termfreq: None })
                        .collect()
                })
                .unwrap_or_default();
            Ok(Box::new(MaterializedTerms::new(entries)) as Box<dyn TermCursor>)
        })
    }

    fn synonym_keys(&self, prefix: &[u8]) -> Result<Box<dyn TermCursor>> {
        self.with_live(|live| {
            let entries = live
                .state
                .synonyms
                .range(prefix.to_vec()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, _)| TermData { term: key.clone(), wdf: None, termfreq: None })
                .collect();
            Ok(Box::new(MaterializedTerms::new(entries)) as Box<dyn TermCursor>)
        })
    }

    fn reopen(&self) -> Result<()> {
        let mut guard = self.inner.cell.write();
        if guard.is_none() {
            return Err(Error::Closed);
        }
        if self.inner.writable {
            // A writer already sees its own state; nothing newer can exist.
            return Ok(());
        }
        let state = load_snapshot(&self.inner.path)?;
        let index = Index::build(&state.docs);
        *guard = Some(Live { state, index });
        Ok(())
    }

    fn close(&self) {
        let live = self.inner.cell.write().take();
        if live.is_some() {
            debug!(path = %self.inner.path.display(), "closed slate database");
        }
        drop(live);
        drop(self.inner.journal.lock().take());
        let lock = self.inner.lock.lock().take();
        if let Some(lock) = &lock {
            let _ = fs2::FileExt::unlock(lock);
        }
        drop(lock);
    }

    fn is_closed(&self) -> bool {
        self.inner.cell.read().is_none()
    }

    fn description(&self) -> String {
        format!("slate:{}", self.inner.path.display())
    }
}

impl WritableBackend for SlateDatabase {
    fn add_document(&self, doc: &Document) -> Result<DocId> {
        Self::validate_doc(doc)?;
        let docid = self.with_live(|live| Ok(live.state.lastdocid + 1))?;
        self.mutate(Change::Put { docid, doc: doc.clone() })?;
        Ok(docid)
    }

    fn delete_document(&self, docid: DocId) -> Result<()> {
        self.with_live(|live| {
            if !live.state.docs.contains_key(&docid) {
                return Err(Error::InvalidArgument("no such document"));
            }
            Ok(())
        })?;
        self.mutate(Change::Delete { docid })
    }

    fn replace_document(&self, docid: DocId, doc: &Document) -> Result<()> {
        if docid == 0 {
            return Err(Error::InvalidArgument("docid must be positive"));
        }
        Self::validate_doc(doc)?;
        self.mutate(Change::Put { docid, doc: doc.clone() })
    }

    fn replace_document_by_term(&self, term: &[u8], doc: &Document) -> Result<DocId> {
        if term.is_empty() || term.len() > MAX_TERM_LEN {
            return Err(Error::InvalidArgument("term must be 1..=255 bytes"));
        }
        Self::validate_doc(doc)?;
        let matched: Vec<DocId> = self.with_live(|live| {
            Ok(live.index.postings.get(term).map(|e| e.keys().copied().collect()).unwrap_or_default())
        })?;
        match matched.split_first() {
            None => self.add_document(doc),
            Some((first, rest)) => {
                self.mutate(Change::Put { docid: *first, doc: doc.clone() })?;
                for docid in rest {
                    self.mutate(Change::Delete { docid: *docid })?;
                }
                Ok(*first)
            }
        }
    }

    fn commit(&self) -> Result<()> {
        self.check_writable()?;
        let guard = self.inner.cell.read();
        let live = guard.as_ref().ok_or(Error::Closed)?;
        if !self.inner.uncommitted.load(Ordering::Relaxed) {
            return Ok(());
        }
        write_snapshot(&self.inner.path, &self.inner.flags, &live.state)?;
        {
            let mut journal = self.inner.journal.lock();
            let journal = journal.as_mut().ok_or(Error::Closed)?;
            journal
                .set_len(0)
                .map_err(|e| Error::Corrupt(format!("journal truncate failed: {e}")))?;
        }
        self.inner.uncommitted.store(false, Ordering::Relaxed);
        debug!(path = %self.inner.path.display(), docs = live.state.docs.len(), "committed");
        Ok(())
    }

    fn discard(&self) -> Result<()> {
        self.check_writable()?;
        let mut guard = self.inner.cell.write();
        let Some(live) = guard.as_ref() else {
            return Err(Error::Closed);
        };
        // With nothing committed yet there is no snapshot to fall back to;
        // the database identity still has to survive the rollback.
        let mut state = load_snapshot(&self.inner.path)?;
        if !self.inner.path.join(SNAPSHOT_FILE).is_file() {
            state.uuid = live.state.uuid.clone();
        }
        let index = Index::build(&state.docs);
        *guard = Some(Live { state, index });
        {
            let mut journal = self.inner.journal.lock();
            let journal = journal.as_mut().ok_or(Error::Closed)?;
            journal
                .set_len(0)
                .map_err(|e| Error::Corrupt(format!("journal truncate failed: {e}")))?;
        }
        self.inner.uncommitted.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn has_uncommitted(&self) -> bool {
        self.inner.uncommitted.load(Ordering::Relaxed)
    }

    fn add_spelling(&self, word: &[u8], freq_inc: DocCount) -> Result<()> {
        if word.is_empty() {
            return Err(Error::InvalidArgument("word must not be empty"));
        }
        self.mutate(Change::AddSpelling { word: word.to_vec(), freq: freq_inc })
    }

    fn remove_spelling(&self, word: &[u8], freq_dec: DocCount) -> Result<()> {
        self.mutate(Change::RemoveSpelling { word: word.to_vec(), freq: freq_dec })
    }

    fn add_synonym(&self, term: &[u8], synonym: &[u8]) -> Result<()> {
        if term.is_empty() || synonym.is_empty() {
            return Err(Error::InvalidArgument("term and synonym must not be empty"));
        }
        self.mutate(Change::AddSynonym { term: term.to_vec(), synonym: synonym.to_vec() })
    }

    fn remove_synonym(&self, term: &[u8], synonym: &[u8]) -> Result<()> {
        self.mutate(Change::RemoveSynonym { term: term.to_vec(), synonym: synonym.to_vec() })
    }

    fn clear_synonyms(&self, term: &[u8]) -> Result<()> {
        self.mutate(Change::ClearSynonyms { term: term.to_vec() })
    }

    fn set_metadata(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("metadata key must not be empty"));
        }
        self.mutate(Change::SetMetadata { key: key.to_vec(), value: value.to_vec() })
    }
}
