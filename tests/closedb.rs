//! Closing a database: iterator validity, lock release, implicit commit,
//! and transaction behavior across close().

mod common;

use quern::{
    Database, Document, Error, OpenFlags, OpenMode, PostingCursor, PositionCursor, TermCursor,
    WritableDatabase,
};
use tempfile::TempDir;

/// Run `$op`; count a `Closed` failure, assert anything else succeeded.
macro_rules! count_closed {
    ($count:expr, $op:expr) => {
        match $op {
            Ok(value) => Some(value),
            Err(Error::Closed) => {
                $count += 1;
                None
            }
            Err(e) => panic!("expected success or Closed, got {e}"),
        }
    };
}

struct Cursors {
    pl1: Box<dyn PostingCursor>,
    pl2: Box<dyn PostingCursor>,
    pl1end: Box<dyn PostingCursor>,
    pl2end: Box<dyn PostingCursor>,
    tl1: Box<dyn TermCursor>,
    tlend: Box<dyn TermCursor>,
    atl1: Box<dyn TermCursor>,
    atlend: Box<dyn TermCursor>,
    pil1: Box<dyn PositionCursor>,
    pilend: Box<dyn PositionCursor>,
}

fn setup(db: &Database) -> Cursors {
    let mut pl2 = db.postlist_begin("this").unwrap();
    pl2.advance().unwrap(); // skip the first entry
    Cursors {
        pl1: db.postlist_begin("paragraph").unwrap(),
        pl2,
        pl1end: db.postlist_end("paragraph"),
        pl2end: db.postlist_end("this"),
        tl1: db.termlist_begin(1).unwrap(),
        tlend: db.termlist_end(1),
        atl1: db.allterms_begin("t").unwrap(),
        atlend: db.allterms_end("t"),
        pil1: db.positionlist_begin(1, "paragraph").unwrap(),
        pilend: db.positionlist_end(1, "paragraph"),
    }
}

/// The closedb assertion battery. Returns how many operations failed with
/// `Closed`; on an open handle that must be zero, and each value produced
/// must be the correct one whether or not the handle has been closed.
fn perform(db: &Database, c: &mut Cursors) -> usize {
    let mut closed = 0;

    if let Some(doc) = count_closed!(closed, db.get_document(1)) {
        assert_eq!(&doc.data()[..33], b"This is a test document used with");
    }

    // Operations that need a fresh backend read.
    count_closed!(closed, db.postlist_begin("paragraph"));
    count_closed!(closed, db.termlist_begin(1));
    count_closed!(closed, db.positionlist_begin(1, "paragraph"));
    count_closed!(closed, db.allterms_begin(""));
    count_closed!(closed, db.allterms_begin("p"));
    if let Some(freq) = count_closed!(closed, db.get_termfreq("paragraph")) {
        assert_eq!(freq, 2);
    }
    if let Some(freq) = count_closed!(closed, db.get_collection_freq("paragraph")) {
        assert_eq!(freq, 5);
    }
    if let Some(exists) = count_closed!(closed, db.term_exists("paragraph")) {
        assert!(exists);
    }
    if let Some(freq) = count_closed!(closed, db.get_value_freq(1)) {
        assert_eq!(freq, 2);
    }
    if let Some(lb) = count_closed!(closed, db.get_value_lower_bound(1)) {
        assert_eq!(lb, b"v1-one");
    }
    if let Some(ub) = count_closed!(closed, db.get_value_upper_bound(1)) {
        assert_eq!(ub, b"v1-two");
    }
    count_closed!(closed, db.valuestream_begin(1));
    if let Some(len) = count_closed!(closed, db.get_doclength(1)) {
        assert_eq!(len, 28);
    }
    if let Some(unique) = count_closed!(closed, db.get_unique_terms(1)) {
        assert_eq!(unique, 21);
    }
    count_closed!(closed, db.reopen());

    // End sentinels stay valid and distinguishable from positioned peers.
    assert!(!c.pl1.at_end());
    assert!(c.pl1end.at_end());
    assert!(!c.pl2.at_end());
    assert!(c.pl2end.at_end());
    assert!(!c.tl1.at_end());
    assert!(c.tlend.at_end());
    assert!(!c.atl1.at_end());
    assert!(c.atlend.at_end());
    assert!(!c.pil1.at_end());
    assert!(c.pilend.at_end());

    // Accessors on already-positioned cursors either answer correctly from
    // cached data or report the closed handle.
    if let Some(docid) = count_closed!(closed, c.pl1.docid()) {
        assert_eq!(docid, 1);
    }
    if let Some(len) = count_closed!(closed, c.pl1.doc_length()) {
        assert_eq!(len, 28);
    }
    if let Some(unique) = count_closed!(closed, c.pl1.unique_terms()) {
        assert_eq!(unique, 21);
    }

    if let Some(docid) = count_closed!(closed, c.pl2.docid()) {
        assert_eq!(docid, 2);
    }
    if let Some(len) = count_closed!(closed, c.pl2.doc_length()) {
        assert_eq!(len, 81);
    }
    if let Some(unique) = count_closed!(closed, c.pl2.unique_terms()) {
        assert_eq!(unique, 56);
    }

    if let Some(term) = count_closed!(closed, c.tl1.term().map(<[u8]>::to_vec)) {
        assert_eq!(term, b"a");
    }
    if let Some(wdf) = count_closed!(closed, c.tl1.wdf()) {
        assert_eq!(wdf, 2);
    }
    if let Some(freq) = count_closed!(closed, c.tl1.termfreq()) {
        assert_eq!(freq, 3);
    }

    if let Some(term) = count_closed!(closed, c.atl1.term().map(<[u8]>::to_vec)) {
        assert_eq!(term, b"test");
    }
    if let Some(freq) = count_closed!(closed, c.atl1.termfreq()) {
        assert_eq!(freq, 1);
    }

    if let Some(pos) = count_closed!(closed, c.pil1.position()) {
        assert_eq!(pos, 12);
    }

    // Advancing may fail on a closed handle, but a successful advance must
    // land on the correct next entry.
    if count_closed!(closed, c.pl1.advance()).is_some() {
        if let Some(docid) = count_closed!(closed, c.pl1.docid()) {
            assert_eq!(docid, 2);
        }
        if let Some(len) = count_closed!(closed, c.pl1.doc_length()) {
            assert_eq!(len, 81);
        }
        if let Some(unique) = count_closed!(closed, c.pl1.unique_terms()) {
            assert_eq!(unique, 56);
        }
    }

    if count_closed!(closed, c.pl2.advance()).is_some() {
        if let Some(docid) = count_closed!(closed, c.pl2.docid()) {
            assert_eq!(docid, 3);
        }
        if let Some(len) = count_closed!(closed, c.pl2.doc_length()) {
            assert_eq!(len, 15);
        }
        if let Some(unique) = count_closed!(closed, c.pl2.unique_terms()) {
            assert_eq!(unique, 14);
        }
    }

    if count_closed!(closed, c.tl1.advance()).is_some() {
        if let Some(term) = count_closed!(closed, c.tl1.term().map(<[u8]>::to_vec)) {
            assert_eq!(term, b"api");
        }
        if let Some(wdf) = count_closed!(closed, c.tl1.wdf()) {
            assert_eq!(wdf, 1);
        }
        if let Some(freq) = count_closed!(closed, c.tl1.termfreq()) {
            assert_eq!(freq, 1);
        }
    }

    if count_closed!(closed, c.atl1.advance()).is_some() {
        if let Some(term) = count_closed!(closed, c.atl1.term().map(<[u8]>::to_vec)) {
            assert_eq!(term, b"that");
        }
        if let Some(freq) = count_closed!(closed, c.atl1.termfreq()) {
            assert_eq!(freq, 2);
        }
    }

    if count_closed!(closed, c.pil1.advance()).is_some() {
        if let Some(pos) = count_closed!(closed, c.pil1.position()) {
            assert_eq!(pos, 28);
        }
    }

    closed
}

#[test]
fn close_invalidates_backend_reads_but_not_cached_cursor_data() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let db = Database::open(dir.path()).unwrap();

    // On the open handle everything answers, with the right values.
    let mut cursors = setup(&db);
    assert_eq!(perform(&db, &mut cursors), 0);

    // Fresh cursors, then close underneath them.
    let mut cursors = setup(&db);
    db.close();

    // Dup stdout onto the freed descriptor numbers: if the backend still
    // used its old fds, the assertions below would read from the dups.
    let mut fds = Vec::new();
    for _ in 0..6 {
        let fd = unsafe { libc::dup(1) };
        assert!(fd >= 0);
        fds.push(fd);
    }

    assert!(matches!(db.reopen(), Err(Error::Closed)));

    let closed = perform(&db, &mut cursors);
    assert!(closed > 0, "a closed handle must refuse at least one operation");

    assert!(!db.get_description().is_empty());

    // Closing again is a no-op.
    db.close();

    for fd in fds {
        unsafe { libc::close(fd) };
    }
}

#[test]
fn cached_statistics_survive_close_on_a_reader() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let db = Database::open(dir.path()).unwrap();

    let uuid = db.get_uuid();
    let doccount = db.get_doccount();
    let lastdocid = db.get_lastdocid();
    let avlength = db.get_avlength();
    assert_eq!(doccount, 3);
    assert_eq!(lastdocid, 3);
    assert!(db.has_positions());
    assert!((avlength - (28.0 + 81.0 + 15.0) / 3.0).abs() < 1e-9);

    db.close();

    assert_eq!(db.get_uuid(), uuid);
    assert_eq!(db.get_doccount(), doccount);
    assert_eq!(db.get_lastdocid(), lastdocid);
    assert!(db.has_positions());
    assert!(db.get_doclength_lower_bound() <= 15);
    assert!(db.get_doclength_upper_bound() >= 81);
    // keep_alive is a no-op for a local backend, closed or not.
    db.keep_alive().unwrap();
}

#[test]
fn closing_a_writer_releases_the_lock() {
    let dir = TempDir::new().unwrap();
    let w1 =
        WritableDatabase::open(dir.path(), OpenMode::CreateOrOpen, OpenFlags::default()).unwrap();

    match WritableDatabase::open(dir.path(), OpenMode::Open, OpenFlags::default()) {
        Err(Error::Lock(_)) => {}
        other => panic!("second writer should hit the lock, got {other:?}", other = other.err()),
    }

    w1.close().unwrap();

    let w2 =
        WritableDatabase::open(dir.path(), OpenMode::Open, OpenFlags::default()).unwrap();
    assert!(matches!(w1.postlist_begin("paragraph"), Err(Error::Closed)));
    let pl = w2.postlist_begin("paragraph").unwrap();
    assert!(pl.at_end());
}

#[test]
fn close_implicitly_commits_outside_a_transaction() {
    let dir = TempDir::new().unwrap();
    let w =
        WritableDatabase::open(dir.path(), OpenMode::CreateOrOpen, OpenFlags::default()).unwrap();
    w.add_document(&Document::new()).unwrap();
    assert_eq!(w.get_doccount().unwrap(), 1);
    w.close().unwrap();

    let db = Database::open(dir.path()).unwrap();
    assert_eq!(db.get_doccount(), 1);
}

#[test]
fn close_discards_an_active_transaction() {
    for flush_on_commit in [true, false] {
        let dir = TempDir::new().unwrap();
        let w = WritableDatabase::open(dir.path(), OpenMode::CreateOrOpen, OpenFlags::default())
            .unwrap();
        w.begin_transaction(flush_on_commit).unwrap();
        w.add_document(&Document::new()).unwrap();
        assert_eq!(w.get_doccount().unwrap(), 1);
        w.close().unwrap();

        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.get_doccount(), 0);
    }
}

#[test]
fn transaction_calls_after_close() {
    let dir = TempDir::new().unwrap();
    let w =
        WritableDatabase::open(dir.path(), OpenMode::CreateOrOpen, OpenFlags::default()).unwrap();
    w.close().unwrap();

    // No transaction is active, closed or not.
    assert!(matches!(w.commit_transaction(), Err(Error::InvalidOperation(_))));
    assert!(matches!(w.cancel_transaction(), Err(Error::InvalidOperation(_))));

    // Entering a transaction is a state-only change, so it may succeed; an
    // empty transaction can then be left without backend involvement.
    match w.begin_transaction(true) {
        Ok(()) => match w.commit_transaction() {
            Ok(()) | Err(Error::Closed) => {}
            Err(e) => panic!("unexpected error: {e}"),
        },
        Err(Error::Closed) => {}
        Err(e) => panic!("unexpected error: {e}"),
    }

    match w.begin_transaction(true) {
        Ok(()) => match w.cancel_transaction() {
            Ok(()) | Err(Error::Closed) => {}
            Err(e) => panic!("unexpected error: {e}"),
        },
        Err(Error::Closed) => {}
        Err(e) => panic!("unexpected error: {e}"),
    }
}

#[test]
fn mutations_fail_after_close() {
    let dir = TempDir::new().unwrap();
    let w =
        WritableDatabase::open(dir.path(), OpenMode::CreateOrOpen, OpenFlags::default()).unwrap();
    w.add_document(&Document::new()).unwrap();
    w.close().unwrap();

    // Everything was already flushed by close, so commit has nothing to do;
    // it is allowed to succeed or to report the closed handle.
    match w.commit() {
        Ok(()) | Err(Error::Closed) => {}
        Err(e) => panic!("unexpected error: {e}"),
    }

    assert!(matches!(w.add_document(&Document::new()), Err(Error::Closed)));
    assert!(matches!(w.delete_document(1), Err(Error::Closed)));
    assert!(matches!(w.replace_document(1, &Document::new()), Err(Error::Closed)));
    assert!(matches!(w.replace_document(2, &Document::new()), Err(Error::Closed)));
    assert!(matches!(
        w.replace_document_by_term("Qi", &Document::new()),
        Err(Error::Closed)
    ));
}

#[test]
fn spelling_api_fails_after_close() {
    let dir = TempDir::new().unwrap();
    let w =
        WritableDatabase::open(dir.path(), OpenMode::CreateOrOpen, OpenFlags::default()).unwrap();
    w.add_spelling("pneumatic", 1).unwrap();
    w.add_spelling("pneumonia", 1).unwrap();
    w.close().unwrap();

    assert!(matches!(w.add_spelling("penmanship", 1), Err(Error::Closed)));
    assert!(matches!(w.remove_spelling("pneumatic", 1), Err(Error::Closed)));
    assert!(matches!(w.get_spelling_suggestion("newmonia", 2), Err(Error::Closed)));
    assert!(matches!(w.spellings_begin(), Err(Error::Closed)));
}

#[test]
fn synonym_api_fails_after_close() {
    let dir = TempDir::new().unwrap();
    let w =
        WritableDatabase::open(dir.path(), OpenMode::CreateOrOpen, OpenFlags::default()).unwrap();
    w.add_synonym("color", "colour").unwrap();
    w.add_synonym("honor", "honour").unwrap();
    w.close().unwrap();

    assert!(matches!(w.add_synonym("behavior", "behaviour"), Err(Error::Closed)));
    assert!(matches!(w.remove_synonym("honor", "honour"), Err(Error::Closed)));
    assert!(matches!(w.clear_synonyms("honor"), Err(Error::Closed)));
    assert!(matches!(w.synonyms_begin("color"), Err(Error::Closed)));
    assert!(matches!(w.synonym_keys_begin(""), Err(Error::Closed)));
}

#[test]
fn metadata_api_fails_after_close() {
    let dir = TempDir::new().unwrap();
    let w =
        WritableDatabase::open(dir.path(), OpenMode::CreateOrOpen, OpenFlags::default()).unwrap();
    w.set_metadata("foo", "FOO").unwrap();
    w.set_metadata("bar", "BAR").unwrap();
    w.close().unwrap();

    assert!(matches!(w.set_metadata("test", "TEST"), Err(Error::Closed)));
    assert!(matches!(w.get_metadata("foo"), Err(Error::Closed)));
    assert!(matches!(w.get_metadata("bar"), Err(Error::Closed)));
    assert!(matches!(w.metadata_keys_begin(""), Err(Error::Closed)));
}
