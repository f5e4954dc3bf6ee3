//! The TCP server and the remote client's failure semantics.

mod common;

use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use quern::remote::server::serve_connection;
use quern::{
    Database, Document, Error, PostingCursor, PositionCursor, RemoteOptions, SearchServer,
    TcpServer, TermCursor, ValueCursor, WritableDatabase,
};
use tempfile::TempDir;

fn start_server(path: &Path, writable: bool) -> RemoteOptions {
    let handler = Arc::new(SearchServer::new(path, writable));
    let server = TcpServer::bind("127.0.0.1", 0, true, false, handler).unwrap();
    let addr = server.local_addr().unwrap();
    thread::spawn(move || {
        let _ = server.run();
    });
    let mut opts = RemoteOptions::new("127.0.0.1", addr.port());
    opts.timeout = Some(Duration::from_secs(10));
    opts.connect_timeout = Some(Duration::from_secs(10));
    opts
}

/// Accept one connection, serve it on a worker thread, and hand back a
/// duplicate of the server-side socket so the test can sever it.
fn start_killable_server(path: PathBuf, writable: bool) -> (RemoteOptions, mpsc::Receiver<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        tx.send(stream.try_clone().unwrap()).unwrap();
        let _ = serve_connection(stream, &path, writable);
    });
    let mut opts = RemoteOptions::new("127.0.0.1", port);
    opts.timeout = Some(Duration::from_secs(10));
    (opts, rx)
}

#[test]
fn remote_reader_round_trip() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let opts = start_server(dir.path(), false);

    let db = Database::open_remote(opts).unwrap();
    assert_eq!(db.get_doccount(), 3);
    assert_eq!(db.get_lastdocid(), 3);
    assert!(db.has_positions());
    assert!(!db.get_uuid().is_empty());

    let mut pl = db.postlist_begin("paragraph").unwrap();
    assert_eq!(pl.termfreq(), 2);
    assert_eq!(pl.docid().unwrap(), 1);
    assert_eq!(pl.doc_length().unwrap(), 28);
    assert_eq!(pl.unique_terms().unwrap(), 21);
    let mut pil = pl.positions().unwrap();
    pil.advance().unwrap();
    assert_eq!(pil.position().unwrap(), 12);
    pl.advance().unwrap();
    assert_eq!(pl.docid().unwrap(), 2);
    pl.advance().unwrap();
    assert!(pl.at_end());

    let mut tl = db.termlist_begin(1).unwrap();
    assert_eq!(tl.term().unwrap(), b"a");
    assert_eq!(tl.wdf().unwrap(), 2);
    assert_eq!(tl.termfreq().unwrap(), 3);
    tl.advance().unwrap();
    assert_eq!(tl.term().unwrap(), b"api");

    let mut at = db.allterms_begin("t").unwrap();
    let mut terms = Vec::new();
    while !at.at_end() {
        terms.push(at.term().unwrap().to_vec());
        at.advance().unwrap();
    }
    assert_eq!(terms, [&b"test"[..], b"that", b"the", b"this"]);

    let doc = db.get_document(1).unwrap();
    assert_eq!(&doc.data()[..33], b"This is a test document used with");

    assert_eq!(db.get_termfreq("this").unwrap(), 3);
    assert_eq!(db.get_collection_freq("this").unwrap(), 8);
    assert_eq!(db.get_value_freq(1).unwrap(), 2);
    assert_eq!(db.get_value_lower_bound(1).unwrap(), b"v1-one");

    let mut vs = db.valuestream_begin(1).unwrap();
    assert_eq!(vs.docid().unwrap(), 1);
    vs.advance().unwrap();
    assert_eq!(vs.value().unwrap(), b"v1-two");

    db.keep_alive().unwrap();
    db.reopen().unwrap();
    db.close();
    assert!(matches!(db.keep_alive(), Err(Error::Closed)));
    assert!(matches!(db.postlist_begin("paragraph"), Err(Error::Closed)));
    assert!(!db.get_description().is_empty());
}

#[test]
fn remote_cursors_fetch_in_chunks() {
    let dir = TempDir::new().unwrap();
    common::build_da_bulk(dir.path(), "common", 50);
    let opts = start_server(dir.path(), false);

    let db = Database::open_remote(opts).unwrap();
    let mut pl = db.postlist_begin("common").unwrap();
    assert_eq!(pl.termfreq(), 50);
    let mut expected = 1;
    while !pl.at_end() {
        assert_eq!(pl.docid().unwrap(), expected);
        expected += 1;
        pl.advance().unwrap();
    }
    assert_eq!(expected, 51);

    let mut pl = db.postlist_begin("common").unwrap();
    pl.skip_to(44, 0.0).unwrap();
    assert_eq!(pl.docid().unwrap(), 44);

    // 51 distinct terms forces the dictionary across chunks too.
    let mut at = db.allterms_begin("").unwrap();
    let mut count = 0;
    let mut last = Vec::new();
    while !at.at_end() {
        let term = at.term().unwrap().to_vec();
        assert!(term > last);
        last = term;
        count += 1;
        at.advance().unwrap();
    }
    assert_eq!(count, 51);
}

#[test]
fn remote_writer_round_trip() {
    let dir = TempDir::new().unwrap();
    let opts = start_server(dir.path(), true);

    let w = WritableDatabase::open_remote(opts).unwrap();
    let mut doc = Document::new();
    doc.set_data("remote doc");
    doc.add_posting("remote", 1, 1);
    assert_eq!(w.add_document(&doc).unwrap(), 1);
    assert_eq!(w.get_doccount().unwrap(), 1);
    w.commit().unwrap();

    w.set_metadata("origin", "over the wire").unwrap();
    assert_eq!(w.get_metadata("origin").unwrap(), b"over the wire");

    w.add_synonym("remote", "distant").unwrap();
    let syn = w.synonyms_begin("remote").unwrap();
    assert_eq!(syn.term().unwrap(), b"distant");

    w.add_spelling("remote", 3).unwrap();
    assert_eq!(w.get_spelling_suggestion("remot", 2).unwrap().unwrap(), b"remote");

    assert!(w.term_exists("remote").unwrap());
    assert_eq!(w.get_document(1).unwrap().data(), b"remote doc");

    // close flushes the side-channel changes too.
    w.close().unwrap();

    let db = Database::open(dir.path()).unwrap();
    assert_eq!(db.get_doccount(), 1);
    assert_eq!(db.get_metadata("origin").unwrap(), b"over the wire");
}

#[test]
fn run_once_serves_exactly_one_connection() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let handler = Arc::new(SearchServer::new(dir.path(), false));
    let server = TcpServer::bind("127.0.0.1", 0, false, true, handler).unwrap();
    let port = server.local_addr().unwrap().port();
    let served = thread::spawn(move || server.run_once());

    let db = Database::open_remote(RemoteOptions::new("127.0.0.1", port)).unwrap();
    assert_eq!(db.get_doccount(), 3);
    db.close();

    served.join().unwrap().unwrap();
}

#[test]
fn peer_death_latches_the_reader_connection() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let (opts, rx) = start_killable_server(dir.path().to_path_buf(), false);

    let db = Database::open_remote(opts).unwrap();
    let uuid = db.get_uuid();
    assert!(!uuid.is_empty());

    // Cursors created while the peer was alive keep their buffered data.
    let mut pl = db.postlist_begin("paragraph").unwrap();
    assert_eq!(pl.docid().unwrap(), 1);

    let killer = rx.recv().unwrap();
    killer.shutdown(Shutdown::Both).unwrap();

    assert!(matches!(db.keep_alive(), Err(Error::Network(_))));
    // Cached statistics stay readable.
    assert_eq!(db.get_uuid(), uuid);
    assert_eq!(db.get_doccount(), 3);

    assert!(matches!(db.postlist_begin("paragraph"), Err(Error::Network(_))));
    assert!(matches!(db.get_document(1), Err(Error::Network(_))));
    assert!(matches!(db.reopen(), Err(Error::Network(_))));
    assert!(matches!(db.get_termfreq("this"), Err(Error::Network(_))));

    // The buffered entry is still exposed; the whole list fit in the first
    // chunk, so even stepping works.
    assert_eq!(pl.doc_length().unwrap(), 28);
    pl.advance().unwrap();
    assert_eq!(pl.docid().unwrap(), 2);

    assert!(!db.get_description().is_empty());
}

#[test]
fn peer_death_fails_pending_writes() {
    let dir = TempDir::new().unwrap();
    let (opts, rx) = start_killable_server(dir.path().to_path_buf(), true);

    let w = WritableDatabase::open_remote(opts).unwrap();
    w.add_document(&Document::new()).unwrap();

    let killer = rx.recv().unwrap();
    killer.shutdown(Shutdown::Both).unwrap();

    assert!(matches!(w.keep_alive(), Err(Error::Network(_))));
    // The pending change can no longer be flushed.
    assert!(matches!(w.commit(), Err(Error::Network(_))));
    assert!(matches!(w.add_document(&Document::new()), Err(Error::Network(_))));
    assert!(matches!(w.delete_document(1), Err(Error::Network(_))));
    assert!(matches!(w.set_metadata("k", "v"), Err(Error::Network(_))));

    // close still can't flush; it surfaces the transport error but the
    // handle ends Closed regardless.
    assert!(matches!(w.close(), Err(Error::Network(_))));
    assert!(w.is_closed());
    w.close().unwrap();
}

#[test]
fn transactions_stay_local_until_they_hold_changes() {
    let dir = TempDir::new().unwrap();
    let (opts, rx) = start_killable_server(dir.path().to_path_buf(), true);

    let w = WritableDatabase::open_remote(opts).unwrap();
    let killer = rx.recv().unwrap();
    killer.shutdown(Shutdown::Both).unwrap();

    // Outside a transaction these are state errors, not network errors.
    assert!(matches!(w.commit_transaction(), Err(Error::InvalidOperation(_))));
    assert!(matches!(w.cancel_transaction(), Err(Error::InvalidOperation(_))));

    // Entering is local-only, and leaving a clean transaction never talks
    // to the dead peer.
    w.begin_transaction(true).unwrap();
    w.commit_transaction().unwrap();
    w.begin_transaction(true).unwrap();
    w.cancel_transaction().unwrap();
}

#[test]
fn a_dirty_transaction_needs_the_peer() {
    for cancel in [false, true] {
        let dir = TempDir::new().unwrap();
        let (opts, rx) = start_killable_server(dir.path().to_path_buf(), true);

        let w = WritableDatabase::open_remote(opts).unwrap();
        w.begin_transaction(true).unwrap();
        w.add_document(&Document::new()).unwrap();

        let killer = rx.recv().unwrap();
        killer.shutdown(Shutdown::Both).unwrap();

        let result = if cancel { w.cancel_transaction() } else { w.commit_transaction() };
        assert!(matches!(result, Err(Error::Network(_))));
    }
}
