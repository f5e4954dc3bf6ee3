//! Cursor-contract behavior against the DA backend: ordering, skip_to
//! across posting blocks, lazy positions, eager term lists, and corruption
//! detection.

mod common;

use quern::backends::da::{DaBuilder, DaDatabase};
use quern::{
    Backend, Database, Document, Error, PostingCursor, PositionCursor, TermCursor, ValueCursor,
};
use tempfile::TempDir;

#[test]
fn postings_ascend_and_match_the_corpus() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let db = Database::open(dir.path()).unwrap();

    let mut pl = db.postlist_begin("this").unwrap();
    assert_eq!(pl.termfreq(), 3);
    let mut previous = 0;
    let mut seen = Vec::new();
    while !pl.at_end() {
        let docid = pl.docid().unwrap();
        assert!(docid > previous, "docids must strictly ascend");
        previous = docid;
        seen.push((docid, pl.wdf().unwrap()));
        pl.advance().unwrap();
    }
    assert_eq!(seen, vec![(1, 2), (2, 4), (3, 2)]);

    // Advancing an exhausted cursor stays at the end.
    pl.advance().unwrap();
    assert!(pl.at_end());
    assert!(pl.docid().is_err());

    // An unknown term yields an empty cursor, not an error.
    let pl = db.postlist_begin("nonesuch").unwrap();
    assert!(pl.at_end());
    assert_eq!(pl.termfreq(), 0);
}

#[test]
fn skip_to_descends_the_block_chain() {
    let dir = TempDir::new().unwrap();
    // 50 documents all holding "common": four chained posting blocks.
    common::build_da_bulk(dir.path(), "common", 50);
    let db = Database::open(dir.path()).unwrap();

    let mut pl = db.postlist_begin("common").unwrap();
    assert_eq!(pl.termfreq(), 50);
    assert_eq!(pl.docid().unwrap(), 1);

    pl.skip_to(17, 0.0).unwrap();
    assert_eq!(pl.docid().unwrap(), 17);

    // Skipping backwards is a no-op.
    pl.skip_to(3, 0.0).unwrap();
    assert_eq!(pl.docid().unwrap(), 17);

    // Far forward, crossing several blocks.
    pl.skip_to(49, 0.0).unwrap();
    assert_eq!(pl.docid().unwrap(), 49);

    pl.skip_to(51, 0.0).unwrap();
    assert!(pl.at_end());

    // skip_to straight from an unstarted backend cursor.
    let backend = DaDatabase::open(dir.path()).unwrap();
    let mut pl = backend.postings(b"common").unwrap();
    pl.skip_to(33, 0.0).unwrap();
    assert_eq!(pl.docid().unwrap(), 33);
}

#[test]
fn positions_are_lazy_and_ascending() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let db = Database::open(dir.path()).unwrap();

    let mut pil = db.positionlist_begin(1, "paragraph").unwrap();
    let mut positions = Vec::new();
    while !pil.at_end() {
        positions.push(pil.position().unwrap());
        pil.advance().unwrap();
    }
    assert_eq!(positions, vec![12, 28]);

    // Through the posting cursor as well.
    let pl = db.postlist_begin("paragraph").unwrap();
    let mut pil = pl.positions().unwrap();
    pil.advance().unwrap();
    assert_eq!(pil.position().unwrap(), 12);
    pil.skip_to(13).unwrap();
    assert_eq!(pil.position().unwrap(), 28);

    // A (docid, term) pair with no such posting is an argument error.
    assert!(matches!(
        db.positionlist_begin(3, "paragraph"),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn termlist_is_materialized_at_construction() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let db = Database::open(dir.path()).unwrap();

    let mut tl = db.termlist_begin(3).unwrap();
    db.close();

    // The cursor was materialized before the close; the whole walk works.
    let mut terms = Vec::new();
    while !tl.at_end() {
        terms.push(tl.term().unwrap().to_vec());
        tl.advance().unwrap();
    }
    assert_eq!(terms.len(), 14);
    assert!(terms.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn allterms_prefix_iteration() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let db = Database::open(dir.path()).unwrap();

    let mut at = db.allterms_begin("t").unwrap();
    let mut terms = Vec::new();
    while !at.at_end() {
        terms.push(String::from_utf8(at.term().unwrap().to_vec()).unwrap());
        at.advance().unwrap();
    }
    assert_eq!(terms, ["test", "that", "the", "this"]);

    // skip_to within the full dictionary.
    let mut at = db.allterms_begin("").unwrap();
    at.skip_to(b"paragraph").unwrap();
    assert_eq!(at.term().unwrap(), b"paragraph");
    assert_eq!(at.termfreq().unwrap(), 2);

    // The dictionary carries no wdf.
    assert!(matches!(at.wdf(), Err(Error::InvalidOperation(_))));

    let at = db.allterms_begin("zzz").unwrap();
    assert!(at.at_end());
}

#[test]
fn document_and_value_round_trip() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let db = Database::open(dir.path()).unwrap();

    let doc = db.get_document(2).unwrap();
    assert_eq!(doc.data(), b"This is a second database record with a longer body.");
    assert_eq!(doc.value(1), Some(&b"v1-two"[..]));
    assert_eq!(doc.unique_terms(), 56);

    assert_eq!(db.get_value_freq(3).unwrap(), 1);
    assert_eq!(db.get_value_lower_bound(3).unwrap(), b"lonely");

    let mut vs = db.valuestream_begin(1).unwrap();
    assert_eq!(vs.docid().unwrap(), 1);
    assert_eq!(vs.value().unwrap(), b"v1-one");
    vs.skip_to(2).unwrap();
    assert_eq!(vs.value().unwrap(), b"v1-two");
    vs.advance().unwrap();
    assert!(vs.at_end());

    assert!(matches!(db.get_document(9), Err(Error::InvalidArgument(_))));
    assert!(matches!(db.get_document(0), Err(Error::InvalidArgument(_))));
}

#[test]
fn the_backend_is_read_only() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let backend = DaDatabase::open(dir.path()).unwrap();

    assert!(matches!(backend.spellings(), Err(Error::Unavailable(_))));
    assert!(matches!(backend.synonyms(b"color"), Err(Error::Unavailable(_))));
    assert!(matches!(backend.metadata_keys(b""), Err(Error::Unavailable(_))));
    // Metadata lookups report clean absence rather than failing.
    assert_eq!(backend.metadata(b"anything").unwrap(), None);
}

#[test]
fn wdf_upper_bound_and_term_stats() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());
    let db = Database::open(dir.path()).unwrap();

    assert_eq!(db.get_wdf_upper_bound("this").unwrap(), 4);
    assert_eq!(db.get_wdf_upper_bound("nonesuch").unwrap(), 0);
    assert_eq!(db.get_termfreq("a").unwrap(), 3);
    assert_eq!(db.get_collection_freq("this").unwrap(), 8);
    assert!(!db.term_exists("nonesuch").unwrap());
}

#[test]
fn builder_rejects_oversized_terms() {
    let dir = TempDir::new().unwrap();
    let mut doc = Document::new();
    doc.add_term([b'x'; 300], 1);
    let mut builder = DaBuilder::new();
    builder.add_document(doc);
    assert!(matches!(builder.write(dir.path()), Err(Error::InvalidArgument(_))));
}

#[test]
fn a_mangled_terms_file_reads_as_corruption() {
    let dir = TempDir::new().unwrap();
    common::build_da_simpledata(dir.path());

    let terms = dir.path().join("terms.da");
    let mut bytes = std::fs::read(&terms).unwrap();
    bytes[0] = b'X'; // break the magic
    std::fs::write(&terms, &bytes).unwrap();
    assert!(matches!(DaDatabase::open(dir.path()), Err(Error::Corrupt(_))));

    // A truncated file is caught before any probe trusts it.
    std::fs::write(&terms, &bytes[..20]).unwrap();
    assert!(matches!(DaDatabase::open(dir.path()), Err(Error::Corrupt(_))));
}
