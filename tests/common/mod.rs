#![allow(dead_code)] // Shared across several integration test binaries; each uses a subset.

use std::path::Path;

use quern::backends::da::DaBuilder;
use quern::{Document, WritableDatabase};

/// Build the first sample document from an ordered token stream; token `i`
/// (zero-based) gets position `i + 1`.
fn doc_from_tokens(tokens: &[&str], data: &str) -> Document {
    let mut doc = Document::new();
    doc.set_data(data);
    for (i, token) in tokens.iter().enumerate() {
        doc.add_posting(token, i as u32 + 1, 1);
    }
    doc
}

/// Build a document from `(term, wdf)` pairs, assigning positions
/// sequentially across the expansion.
fn doc_from_pairs(pairs: &[(&str, u32)], data: &str) -> Document {
    let mut doc = Document::new();
    doc.set_data(data);
    let mut pos = 1;
    for (term, wdf) in pairs {
        for _ in 0..*wdf {
            doc.add_posting(term, pos, 1);
            pos += 1;
        }
    }
    doc
}

/// The small fixed corpus most tests run against. The per-document numbers
/// the assertions rely on:
///
/// - doc 1: length 28, 21 distinct terms, "paragraph" at positions 12 and 28
/// - doc 2: length 81, 56 distinct terms
/// - doc 3: length 15, 14 distinct terms
///
/// "paragraph" indexes docs 1-2, "this" docs 1-3, "a" docs 1-3 (termfreq 3),
/// "test" only doc 1, "that" docs 1-2. The only terms starting with "t" are
/// "test", "that", "the", and "this".
pub fn simpledata_docs() -> Vec<Document> {
    let mut doc1 = doc_from_tokens(
        &[
            "this", "is", "a", "test", "document", "used", "with", "the", "api", "code", "that",
            "paragraph", "data", "are", "generated", "for", "a", "simple", "harness", "is",
            "expect", "call", "data", "code", "runtime", "this", "are", "paragraph",
        ],
        "This is a test document used with the API test.",
    );
    doc1.set_value(1, "v1-one");
    doc1.set_value(3, "lonely");

    let mut doc2 = doc_from_pairs(
        &[
            ("a", 2),
            ("and", 3),
            ("because", 1),
            ("between", 1),
            ("body", 2),
            ("built", 1),
            ("but", 1),
            ("by", 1),
            ("chunk", 1),
            ("comes", 1),
            ("corpus", 2),
            ("count", 1),
            ("different", 1),
            ("disk", 1),
            ("each", 2),
            ("eighty", 1),
            ("engine", 1),
            ("entry", 1),
            ("every", 1),
            ("exactly", 1),
            ("fields", 1),
            ("first", 1),
            ("five", 1),
            ("format", 1),
            ("from", 1),
            ("group", 1),
            ("has", 2),
            ("holds", 2),
            ("in", 2),
            ("index", 2),
            ("is", 2),
            ("it", 1),
            ("its", 1),
            ("kept", 1),
            ("larger", 1),
            ("line", 2),
            ("lines", 1),
            ("longest", 1),
            ("many", 2),
            ("more", 1),
            ("much", 1),
            ("of", 2),
            ("on", 1),
            ("one", 2),
            ("paragraph", 3),
            ("records", 2),
            ("second", 2),
            ("sentence", 1),
            ("several", 1),
            ("six", 1),
            ("stored", 1),
            ("stream", 1),
            ("that", 2),
            ("this", 4),
            ("with", 2),
            ("word", 2),
        ],
        "This is a second database record with a longer body.",
    );
    doc2.set_value(1, "v1-two");

    let doc3 = doc_from_pairs(
        &[
            ("this", 2),
            ("a", 1),
            ("corpus", 1),
            ("distinct", 1),
            ("entries", 1),
            ("final", 1),
            ("fourteen", 1),
            ("inside", 1),
            ("is", 1),
            ("only", 1),
            ("record", 1),
            ("sample", 1),
            ("small", 1),
            ("with", 1),
        ],
        "A third, short record.",
    );

    vec![doc1, doc2, doc3]
}

/// Compact the sample corpus into a DA database directory.
pub fn build_da_simpledata(dir: &Path) {
    let mut builder = DaBuilder::new();
    for doc in simpledata_docs() {
        builder.add_document(doc);
    }
    builder.write(dir).unwrap();
}

/// Index the sample corpus into an open writable database and commit.
pub fn populate_simpledata(db: &WritableDatabase) {
    for doc in simpledata_docs() {
        db.add_document(&doc).unwrap();
    }
    db.commit().unwrap();
}

/// A DA directory holding `n` documents that all contain `term` (once each,
/// with a position), for exercising multi-block posting chains.
pub fn build_da_bulk(dir: &Path, term: &str, n: u32) {
    let mut builder = DaBuilder::new();
    for i in 0..n {
        let mut doc = Document::new();
        doc.add_posting(term, 1, 1);
        // A filler term makes the doc lengths distinguishable.
        doc.add_term(format!("filler{i:04}"), i % 7 + 1);
        builder.add_document(doc);
    }
    builder.write(dir).unwrap();
}
