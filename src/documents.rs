//! Registry of uploaded documents attached to revisions
use std::fmt;

use chrono::Utc;
use sled::transaction::TransactionalTree;

use super::error::Result;
use super::form::{FormData, TimeStamp};
use super::store::{self, Tx, keys};
use super::utils;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKind {
    #[n(0)]
    Contract,
    #[n(1)]
    Supporting,
    #[n(2)]
    Rate,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Contract => "contract",
            DocumentKind::Supporting => "supporting",
            DocumentKind::Rate => "rate",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document as supplied on a draft: where it lives and what it hashes to.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DocumentInput {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub s3_key: String,
    #[n(2)]
    pub sha256: String,
}

impl DocumentInput {
    pub fn new(name: &str, s3_key: &str, sha256: &str) -> Self {
        Self {
            name: name.to_string(),
            s3_key: s3_key.to_string(),
            sha256: sha256.to_string(),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub aggregate_id: String,
    #[n(2)]
    pub revision_id: String, // revision the document was first attached to
    #[n(3)]
    pub kind: DocumentKind,
    #[n(4)]
    pub name: String,
    #[n(5)]
    pub sha256: String,
    #[n(6)]
    pub s3_key: String,
    #[n(7)]
    pub added_at: TimeStamp<Utc>,
}

/// Resolve every document on `form` to a record, reusing the aggregate's
/// existing record for a content hash so `added_at` keeps its first value.
pub(crate) fn register<F: FormData>(
    tx: &TransactionalTree,
    aggregate_id: &str,
    revision_id: &str,
    form: &F,
    now: &TimeStamp<Utc>,
) -> Tx<Vec<DocumentRecord>> {
    let mut records = Vec::new();

    for kind in F::DOCUMENT_KINDS {
        for input in form.documents(*kind) {
            let key = keys::document(aggregate_id, &input.sha256);
            let first: DocumentRecord = match store::get(tx, &key)? {
                Some(existing) => existing,
                None => {
                    let record = DocumentRecord {
                        id: store::new_id("doc_")?,
                        aggregate_id: aggregate_id.to_string(),
                        revision_id: revision_id.to_string(),
                        kind: *kind,
                        name: input.name.clone(),
                        sha256: input.sha256.clone(),
                        s3_key: input.s3_key.clone(),
                        added_at: now.clone(),
                    };
                    store::put(tx, &key, &record)?;
                    record
                }
            };

            records.push(DocumentRecord {
                kind: *kind,
                name: input.name.clone(),
                s3_key: input.s3_key.clone(),
                ..first
            });
        }
    }

    Ok(records)
}

/// Documents of one kind, in insertion order.
pub fn of_kind(documents: &[DocumentRecord], kind: DocumentKind) -> Vec<&DocumentRecord> {
    documents.iter().filter(|doc| doc.kind == kind).collect()
}

/// Hash identifying the composition of one kind's document set.
pub fn document_set_hash(documents: &[DocumentRecord], kind: DocumentKind) -> Result<String> {
    let entries: Vec<[&str; 3]> = of_kind(documents, kind)
        .into_iter()
        .map(|doc| [doc.name.as_str(), doc.sha256.as_str(), doc.s3_key.as_str()])
        .collect();
    let (hash, _) = utils::encode_and_hash(&entries)?;

    Ok(hash)
}
