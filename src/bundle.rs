//! Zip bundles of a revision's documents, generated from a durable job queue
use std::collections::HashMap;
use std::io::{Cursor, Write};

use chrono::Utc;
use sled::transaction::TransactionalTree;
use tracing::{debug, info, warn};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use super::blob::BlobStore;
use super::config::BundleConfig;
use super::documents::{self, DocumentKind, DocumentRecord};
use super::error::{Error, Result};
use super::form::{ContractFormData, FormData, RateFormData, TimeStamp};
use super::revision::{AggregateKind, Revision};
use super::store::{self, Tx, keys};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct BundleRecord {
    #[n(0)]
    pub revision_id: String,
    #[n(1)]
    pub aggregate: AggregateKind,
    #[n(2)]
    pub kind: DocumentKind,
    #[n(3)]
    pub locator: String,
    #[n(4)]
    pub archive_sha256: String,
    #[n(5)]
    pub document_set_hash: String,
    #[n(6)]
    pub document_count: u32,
    #[n(7)]
    pub generated_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct BundleJob {
    #[n(0)]
    pub revision_id: String,
    #[n(1)]
    pub aggregate: AggregateKind,
    #[n(2)]
    pub kind: DocumentKind,
    #[n(3)]
    pub document_set_hash: String,
    #[n(4)]
    pub previous_revision_id: Option<String>,
    #[n(5)]
    pub attempts: u32,
    #[n(6)]
    pub last_error: Option<String>,
    #[n(7)]
    pub queued_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobKey {
    pub revision_id: String,
    pub kind: DocumentKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleOutcome {
    Generated(BundleRecord),
    // predecessor's archive reused because the document set did not change
    CarriedForward(BundleRecord),
    AlreadyCurrent(BundleRecord),
}

impl BundleOutcome {
    pub fn record(&self) -> &BundleRecord {
        match self {
            BundleOutcome::Generated(record)
            | BundleOutcome::CarriedForward(record)
            | BundleOutcome::AlreadyCurrent(record) => record,
        }
    }
}

/// What happened to the bundle jobs of one submit or retry pass.
#[derive(Debug, Default)]
pub struct BundleReport {
    pub completed: Vec<BundleOutcome>,
    pub failures: Vec<Error>,
    pub deferred: usize,
}

impl BundleReport {
    pub fn generated(&self) -> impl Iterator<Item = &BundleRecord> {
        self.completed.iter().filter_map(|outcome| match outcome {
            BundleOutcome::Generated(record) => Some(record),
            _ => None,
        })
    }

    pub fn find(&self, revision_id: &str, kind: DocumentKind) -> Option<&BundleRecord> {
        self.completed
            .iter()
            .map(BundleOutcome::record)
            .find(|record| record.revision_id == revision_id && record.kind == kind)
    }
}

/// Queue one job per non-empty document kind of a freshly sealed revision.
pub(crate) fn enqueue<F: FormData>(
    tx: &TransactionalTree,
    aggregate: AggregateKind,
    revision: &Revision<F>,
) -> Tx<Vec<JobKey>> {
    let mut queued = Vec::new();

    for kind in F::DOCUMENT_KINDS {
        if documents::of_kind(&revision.documents, *kind).is_empty() {
            continue;
        }
        let document_set_hash = match documents::document_set_hash(&revision.documents, *kind) {
            Ok(hash) => hash,
            Err(e) => return store::abort(e),
        };

        let job = BundleJob {
            revision_id: revision.id.clone(),
            aggregate,
            kind: *kind,
            document_set_hash,
            previous_revision_id: revision.previous_revision_id.clone(),
            attempts: 0,
            last_error: None,
            queued_at: TimeStamp::new(),
        };
        store::put(tx, &keys::bundle_job(&revision.id, kind.as_str()), &job)?;
        queued.push(JobKey {
            revision_id: revision.id.clone(),
            kind: *kind,
        });
    }

    Ok(queued)
}

/// Build a zip of `docs` in the given order. Entries are stored uncompressed
/// with a fixed timestamp, so equal inputs give byte-identical archives.
pub fn build_archive(docs: &[&DocumentRecord], blobs: &dyn BlobStore) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for doc in docs {
        let bytes = blobs.get(&doc.s3_key)?;
        if sha256::digest(&bytes) != doc.sha256 {
            return Err(Error::Blob(format!(
                "{} does not match its recorded hash",
                doc.name
            )));
        }

        let count = seen.entry(doc.name.as_str()).or_insert(0);
        *count += 1;
        let entry_name = match *count {
            1 => doc.name.clone(),
            n => format!("{} ({})", doc.name, n),
        };

        writer.start_file(entry_name, options)?;
        writer.write_all(&bytes)?;
    }

    Ok(writer.finish()?.into_inner())
}

pub struct BundleGenerator<'a> {
    tree: &'a sled::Tree,
    blobs: &'a dyn BlobStore,
    config: &'a BundleConfig,
}

impl<'a> BundleGenerator<'a> {
    pub fn new(tree: &'a sled::Tree, blobs: &'a dyn BlobStore, config: &'a BundleConfig) -> Self {
        Self {
            tree,
            blobs,
            config,
        }
    }

    /// Run one queued job. Failures are written back onto the job for a later retry.
    pub fn process(&self, key: &JobKey) -> Result<BundleOutcome> {
        let job_key = keys::bundle_job(&key.revision_id, key.kind.as_str());
        let bundle_key = keys::bundle(&key.revision_id, key.kind.as_str());

        let Some(mut job) = store::read::<BundleJob>(self.tree, &job_key)? else {
            return match store::read::<BundleRecord>(self.tree, &bundle_key)? {
                Some(record) => Ok(BundleOutcome::AlreadyCurrent(record)),
                None => Err(Error::not_found("bundle job", job_key)),
            };
        };

        match self.run(&job) {
            Ok(outcome) => {
                store::run(self.tree, |tx| {
                    store::put(tx, &bundle_key, outcome.record())?;
                    tx.remove(job_key.as_bytes())?;
                    Ok(())
                })?;
                info!(
                    revision_id = %key.revision_id,
                    kind = %key.kind,
                    archive_sha256 = %outcome.record().archive_sha256,
                    "bundle ready"
                );
                Ok(outcome)
            }
            Err(e) => {
                job.attempts += 1;
                job.last_error = Some(e.to_string());
                store::write(self.tree, &job_key, &job)?;
                warn!(
                    revision_id = %key.revision_id,
                    kind = %key.kind,
                    attempts = job.attempts,
                    error = %e,
                    "bundle generation failed"
                );
                Err(Error::BundleGenerationFailed {
                    revision_id: key.revision_id.clone(),
                    kind: key.kind,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn run(&self, job: &BundleJob) -> Result<BundleOutcome> {
        let kind = job.kind.as_str();

        if let Some(existing) =
            store::read::<BundleRecord>(self.tree, &keys::bundle(&job.revision_id, kind))?
        {
            if existing.document_set_hash == job.document_set_hash {
                debug!(revision_id = %job.revision_id, kind, "bundle already current");
                return Ok(BundleOutcome::AlreadyCurrent(existing));
            }
        }

        if let Some(previous_id) = &job.previous_revision_id {
            if let Some(previous) =
                store::read::<BundleRecord>(self.tree, &keys::bundle(previous_id, kind))?
            {
                if previous.document_set_hash == job.document_set_hash {
                    debug!(revision_id = %job.revision_id, kind, "document set unchanged");
                    return Ok(BundleOutcome::CarriedForward(BundleRecord {
                        revision_id: job.revision_id.clone(),
                        ..previous
                    }));
                }
            }
        }

        let documents = self.revision_documents(job)?;
        let docs = documents::of_kind(&documents, job.kind);
        let bytes = build_archive(&docs, self.blobs)?;
        let archive_sha256 = sha256::digest(&bytes);
        let locator = self.blobs.put(
            &format!("{}/{}/{}.zip", self.config.key_prefix, job.revision_id, kind),
            &bytes,
        )?;

        Ok(BundleOutcome::Generated(BundleRecord {
            revision_id: job.revision_id.clone(),
            aggregate: job.aggregate,
            kind: job.kind,
            locator,
            archive_sha256,
            document_set_hash: job.document_set_hash.clone(),
            document_count: docs.len() as u32,
            generated_at: TimeStamp::new(),
        }))
    }

    fn revision_documents(&self, job: &BundleJob) -> Result<Vec<DocumentRecord>> {
        let key = job.aggregate.revision_key(&job.revision_id);
        let documents = match job.aggregate {
            AggregateKind::Contract => {
                store::read::<Revision<ContractFormData>>(self.tree, &key)?.map(|r| r.documents)
            }
            AggregateKind::Rate => {
                store::read::<Revision<RateFormData>>(self.tree, &key)?.map(|r| r.documents)
            }
        };

        documents
            .ok_or_else(|| Error::not_found(job.aggregate.revision_label(), job.revision_id.clone()))
    }

    /// Jobs still waiting in the queue, oldest key first.
    pub fn pending(&self) -> Result<Vec<BundleJob>> {
        let mut jobs = Vec::new();
        for entry in self.tree.scan_prefix(keys::BUNDLE_JOB_PREFIX.as_bytes()) {
            let (_, bytes) = entry?;
            jobs.push(minicbor::decode(&bytes)?);
        }
        Ok(jobs)
    }

    /// Re-run every queued job that has attempts left.
    pub fn retry_pending(&self) -> Result<BundleReport> {
        let mut report = BundleReport::default();

        for job in self.pending()? {
            if job.attempts >= self.config.max_attempts {
                debug!(revision_id = %job.revision_id, kind = %job.kind, "bundle job exhausted");
                report.deferred += 1;
                continue;
            }
            let key = JobKey {
                revision_id: job.revision_id,
                kind: job.kind,
            };
            match self.process(&key) {
                Ok(outcome) => report.completed.push(outcome),
                Err(e) => report.failures.push(e),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::SledBlobStore;
    use crate::config::BlobConfig;

    fn record(name: &str, key: &str, bytes: &[u8]) -> DocumentRecord {
        DocumentRecord {
            id: format!("doc_{name}"),
            aggregate_id: "contract_x".into(),
            revision_id: "crev_x".into(),
            kind: DocumentKind::Contract,
            name: name.into(),
            sha256: sha256::digest(bytes),
            s3_key: key.into(),
            added_at: TimeStamp::new(),
        }
    }

    #[test]
    fn archive_is_deterministic_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("bundle.db")).unwrap();
        let blobs = SledBlobStore::open(&db, BlobConfig::default()).unwrap();
        blobs.put("documents/a", b"first").unwrap();
        blobs.put("documents/b", b"second").unwrap();

        let a = record("contract.pdf", "documents/a", b"first");
        let b = record("contract.pdf", "documents/b", b"second");
        let docs = vec![&a, &b];

        let first = build_archive(&docs, &blobs).unwrap();
        let second = build_archive(&docs, &blobs).unwrap();
        assert_eq!(sha256::digest(&first), sha256::digest(&second));

        let mut archive = zip::ZipArchive::new(Cursor::new(first)).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.by_index(0).unwrap().name(), "contract.pdf");
        assert_eq!(archive.by_index(1).unwrap().name(), "contract.pdf (2)");
    }

    #[test]
    fn tampered_document_fails_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("bundle.db")).unwrap();
        let blobs = SledBlobStore::open(&db, BlobConfig::default()).unwrap();
        blobs.put("documents/a", b"tampered").unwrap();

        let a = record("contract.pdf", "documents/a", b"original");
        assert!(build_archive(&[&a], &blobs).is_err());
    }
}
