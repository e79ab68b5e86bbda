//! Service layer API for package workflow operations
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use super::blob::{BlobStore, SledBlobStore};
use super::bundle::{BundleGenerator, BundleJob, BundleRecord, BundleReport};
use super::config::ServiceConfig;
use super::documents::{DocumentInput, DocumentKind};
use super::error::{Error, Result};
use super::form::{ContractFormData, RateFormData};
use super::lifecycle::{self, SubmitResult, Transition};
use super::status::{self, ContractView, RateView, SubmissionSnapshot};
use super::store::{self, keys};
use super::utils;
use super::validation::{StandardRules, ValidationRules};

/// Result of a committed submit. Bundle failures never undo the submission.
#[derive(Debug)]
pub struct Submitted<V> {
    pub view: V,
    pub submission_id: String,
    pub bundles: BundleReport,
}

/// A bundle ready for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleView {
    pub record: BundleRecord,
    pub url: String,
}

pub struct PackageService {
    instance: Arc<sled::Db>,
    blobs: Arc<dyn BlobStore>,
    rules: Arc<dyn ValidationRules>,
    config: ServiceConfig,
}

impl PackageService {
    pub fn new(
        instance: Arc<sled::Db>,
        blobs: Arc<dyn BlobStore>,
        rules: Arc<dyn ValidationRules>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            instance,
            blobs,
            rules,
            config,
        }
    }

    /// Service with a blob store in the same database and the standard rule set.
    pub fn open(instance: Arc<sled::Db>, config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let blobs = SledBlobStore::open(&instance, config.blobs.clone())?;
        Ok(Self::new(
            instance,
            Arc::new(blobs),
            Arc::new(StandardRules),
            config,
        ))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn transition<'a>(&'a self, actor: &'a str) -> Transition<'a> {
        Transition {
            rules: self.rules.as_ref(),
            config: &self.config.lifecycle,
            actor,
        }
    }

    fn bundles(&self) -> BundleGenerator<'_> {
        BundleGenerator::new(&self.instance, self.blobs.as_ref(), &self.config.bundles)
    }

    /// Put a document's bytes in the blob store and describe it for a draft.
    pub fn upload_document(&self, name: &str, bytes: &[u8]) -> Result<DocumentInput> {
        let key = format!("documents/{}/{}", utils::new_uuid_to_bech32("blob_")?, name);
        let locator = self.blobs.put(&key, bytes)?;

        Ok(DocumentInput {
            name: name.to_string(),
            s3_key: locator,
            sha256: sha256::digest(bytes),
        })
    }

    /// Start a new contract with its first draft revision
    #[instrument(skip(self, form))]
    pub fn create_contract(&self, state_code: &str, form: ContractFormData) -> Result<ContractView> {
        let contract = store::run(&self.instance, |tx| {
            lifecycle::create_contract(tx, state_code, &form)
        })?;
        info!(contract_id = %contract.id, "contract draft created");

        self.fetch_contract(&contract.id)
    }

    /// Replace the form data of a contract's draft revision
    #[instrument(skip(self, form))]
    pub fn update_contract_draft(
        &self,
        contract_id: &str,
        expected: Option<&str>,
        form: ContractFormData,
    ) -> Result<ContractView> {
        store::run(&self.instance, |tx| {
            lifecycle::update_contract_draft(tx, contract_id, expected, &form)
        })?;

        self.fetch_contract(contract_id)
    }

    /// Start a rate that is not owned by any contract
    #[instrument(skip(self, form))]
    pub fn create_rate(&self, state_code: &str, form: RateFormData) -> Result<RateView> {
        let rate = store::run(&self.instance, |tx| {
            lifecycle::create_rate(tx, state_code, &form, None)
        })?;
        info!(rate_id = %rate.id, "rate draft created");

        self.rate_view(&rate.id)
    }

    /// Create a new rate in draft and link it into the contract's draft
    #[instrument(skip(self, form))]
    pub fn add_new_rate(
        &self,
        contract_id: &str,
        expected: Option<&str>,
        form: RateFormData,
    ) -> Result<RateView> {
        let rate = store::run(&self.instance, |tx| {
            lifecycle::add_new_rate(tx, contract_id, expected, &form)
        })?;
        info!(rate_id = %rate.id, "rate draft created on contract");

        self.rate_view(&rate.id)
    }

    #[instrument(skip(self, form))]
    pub fn update_rate_draft(
        &self,
        rate_id: &str,
        expected: Option<&str>,
        form: RateFormData,
    ) -> Result<RateView> {
        store::run(&self.instance, |tx| {
            lifecycle::update_rate_draft(tx, rate_id, expected, &form)
        })?;

        self.rate_view(rate_id)
    }

    /// Share an existing rate with the contract's draft
    #[instrument(skip(self))]
    pub fn link_rate(
        &self,
        contract_id: &str,
        expected: Option<&str>,
        rate_id: &str,
    ) -> Result<ContractView> {
        store::run(&self.instance, |tx| {
            lifecycle::link_rate(tx, contract_id, expected, rate_id)
        })?;
        info!("rate linked");

        self.fetch_contract(contract_id)
    }

    #[instrument(skip(self))]
    pub fn unlink_rate(
        &self,
        contract_id: &str,
        expected: Option<&str>,
        rate_id: &str,
    ) -> Result<ContractView> {
        store::run(&self.instance, |tx| {
            lifecycle::unlink_rate(tx, contract_id, expected, rate_id)
        })?;
        info!("rate unlinked");

        self.fetch_contract(contract_id)
    }

    /// Seal the contract's draft together with its linked rates
    #[instrument(skip(self))]
    pub fn submit_contract(
        &self,
        contract_id: &str,
        expected: Option<&str>,
        submitted_by: &str,
        reason: Option<&str>,
    ) -> Result<Submitted<ContractView>> {
        let ctx = self.transition(submitted_by);
        let result = store::run(&self.instance, |tx| {
            lifecycle::submit_contract(tx, &ctx, contract_id, expected, reason)
        })?;
        info!(submission_id = %result.submission_id, "contract submitted");

        let bundles = self.generate_bundles(&result);
        Ok(Submitted {
            view: self.fetch_contract(contract_id)?,
            submission_id: result.submission_id,
            bundles,
        })
    }

    /// Reopen a submitted contract for edits
    #[instrument(skip(self))]
    pub fn unlock_contract(
        &self,
        contract_id: &str,
        expected: Option<&str>,
        unlocked_by: &str,
        reason: &str,
    ) -> Result<ContractView> {
        let ctx = self.transition(unlocked_by);
        let unlocked_rates = store::run(&self.instance, |tx| {
            lifecycle::unlock_contract(tx, &ctx, contract_id, expected, reason)
        })?;
        info!(rates = unlocked_rates.len(), "contract unlocked");

        self.fetch_contract(contract_id)
    }

    /// Seal a rate's draft on its own
    #[instrument(skip(self))]
    pub fn submit_rate(
        &self,
        rate_id: &str,
        expected: Option<&str>,
        submitted_by: &str,
        reason: Option<&str>,
    ) -> Result<Submitted<RateView>> {
        let ctx = self.transition(submitted_by);
        let result = store::run(&self.instance, |tx| {
            lifecycle::submit_rate(tx, &ctx, rate_id, expected, reason)
        })?;
        info!(submission_id = %result.submission_id, "rate submitted");

        let bundles = self.generate_bundles(&result);
        Ok(Submitted {
            view: self.rate_view(rate_id)?,
            submission_id: result.submission_id,
            bundles,
        })
    }

    #[instrument(skip(self))]
    pub fn unlock_rate(
        &self,
        rate_id: &str,
        expected: Option<&str>,
        unlocked_by: &str,
        reason: &str,
    ) -> Result<RateView> {
        let ctx = self.transition(unlocked_by);
        store::run(&self.instance, |tx| {
            lifecycle::unlock_rate(tx, &ctx, rate_id, expected, reason)
        })?;
        info!("rate unlocked");

        self.rate_view(rate_id)
    }

    pub fn fetch_contract(&self, contract_id: &str) -> Result<ContractView> {
        store::run(&self.instance, |tx| status::contract_view(tx, contract_id))
    }

    /// A rate created on a contract stays hidden until its first submission;
    /// until then it is reached through the contract's `draft_rates`.
    pub fn fetch_rate(&self, rate_id: &str) -> Result<RateView> {
        let view = self.rate_view(rate_id)?;
        if view.parent_contract_id.is_some() && view.revisions.is_empty() {
            return Err(Error::not_found("rate", rate_id));
        }
        Ok(view)
    }

    fn rate_view(&self, rate_id: &str) -> Result<RateView> {
        store::run(&self.instance, |tx| status::rate_view(tx, rate_id))
    }

    /// Every submission of the contract, newest first, with the rate revisions frozen at the time
    pub fn fetch_contract_history(&self, contract_id: &str) -> Result<Vec<SubmissionSnapshot>> {
        Ok(self.fetch_contract(contract_id)?.submissions)
    }

    pub fn fetch_rate_history(&self, rate_id: &str) -> Result<Vec<SubmissionSnapshot>> {
        Ok(self.fetch_rate(rate_id)?.submissions)
    }

    /// Locate a revision's bundle and issue a signed download URL for it
    pub fn fetch_bundle(&self, revision_id: &str, kind: DocumentKind) -> Result<BundleView> {
        let record = self.bundle_record(revision_id, kind)?;
        let ttl = Duration::from_secs(self.config.blobs.url_ttl_secs);
        let url = self.blobs.signed_url(&record.locator, ttl)?;

        Ok(BundleView { record, url })
    }

    /// Re-read a bundle's archive and check it still hashes to the recorded value
    pub fn verify_bundle(&self, revision_id: &str, kind: DocumentKind) -> Result<bool> {
        let record = self.bundle_record(revision_id, kind)?;
        let bytes = self.blobs.get(&record.locator)?;

        Ok(sha256::digest(&bytes) == record.archive_sha256)
    }

    /// Re-run bundle jobs left over from failed or deferred generation
    #[instrument(skip(self))]
    pub fn retry_pending_bundles(&self) -> Result<BundleReport> {
        let report = self.bundles().retry_pending()?;
        info!(
            completed = report.completed.len(),
            failed = report.failures.len(),
            "bundle retry pass finished"
        );
        Ok(report)
    }

    fn bundle_record(&self, revision_id: &str, kind: DocumentKind) -> Result<BundleRecord> {
        let bundle_key = keys::bundle(revision_id, kind.as_str());
        if let Some(record) = store::read(&self.instance, &bundle_key)? {
            return Ok(record);
        }

        let job_key = keys::bundle_job(revision_id, kind.as_str());
        match store::read::<BundleJob>(&self.instance, &job_key)? {
            Some(job) => match job.last_error {
                Some(reason) => Err(Error::BundleGenerationFailed {
                    revision_id: revision_id.to_string(),
                    kind,
                    reason,
                }),
                None => Err(Error::not_found("bundle (queued)", format!("{revision_id}/{kind}"))),
            },
            None => Err(Error::not_found("bundle", format!("{revision_id}/{kind}"))),
        }
    }

    fn generate_bundles(&self, result: &SubmitResult) -> BundleReport {
        let mut report = BundleReport::default();
        if !self.config.bundles.generate_inline {
            report.deferred = result.jobs.len();
            return report;
        }

        let generator = self.bundles();
        for key in &result.jobs {
            match generator.process(key) {
                Ok(outcome) => report.completed.push(outcome),
                Err(e) => report.failures.push(e),
            }
        }
        report
    }
}
