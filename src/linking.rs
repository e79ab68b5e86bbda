//! Contract-rate links: the mutable draft links and the immutable package history
use chrono::Utc;
use sled::transaction::TransactionalTree;

use super::error::Error;
use super::form::{SubmissionType, TimeStamp};
use super::revision::{
    AggregateKind, ContractRecord, ContractRevision, RateRecord, RateRevision, UpdateInfo,
};
use super::status::SubmissionSnapshot;
use super::store::{self, Tx, keys};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionScope {
    #[n(0)]
    Contract {
        #[n(0)]
        contract_id: String,
    },
    #[n(1)]
    Rate {
        #[n(0)]
        rate_id: String,
    },
}

/// One submit event: the revisions sealed or captured together.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub scope: SubmissionScope,
    #[n(2)]
    pub submit_info: UpdateInfo,
    #[n(3)]
    pub contract_revision_id: Option<String>,
    #[n(4)]
    pub rate_revision_ids: Vec<String>,
    #[n(5)]
    pub package_ids: Vec<String>,
}

/// Immutable join of one contract revision and one rate revision at one submission.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PackageSubmission {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub submission_id: String,
    #[n(2)]
    pub contract_id: String,
    #[n(3)]
    pub contract_revision_id: String,
    #[n(4)]
    pub rate_id: String,
    #[n(5)]
    pub rate_revision_id: String,
    #[n(6)]
    pub position: u32,
    #[n(7)]
    pub submitted_at: TimeStamp<Utc>,
}

fn require_linkable(contract: &ContractRecord, draft: &ContractRevision) -> Result<(), Error> {
    if draft.form_data.submission_type == SubmissionType::ContractOnly {
        return Err(Error::validation(format!(
            "contract {} is contract-only and cannot link rates",
            contract.id
        )));
    }
    Ok(())
}

/// Link `rate` into the contract's draft, updating both sides of the index.
pub(crate) fn link(
    tx: &TransactionalTree,
    contract: &mut ContractRecord,
    rate: &mut RateRecord,
) -> Tx<()> {
    let Some(draft_id) = contract.lineage.draft_revision_id.clone() else {
        return store::abort(Error::validation(format!(
            "contract {} has no draft to link rates into",
            contract.id
        )));
    };
    let draft: ContractRevision = store::require(
        tx,
        &keys::contract_revision(&draft_id),
        "contract revision",
        &draft_id,
    )?;
    if let Err(e) = require_linkable(contract, &draft) {
        return store::abort(e);
    }
    if contract.rate_ids.contains(&rate.id) {
        return store::abort(Error::validation(format!(
            "rate {} is already linked to contract {}",
            rate.id, contract.id
        )));
    }

    let is_child = rate.parent_contract_id.as_deref() == Some(contract.id.as_str());
    if !is_child && rate.lineage.latest_sealed().is_none() {
        return store::abort(Error::validation(format!(
            "rate {} must be submitted before it can be shared",
            rate.id
        )));
    }

    contract.rate_ids.push(rate.id.clone());
    if !rate.linked_contract_ids.contains(&contract.id) {
        rate.linked_contract_ids.push(contract.id.clone());
    }

    store::put(tx, &keys::contract(&contract.id), contract)?;
    store::put(tx, &keys::rate(&rate.id), rate)
}

/// Drop `rate` from the contract's draft. The rate and its history stay.
pub(crate) fn unlink(
    tx: &TransactionalTree,
    contract: &mut ContractRecord,
    rate: &mut RateRecord,
) -> Tx<()> {
    if contract.lineage.draft_revision_id.is_none() {
        return store::abort(Error::validation(format!(
            "contract {} has no draft to unlink rates from",
            contract.id
        )));
    }
    if !contract.rate_ids.contains(&rate.id) {
        return store::abort(Error::not_found("linked rate", rate.id.clone()));
    }

    contract.rate_ids.retain(|id| id != &rate.id);
    rate.linked_contract_ids.retain(|id| id != &contract.id);

    store::put(tx, &keys::contract(&contract.id), contract)?;
    store::put(tx, &keys::rate(&rate.id), rate)
}

/// Each linked rate's own current revision: its draft if it has one, else its
/// latest sealed revision. This is the editing view of a contract draft.
pub(crate) fn current_rate_revisions(
    tx: &TransactionalTree,
    contract: &ContractRecord,
) -> Tx<Vec<RateRevision>> {
    let mut revisions = Vec::with_capacity(contract.rate_ids.len());

    for rate_id in &contract.rate_ids {
        let rate: RateRecord = store::require(tx, &keys::rate(rate_id), "rate", rate_id)?;
        if let Some(head) = rate.lineage.head() {
            revisions.push(store::require(
                tx,
                &keys::rate_revision(head),
                "rate revision",
                head,
            )?);
        }
    }

    Ok(revisions)
}

/// Write one package row per captured rate revision and index it on the rate.
pub(crate) fn record_packages(
    tx: &TransactionalTree,
    submission_id: &str,
    contract_id: &str,
    contract_revision_id: &str,
    rates: &[(String, String)], // (rate id, rate revision id) in position order
    submitted_at: &TimeStamp<Utc>,
) -> Tx<Vec<String>> {
    let mut package_ids = Vec::with_capacity(rates.len());

    for (position, (rate_id, rate_revision_id)) in rates.iter().enumerate() {
        let package = PackageSubmission {
            id: store::new_id("pkg_")?,
            submission_id: submission_id.to_string(),
            contract_id: contract_id.to_string(),
            contract_revision_id: contract_revision_id.to_string(),
            rate_id: rate_id.clone(),
            rate_revision_id: rate_revision_id.clone(),
            position: position as u32,
            submitted_at: submitted_at.clone(),
        };
        store::put(tx, &keys::package(&package.id), &package)?;

        let mut rate: RateRecord = store::require(tx, &keys::rate(rate_id), "rate", rate_id)?;
        rate.package_ids.push(package.id.clone());
        store::put(tx, &keys::rate(rate_id), &rate)?;

        package_ids.push(package.id);
    }

    Ok(package_ids)
}

/// Rebuild a submission as it was recorded, with frozen rate revisions.
pub(crate) fn snapshot(tx: &TransactionalTree, submission_id: &str) -> Tx<SubmissionSnapshot> {
    let submission: Submission = store::require(
        tx,
        &keys::submission(submission_id),
        "submission",
        submission_id,
    )?;

    let contract_revision = match &submission.contract_revision_id {
        Some(id) => Some(store::require(
            tx,
            &AggregateKind::Contract.revision_key(id),
            "contract revision",
            id,
        )?),
        None => None,
    };

    let mut rate_revisions = Vec::with_capacity(submission.rate_revision_ids.len());
    for id in &submission.rate_revision_ids {
        rate_revisions.push(store::require(
            tx,
            &AggregateKind::Rate.revision_key(id),
            "rate revision",
            id,
        )?);
    }

    let mut packages = Vec::with_capacity(submission.package_ids.len());
    for id in &submission.package_ids {
        packages.push(store::require(tx, &keys::package(id), "package submission", id)?);
    }

    Ok(SubmissionSnapshot {
        submission_id: submission.id,
        scope: submission.scope,
        submit_info: submission.submit_info,
        contract_revision,
        rate_revisions,
        packages,
    })
}
