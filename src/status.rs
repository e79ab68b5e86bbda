//! Derived aggregate status and the consumer-facing revision views
use std::fmt;

use sled::transaction::TransactionalTree;

use super::form::{ContractFormData, FormData, RateFormData};
use super::linking::{self, PackageSubmission, SubmissionScope};
use super::revision::{
    AggregateKind, ContractRecord, ContractRevision, Lineage, RateRecord, RateRevision, Revision,
    UpdateInfo,
};
use super::store::{self, Tx, keys};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Draft,
    Submitted,
    Unlocked,
    Resubmitted,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Draft => "DRAFT",
            Status::Submitted => "SUBMITTED",
            Status::Unlocked => "UNLOCKED",
            Status::Resubmitted => "RESUBMITTED",
        }
    }

    pub fn can_submit(self) -> bool {
        matches!(self, Status::Draft | Status::Unlocked)
    }

    pub fn can_unlock(self) -> bool {
        matches!(self, Status::Submitted | Status::Resubmitted)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status from the shape of an aggregate's history.
///
/// `reopened` says whether the latest sealed revision carries an unlock record
/// newer than its own submission.
pub fn derive_status(sealed_count: usize, has_draft: bool, reopened: bool) -> Status {
    match (sealed_count, has_draft) {
        (0, _) => Status::Draft,
        (_, true) if reopened => Status::Unlocked,
        (1, _) => Status::Submitted,
        _ => Status::Resubmitted,
    }
}

/// Status of an aggregate given its sealed revisions (oldest first) and draft.
pub fn synthesize<F>(sealed: &[Revision<F>], draft: Option<&Revision<F>>) -> Status {
    derive_status(sealed.len(), draft.is_some(), reopened(sealed.last()))
}

fn reopened<F>(latest: Option<&Revision<F>>) -> bool {
    latest.is_some_and(|latest| latest.unlocked_after_submit())
}

/// Status of a stored aggregate. Only the latest sealed revision is loaded;
/// the result is the one [`synthesize`] gives for the full history.
pub(crate) fn current_status(
    tx: &TransactionalTree,
    kind: AggregateKind,
    lineage: &Lineage,
) -> Tx<Status> {
    let reopened = match lineage.latest_sealed() {
        None => false,
        Some(id) => match kind {
            AggregateKind::Contract => {
                let latest: Revision<ContractFormData> =
                    store::require(tx, &kind.revision_key(id), kind.revision_label(), id)?;
                reopened(Some(&latest))
            }
            AggregateKind::Rate => {
                let latest: Revision<RateFormData> =
                    store::require(tx, &kind.revision_key(id), kind.revision_label(), id)?;
                reopened(Some(&latest))
            }
        },
    };

    Ok(derive_status(
        lineage.revision_ids.len(),
        lineage.draft_revision_id.is_some(),
        reopened,
    ))
}

/// Newest-first copy of a sealed history stored oldest-first.
pub fn newest_first<F: Clone>(sealed: &[Revision<F>]) -> Vec<Revision<F>> {
    sealed.iter().rev().cloned().collect()
}

/// One submission event as it looked when it was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionSnapshot {
    pub submission_id: String,
    pub scope: SubmissionScope,
    pub submit_info: UpdateInfo,
    pub contract_revision: Option<ContractRevision>,
    pub rate_revisions: Vec<RateRevision>, // frozen, in link position order
    pub packages: Vec<PackageSubmission>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContractView {
    pub id: String,
    pub state_code: String,
    pub status: Status,
    pub draft_revision: Option<ContractRevision>,
    pub revisions: Vec<ContractRevision>, // sealed, newest first
    // each linked rate's own current revision; only populated while a draft exists
    pub draft_rates: Vec<RateRevision>,
    pub linked_rate_ids: Vec<String>,
    pub submissions: Vec<SubmissionSnapshot>, // newest first
}

impl ContractView {
    /// The head revision the next write must name as its expected revision.
    pub fn head_revision_id(&self) -> Option<&str> {
        self.draft_revision
            .as_ref()
            .or_else(|| self.revisions.first())
            .map(|rev| rev.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateView {
    pub id: String,
    pub state_code: String,
    pub status: Status,
    pub parent_contract_id: Option<String>,
    pub linked_contract_ids: Vec<String>,
    pub draft_revision: Option<RateRevision>,
    pub revisions: Vec<RateRevision>, // sealed, newest first
    pub submissions: Vec<SubmissionSnapshot>, // newest first
}

impl RateView {
    pub fn head_revision_id(&self) -> Option<&str> {
        self.draft_revision
            .as_ref()
            .or_else(|| self.revisions.first())
            .map(|rev| rev.id.as_str())
    }
}

/// Sealed revisions (oldest first) and the draft named by `lineage`.
pub(crate) fn load_revisions<F: FormData>(
    tx: &TransactionalTree,
    kind: AggregateKind,
    lineage: &Lineage,
) -> Tx<(Vec<Revision<F>>, Option<Revision<F>>)> {
    let mut sealed = Vec::with_capacity(lineage.revision_ids.len());
    for id in &lineage.revision_ids {
        sealed.push(store::require(
            tx,
            &kind.revision_key(id),
            kind.revision_label(),
            id,
        )?);
    }

    let draft = match &lineage.draft_revision_id {
        Some(id) => Some(store::require(
            tx,
            &kind.revision_key(id),
            kind.revision_label(),
            id,
        )?),
        None => None,
    };

    Ok((sealed, draft))
}

fn snapshots(tx: &TransactionalTree, submission_ids: &[String]) -> Tx<Vec<SubmissionSnapshot>> {
    submission_ids
        .iter()
        .rev()
        .map(|id| linking::snapshot(tx, id))
        .collect()
}

pub(crate) fn contract_view(tx: &TransactionalTree, contract_id: &str) -> Tx<ContractView> {
    let contract: ContractRecord =
        store::require(tx, &keys::contract(contract_id), "contract", contract_id)?;
    let (sealed, draft) =
        load_revisions::<ContractFormData>(tx, AggregateKind::Contract, &contract.lineage)?;

    let draft_rates = match draft {
        Some(_) => linking::current_rate_revisions(tx, &contract)?,
        None => vec![],
    };

    Ok(ContractView {
        status: synthesize(&sealed, draft.as_ref()),
        revisions: newest_first(&sealed),
        draft_revision: draft,
        draft_rates,
        linked_rate_ids: contract.rate_ids.clone(),
        submissions: snapshots(tx, &contract.lineage.submission_ids)?,
        id: contract.id,
        state_code: contract.state_code,
    })
}

pub(crate) fn rate_view(tx: &TransactionalTree, rate_id: &str) -> Tx<RateView> {
    let rate: RateRecord = store::require(tx, &keys::rate(rate_id), "rate", rate_id)?;
    let (sealed, draft) =
        load_revisions::<RateFormData>(tx, AggregateKind::Rate, &rate.lineage)?;

    Ok(RateView {
        status: synthesize(&sealed, draft.as_ref()),
        revisions: newest_first(&sealed),
        draft_revision: draft,
        submissions: snapshots(tx, &rate.lineage.submission_ids)?,
        parent_contract_id: rate.parent_contract_id,
        linked_contract_ids: rate.linked_contract_ids,
        id: rate.id,
        state_code: rate.state_code,
    })
}
