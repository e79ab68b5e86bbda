//! Draft, submit and unlock transitions for contracts and rates.
//!
//! Every function here runs inside a caller-owned sled transaction; an abort
//! anywhere discards every revision, link and queue write of the transition.
use sled::transaction::TransactionalTree;

use super::bundle::{self, JobKey};
use super::config::LifecycleConfig;
use super::documents;
use super::error::Error;
use super::form::{ContractFormData, FormData, RateFormData, SubmissionType, TimeStamp};
use super::linking::{self, Submission, SubmissionScope};
use super::revision::{
    AggregateKind, ContractRecord, ContractRevision, Lineage, RateRecord, RateRevision,
    Revision, UpdateInfo,
};
use super::status::current_status;
use super::store::{self, Tx, keys};
use super::validation::ValidationRules;

/// Per-call inputs for a transition.
pub(crate) struct Transition<'a> {
    pub rules: &'a dyn ValidationRules,
    pub config: &'a LifecycleConfig,
    pub actor: &'a str,
}

/// What a committed submit produced.
#[derive(Debug, Clone)]
pub(crate) struct SubmitResult {
    pub submission_id: String,
    pub jobs: Vec<JobKey>,
}

fn invalid_state<T>(
    tx: &TransactionalTree,
    kind: AggregateKind,
    id: &str,
    lineage: &Lineage,
    action: &'static str,
) -> Tx<T> {
    store::abort(Error::InvalidState {
        aggregate: kind,
        id: id.to_string(),
        status: current_status(tx, kind, lineage)?,
        action,
    })
}

fn check_head(lineage: &Lineage, id: &str, expected: Option<&str>) -> Tx<()> {
    match lineage.check_head(id, expected) {
        Ok(()) => Ok(()),
        Err(e) => store::abort(e),
    }
}

/// No draft to submit. A caller naming the head it expected to seal lost a race
/// to another submit; anyone else asked for an illegal transition.
fn nothing_to_submit<T>(
    tx: &TransactionalTree,
    kind: AggregateKind,
    id: &str,
    lineage: &Lineage,
    expected: Option<&str>,
) -> Tx<T> {
    match expected {
        Some(expected) => store::abort(Error::ConcurrentModification {
            id: id.to_string(),
            expected: expected.to_string(),
            found: lineage.head().map(|head| format!("{head} (sealed)")),
        }),
        None => invalid_state(tx, kind, id, lineage, "submit"),
    }
}

fn submit_reason(lineage: &Lineage, reason: Option<&str>, config: &LifecycleConfig) -> Tx<String> {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => Ok(reason.to_string()),
        None if lineage.revision_ids.is_empty() => Ok(config.initial_submission_reason.clone()),
        None => store::abort(Error::validation("resubmission requires a reason")),
    }
}

fn unlock_reason(reason: &str) -> Tx<String> {
    match reason.trim() {
        "" => store::abort(Error::validation("unlock requires a reason")),
        reason => Ok(reason.to_string()),
    }
}

fn new_draft<F: FormData>(
    tx: &TransactionalTree,
    kind: AggregateKind,
    aggregate_id: &str,
    form: &F,
) -> Tx<Revision<F>> {
    let now = TimeStamp::new();
    let id = store::new_id(kind.revision_prefix())?;
    let documents = documents::register(tx, aggregate_id, &id, form, &now)?;

    let revision = Revision {
        id,
        aggregate_id: aggregate_id.to_string(),
        created_at: now.clone(),
        updated_at: now,
        form_data: form.clone(),
        documents,
        submit_info: None,
        unlock_info: None,
        previous_revision_id: None,
    };
    store::put(tx, &kind.revision_key(&revision.id), &revision)?;

    Ok(revision)
}

fn update_draft<F: FormData>(
    tx: &TransactionalTree,
    kind: AggregateKind,
    aggregate_id: &str,
    lineage: &Lineage,
    form: &F,
) -> Tx<Revision<F>> {
    let Some(draft_id) = lineage.draft_revision_id.as_deref() else {
        return invalid_state(tx, kind, aggregate_id, lineage, "update");
    };
    let mut draft: Revision<F> =
        store::require(tx, &kind.revision_key(draft_id), kind.revision_label(), draft_id)?;

    let now = TimeStamp::new();
    draft.documents = documents::register(tx, aggregate_id, &draft.id, form, &now)?;
    draft.form_data = form.clone();
    draft.updated_at = now;
    store::put(tx, &kind.revision_key(&draft.id), &draft)?;

    Ok(draft)
}

/// Attach the submission record to the draft and append it to the sealed history.
fn seal<F: FormData>(
    tx: &TransactionalTree,
    kind: AggregateKind,
    aggregate_id: &str,
    lineage: &mut Lineage,
    info: &UpdateInfo,
    submission_id: &str,
) -> Tx<Revision<F>> {
    let Some(draft_id) = lineage.draft_revision_id.take() else {
        return invalid_state(tx, kind, aggregate_id, lineage, "submit");
    };
    let mut draft: Revision<F> =
        store::require(tx, &kind.revision_key(&draft_id), kind.revision_label(), &draft_id)?;

    draft.submit_info = Some(info.clone());
    draft.updated_at = info.updated_at.clone();
    store::put(tx, &kind.revision_key(&draft.id), &draft)?;

    lineage.revision_ids.push(draft.id.clone());
    lineage.submission_ids.push(submission_id.to_string());

    Ok(draft)
}

/// Record the unlock on the latest sealed revision and open a copy of it as the new draft.
fn reopen<F: FormData>(
    tx: &TransactionalTree,
    kind: AggregateKind,
    aggregate_id: &str,
    lineage: &mut Lineage,
    info: &UpdateInfo,
) -> Tx<Revision<F>> {
    let Some(latest_id) = lineage.latest_sealed().map(str::to_string) else {
        return invalid_state(tx, kind, aggregate_id, lineage, "unlock");
    };
    let mut latest: Revision<F> =
        store::require(tx, &kind.revision_key(&latest_id), kind.revision_label(), &latest_id)?;

    latest.unlock_info = Some(info.clone());
    store::put(tx, &kind.revision_key(&latest.id), &latest)?;

    let draft = Revision {
        id: store::new_id(kind.revision_prefix())?,
        aggregate_id: aggregate_id.to_string(),
        created_at: info.updated_at.clone(),
        updated_at: info.updated_at.clone(),
        form_data: latest.form_data.clone(),
        documents: latest.documents.clone(),
        submit_info: None,
        unlock_info: Some(info.clone()),
        previous_revision_id: Some(latest.id.clone()),
    };
    store::put(tx, &kind.revision_key(&draft.id), &draft)?;
    lineage.draft_revision_id = Some(draft.id.clone());

    Ok(draft)
}

pub(crate) fn create_contract(
    tx: &TransactionalTree,
    state_code: &str,
    form: &ContractFormData,
) -> Tx<ContractRecord> {
    let id = store::new_id(AggregateKind::Contract.id_prefix())?;
    let draft = new_draft(tx, AggregateKind::Contract, &id, form)?;

    let record = ContractRecord {
        id,
        state_code: state_code.to_string(),
        created_at: draft.created_at.clone(),
        lineage: Lineage {
            draft_revision_id: Some(draft.id),
            ..Lineage::default()
        },
        rate_ids: vec![],
    };
    store::put(tx, &keys::contract(&record.id), &record)?;

    Ok(record)
}

pub(crate) fn create_rate(
    tx: &TransactionalTree,
    state_code: &str,
    form: &RateFormData,
    parent_contract_id: Option<&str>,
) -> Tx<RateRecord> {
    let id = store::new_id(AggregateKind::Rate.id_prefix())?;
    let draft = new_draft(tx, AggregateKind::Rate, &id, form)?;

    let record = RateRecord {
        id,
        state_code: state_code.to_string(),
        created_at: draft.created_at.clone(),
        lineage: Lineage {
            draft_revision_id: Some(draft.id),
            ..Lineage::default()
        },
        parent_contract_id: parent_contract_id.map(str::to_string),
        linked_contract_ids: vec![],
        package_ids: vec![],
    };
    store::put(tx, &keys::rate(&record.id), &record)?;

    Ok(record)
}

pub(crate) fn update_contract_draft(
    tx: &TransactionalTree,
    contract_id: &str,
    expected: Option<&str>,
    form: &ContractFormData,
) -> Tx<ContractRevision> {
    let contract: ContractRecord =
        store::require(tx, &keys::contract(contract_id), "contract", contract_id)?;
    check_head(&contract.lineage, contract_id, expected)?;

    if form.submission_type == SubmissionType::ContractOnly && !contract.rate_ids.is_empty() {
        return store::abort(Error::validation(format!(
            "contract {contract_id} still links {} rate(s) and cannot become contract-only",
            contract.rate_ids.len()
        )));
    }

    update_draft(tx, AggregateKind::Contract, contract_id, &contract.lineage, form)
}

pub(crate) fn update_rate_draft(
    tx: &TransactionalTree,
    rate_id: &str,
    expected: Option<&str>,
    form: &RateFormData,
) -> Tx<RateRevision> {
    let rate: RateRecord = store::require(tx, &keys::rate(rate_id), "rate", rate_id)?;
    check_head(&rate.lineage, rate_id, expected)?;

    update_draft(tx, AggregateKind::Rate, rate_id, &rate.lineage, form)
}

/// Create a brand-new rate owned by the contract and link it into the contract's draft.
pub(crate) fn add_new_rate(
    tx: &TransactionalTree,
    contract_id: &str,
    expected: Option<&str>,
    form: &RateFormData,
) -> Tx<RateRecord> {
    let mut contract: ContractRecord =
        store::require(tx, &keys::contract(contract_id), "contract", contract_id)?;
    check_head(&contract.lineage, contract_id, expected)?;

    let mut rate = create_rate(tx, &contract.state_code, form, Some(contract_id))?;
    linking::link(tx, &mut contract, &mut rate)?;

    Ok(rate)
}

pub(crate) fn link_rate(
    tx: &TransactionalTree,
    contract_id: &str,
    expected: Option<&str>,
    rate_id: &str,
) -> Tx<()> {
    let mut contract: ContractRecord =
        store::require(tx, &keys::contract(contract_id), "contract", contract_id)?;
    check_head(&contract.lineage, contract_id, expected)?;
    let mut rate: RateRecord = store::require(tx, &keys::rate(rate_id), "rate", rate_id)?;

    linking::link(tx, &mut contract, &mut rate)
}

pub(crate) fn unlink_rate(
    tx: &TransactionalTree,
    contract_id: &str,
    expected: Option<&str>,
    rate_id: &str,
) -> Tx<()> {
    let mut contract: ContractRecord =
        store::require(tx, &keys::contract(contract_id), "contract", contract_id)?;
    check_head(&contract.lineage, contract_id, expected)?;
    let mut rate: RateRecord = store::require(tx, &keys::rate(rate_id), "rate", rate_id)?;

    linking::unlink(tx, &mut contract, &mut rate)
}

enum RatePlan {
    // a child rate with its own draft, sealed along with the contract
    Seal(RateRecord),
    // any other rate, captured at its latest sealed revision
    Capture { rate_id: String, revision_id: String },
}

pub(crate) fn submit_contract(
    tx: &TransactionalTree,
    ctx: &Transition<'_>,
    contract_id: &str,
    expected: Option<&str>,
    reason: Option<&str>,
) -> Tx<SubmitResult> {
    let mut contract: ContractRecord =
        store::require(tx, &keys::contract(contract_id), "contract", contract_id)?;
    check_head(&contract.lineage, contract_id, expected)?;
    let status = current_status(tx, AggregateKind::Contract, &contract.lineage)?;
    let draft_id = match contract.lineage.draft_revision_id.clone() {
        Some(draft_id) if status.can_submit() => draft_id,
        _ => {
            return nothing_to_submit(
                tx,
                AggregateKind::Contract,
                contract_id,
                &contract.lineage,
                expected,
            );
        }
    };
    let reason = submit_reason(&contract.lineage, reason, ctx.config)?;

    let draft: ContractRevision = store::require(
        tx,
        &keys::contract_revision(&draft_id),
        "contract revision",
        &draft_id,
    )?;
    let mut reasons = ctx
        .rules
        .check_contract(&draft.form_data, contract.rate_ids.len())
        .scoped("contract");

    let mut plans = Vec::with_capacity(contract.rate_ids.len());
    for rate_id in &contract.rate_ids {
        let rate: RateRecord = store::require(tx, &keys::rate(rate_id), "rate", rate_id)?;
        let is_child = rate.parent_contract_id.as_deref() == Some(contract_id);

        match (rate.lineage.draft_revision_id.clone(), is_child) {
            (Some(rate_draft_id), true) => {
                let rate_draft: RateRevision = store::require(
                    tx,
                    &keys::rate_revision(&rate_draft_id),
                    "rate revision",
                    &rate_draft_id,
                )?;
                reasons.extend(
                    ctx.rules
                        .check_rate(&rate_draft.form_data)
                        .scoped(&format!("rate {rate_id}")),
                );
                plans.push(RatePlan::Seal(rate));
            }
            _ => match rate.lineage.latest_sealed() {
                Some(revision_id) => plans.push(RatePlan::Capture {
                    rate_id: rate_id.clone(),
                    revision_id: revision_id.to_string(),
                }),
                None => reasons.push(format!("rate {rate_id}: has never been submitted")),
            },
        }
    }

    if !reasons.is_empty() {
        return store::abort(Error::ValidationFailed { reasons });
    }

    let info = UpdateInfo::new(ctx.actor, &reason);
    let submission_id = store::new_id("sub_")?;
    let sealed: ContractRevision = seal(
        tx,
        AggregateKind::Contract,
        contract_id,
        &mut contract.lineage,
        &info,
        &submission_id,
    )?;

    let mut jobs = Vec::new();
    let mut captured = Vec::with_capacity(plans.len());
    for plan in plans {
        match plan {
            RatePlan::Seal(mut rate) => {
                let rate_revision: RateRevision = seal(
                    tx,
                    AggregateKind::Rate,
                    &rate.id,
                    &mut rate.lineage,
                    &info,
                    &submission_id,
                )?;
                store::put(tx, &keys::rate(&rate.id), &rate)?;
                jobs.extend(bundle::enqueue(tx, AggregateKind::Rate, &rate_revision)?);
                captured.push((rate.id, rate_revision.id));
            }
            RatePlan::Capture {
                rate_id,
                revision_id,
            } => captured.push((rate_id, revision_id)),
        }
    }

    let package_ids = linking::record_packages(
        tx,
        &submission_id,
        contract_id,
        &sealed.id,
        &captured,
        &info.updated_at,
    )?;
    let submission = Submission {
        id: submission_id.clone(),
        scope: SubmissionScope::Contract {
            contract_id: contract_id.to_string(),
        },
        submit_info: info,
        contract_revision_id: Some(sealed.id.clone()),
        rate_revision_ids: captured.into_iter().map(|(_, revision)| revision).collect(),
        package_ids,
    };
    store::put(tx, &keys::submission(&submission.id), &submission)?;
    store::put(tx, &keys::contract(contract_id), &contract)?;

    jobs.extend(bundle::enqueue(tx, AggregateKind::Contract, &sealed)?);

    Ok(SubmitResult {
        submission_id,
        jobs,
    })
}

/// Unlock a submitted contract, and with it every child rate that is currently sealed.
pub(crate) fn unlock_contract(
    tx: &TransactionalTree,
    ctx: &Transition<'_>,
    contract_id: &str,
    expected: Option<&str>,
    reason: &str,
) -> Tx<Vec<String>> {
    let mut contract: ContractRecord =
        store::require(tx, &keys::contract(contract_id), "contract", contract_id)?;
    check_head(&contract.lineage, contract_id, expected)?;
    if !current_status(tx, AggregateKind::Contract, &contract.lineage)?.can_unlock() {
        return invalid_state(tx, AggregateKind::Contract, contract_id, &contract.lineage, "unlock");
    }
    let reason = unlock_reason(reason)?;
    let info = UpdateInfo::new(ctx.actor, &reason);

    reopen::<ContractFormData>(
        tx,
        AggregateKind::Contract,
        contract_id,
        &mut contract.lineage,
        &info,
    )?;

    let mut unlocked_rates = Vec::new();
    for rate_id in &contract.rate_ids {
        let mut rate: RateRecord = store::require(tx, &keys::rate(rate_id), "rate", rate_id)?;
        let is_child = rate.parent_contract_id.as_deref() == Some(contract_id);
        if is_child && current_status(tx, AggregateKind::Rate, &rate.lineage)?.can_unlock() {
            reopen::<RateFormData>(tx, AggregateKind::Rate, rate_id, &mut rate.lineage, &info)?;
            store::put(tx, &keys::rate(rate_id), &rate)?;
            unlocked_rates.push(rate_id.clone());
        }
    }

    store::put(tx, &keys::contract(contract_id), &contract)?;

    Ok(unlocked_rates)
}

/// Submit a rate on its own. No contract's package history is touched.
pub(crate) fn submit_rate(
    tx: &TransactionalTree,
    ctx: &Transition<'_>,
    rate_id: &str,
    expected: Option<&str>,
    reason: Option<&str>,
) -> Tx<SubmitResult> {
    let mut rate: RateRecord = store::require(tx, &keys::rate(rate_id), "rate", rate_id)?;
    check_head(&rate.lineage, rate_id, expected)?;
    let status = current_status(tx, AggregateKind::Rate, &rate.lineage)?;
    let draft_id = match rate.lineage.draft_revision_id.clone() {
        Some(draft_id) if status.can_submit() => draft_id,
        _ => return nothing_to_submit(tx, AggregateKind::Rate, rate_id, &rate.lineage, expected),
    };
    let reason = submit_reason(&rate.lineage, reason, ctx.config)?;

    let draft: RateRevision =
        store::require(tx, &keys::rate_revision(&draft_id), "rate revision", &draft_id)?;
    let verdict = ctx.rules.check_rate(&draft.form_data);
    if !verdict.is_pass() {
        return store::abort(Error::ValidationFailed {
            reasons: verdict.scoped(&format!("rate {rate_id}")),
        });
    }

    let info = UpdateInfo::new(ctx.actor, &reason);
    let submission_id = store::new_id("sub_")?;
    let sealed: RateRevision = seal(
        tx,
        AggregateKind::Rate,
        rate_id,
        &mut rate.lineage,
        &info,
        &submission_id,
    )?;
    store::put(tx, &keys::rate(rate_id), &rate)?;

    let submission = Submission {
        id: submission_id.clone(),
        scope: SubmissionScope::Rate {
            rate_id: rate_id.to_string(),
        },
        submit_info: info,
        contract_revision_id: None,
        rate_revision_ids: vec![sealed.id.clone()],
        package_ids: vec![],
    };
    store::put(tx, &keys::submission(&submission.id), &submission)?;

    let jobs = bundle::enqueue(tx, AggregateKind::Rate, &sealed)?;

    Ok(SubmitResult {
        submission_id,
        jobs,
    })
}

pub(crate) fn unlock_rate(
    tx: &TransactionalTree,
    ctx: &Transition<'_>,
    rate_id: &str,
    expected: Option<&str>,
    reason: &str,
) -> Tx<()> {
    let mut rate: RateRecord = store::require(tx, &keys::rate(rate_id), "rate", rate_id)?;
    check_head(&rate.lineage, rate_id, expected)?;
    if !current_status(tx, AggregateKind::Rate, &rate.lineage)?.can_unlock() {
        return invalid_state(tx, AggregateKind::Rate, rate_id, &rate.lineage, "unlock");
    }
    let reason = unlock_reason(reason)?;
    let info = UpdateInfo::new(ctx.actor, &reason);

    reopen::<RateFormData>(tx, AggregateKind::Rate, rate_id, &mut rate.lineage, &info)?;
    store::put(tx, &keys::rate(rate_id), &rate)
}
