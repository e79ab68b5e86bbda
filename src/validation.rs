//! Pluggable completeness rules consulted at submit time
use chrono::Utc;

use super::form::{ContractFormData, RateFormData, RateType, SubmissionType, TimeStamp};

/// Outcome of a rule check. An empty reason list is a pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub reasons: Vec<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self::default()
    }
    pub fn require(&mut self, holds: bool, reason: &str) {
        if !holds {
            self.reasons.push(reason.to_string());
        }
    }
    pub fn is_pass(&self) -> bool {
        self.reasons.is_empty()
    }
    /// Prefix each reason with the subject it was raised against.
    pub fn scoped(self, subject: &str) -> Vec<String> {
        self.reasons
            .into_iter()
            .map(|reason| format!("{subject}: {reason}"))
            .collect()
    }
}

pub trait ValidationRules: Send + Sync {
    fn check_contract(&self, form: &ContractFormData, linked_rates: usize) -> Verdict;
    fn check_rate(&self, form: &RateFormData) -> Verdict;
}

/// Checks if the predicate `start <= end` holds, with both dates present
pub fn dates_ordered(start: Option<&TimeStamp<Utc>>, end: Option<&TimeStamp<Utc>>) -> bool {
    match (start, end) {
        (Some(start), Some(end)) => start.to_datetime_utc() <= end.to_datetime_utc(),
        _ => false,
    }
}

/// The default rule set: required fields, documents and date ordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardRules;

impl ValidationRules for StandardRules {
    fn check_contract(&self, form: &ContractFormData, linked_rates: usize) -> Verdict {
        let mut verdict = Verdict::pass();

        verdict.require(
            !form.submission_description.trim().is_empty(),
            "submission description is required",
        );
        verdict.require(!form.program_ids.is_empty(), "at least one program is required");
        verdict.require(form.contract_type.is_some(), "contract type is required");
        verdict.require(
            form.contract_execution_status.is_some(),
            "contract execution status is required",
        );
        verdict.require(
            form.contract_date_start.is_some() && form.contract_date_end.is_some(),
            "contract start and end dates are required",
        );
        if form.contract_date_start.is_some() && form.contract_date_end.is_some() {
            verdict.require(
                dates_ordered(
                    form.contract_date_start.as_ref(),
                    form.contract_date_end.as_ref(),
                ),
                "contract start date must not be after its end date",
            );
        }
        verdict.require(
            !form.managed_care_entities.is_empty(),
            "at least one managed care entity is required",
        );
        verdict.require(
            !form.federal_authorities.is_empty(),
            "at least one federal authority is required",
        );
        verdict.require(
            !form.contract_documents.is_empty(),
            "at least one contract document is required",
        );
        verdict.require(
            !form.state_contacts.is_empty(),
            "at least one state contact is required",
        );

        match form.submission_type {
            SubmissionType::ContractOnly => verdict.require(
                linked_rates == 0,
                "contract-only submissions cannot carry rates",
            ),
            SubmissionType::ContractAndRates => verdict.require(
                linked_rates > 0,
                "contract and rates submissions need at least one rate",
            ),
        }

        verdict
    }

    fn check_rate(&self, form: &RateFormData) -> Verdict {
        let mut verdict = Verdict::pass();

        verdict.require(form.rate_type.is_some(), "rate type is required");
        verdict.require(
            !form.rate_program_ids.is_empty(),
            "at least one rate program is required",
        );
        verdict.require(
            dates_ordered(form.rate_date_start.as_ref(), form.rate_date_end.as_ref()),
            "rate start and end dates are required and must be ordered",
        );
        verdict.require(
            form.rate_date_certified.is_some(),
            "rate certification date is required",
        );
        if form.rate_type == Some(RateType::Amendment) {
            verdict.require(
                dates_ordered(
                    form.amendment_effective_date_start.as_ref(),
                    form.amendment_effective_date_end.as_ref(),
                ),
                "amendment effective dates are required and must be ordered",
            );
        }
        verdict.require(
            !form.rate_documents.is_empty(),
            "at least one rate document is required",
        );
        verdict.require(
            !form.certifying_actuary_contacts.is_empty(),
            "a certifying actuary is required",
        );

        verdict
    }
}
