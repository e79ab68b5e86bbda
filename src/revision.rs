//! Aggregate rows and the immutable revision snapshots they own
use std::fmt;

use chrono::Utc;

use super::documents::DocumentRecord;
use super::error::Error;
use super::form::{ContractFormData, RateFormData, TimeStamp};
use super::store::keys;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    #[n(0)]
    Contract,
    #[n(1)]
    Rate,
}

impl AggregateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateKind::Contract => "contract",
            AggregateKind::Rate => "rate",
        }
    }
    pub(crate) fn id_prefix(self) -> &'static str {
        match self {
            AggregateKind::Contract => "contract_",
            AggregateKind::Rate => "rate_",
        }
    }
    pub(crate) fn revision_prefix(self) -> &'static str {
        match self {
            AggregateKind::Contract => "crev_",
            AggregateKind::Rate => "rrev_",
        }
    }
    pub(crate) fn revision_key(self, id: &str) -> String {
        match self {
            AggregateKind::Contract => keys::contract_revision(id),
            AggregateKind::Rate => keys::rate_revision(id),
        }
    }
    pub(crate) fn revision_label(self) -> &'static str {
        match self {
            AggregateKind::Contract => "contract revision",
            AggregateKind::Rate => "rate revision",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who did what, when, and why. Used for both submission and unlock records.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    #[n(0)]
    pub updated_at: TimeStamp<Utc>,
    #[n(1)]
    pub updated_by: String,
    #[n(2)]
    pub reason: String,
}

impl UpdateInfo {
    pub fn new(updated_by: &str, reason: &str) -> Self {
        Self {
            updated_at: TimeStamp::new(),
            updated_by: updated_by.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// One snapshot of an aggregate's form data. Sealed once `submit_info` is set.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Revision<F> {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub aggregate_id: String,
    #[n(2)]
    pub created_at: TimeStamp<Utc>,
    #[n(3)]
    pub updated_at: TimeStamp<Utc>,
    #[n(4)]
    pub form_data: F,
    #[n(5)]
    pub documents: Vec<DocumentRecord>,
    #[n(6)]
    pub submit_info: Option<UpdateInfo>,
    // set on the draft an unlock produced, and once on the sealed revision it reopened
    #[n(7)]
    pub unlock_info: Option<UpdateInfo>,
    #[n(8)]
    pub previous_revision_id: Option<String>,
}

pub type ContractRevision = Revision<ContractFormData>;
pub type RateRevision = Revision<RateFormData>;

impl<F> Revision<F> {
    pub fn is_sealed(&self) -> bool {
        self.submit_info.is_some()
    }

    /// True when this sealed revision was reopened after it was submitted.
    pub fn unlocked_after_submit(&self) -> bool {
        match (&self.submit_info, &self.unlock_info) {
            (Some(submit), Some(unlock)) => {
                unlock.updated_at.to_datetime_utc() >= submit.updated_at.to_datetime_utc()
            }
            _ => false,
        }
    }
}

/// Ordered revision bookkeeping shared by contracts and rates.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    #[n(0)]
    pub revision_ids: Vec<String>, // sealed, oldest first
    #[n(1)]
    pub draft_revision_id: Option<String>,
    #[n(2)]
    pub submission_ids: Vec<String>, // oldest first
}

impl Lineage {
    pub fn latest_sealed(&self) -> Option<&str> {
        self.revision_ids.last().map(String::as_str)
    }

    /// The draft if one exists, otherwise the latest sealed revision.
    pub fn head(&self) -> Option<&str> {
        self.draft_revision_id
            .as_deref()
            .or_else(|| self.latest_sealed())
    }

    /// Optimistic version check against the caller's view of the head revision.
    pub fn check_head(&self, aggregate_id: &str, expected: Option<&str>) -> Result<(), Error> {
        match expected {
            Some(expected) if self.head() != Some(expected) => Err(Error::ConcurrentModification {
                id: aggregate_id.to_string(),
                expected: expected.to_string(),
                found: self.head().map(str::to_string),
            }),
            _ => Ok(()),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ContractRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub state_code: String,
    #[n(2)]
    pub created_at: TimeStamp<Utc>,
    #[n(3)]
    pub lineage: Lineage,
    #[n(4)]
    pub rate_ids: Vec<String>, // rates linked to the head revision, in position order
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct RateRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub state_code: String,
    #[n(2)]
    pub created_at: TimeStamp<Utc>,
    #[n(3)]
    pub lineage: Lineage,
    #[n(4)]
    pub parent_contract_id: Option<String>,
    #[n(5)]
    pub linked_contract_ids: Vec<String>, // contracts currently linking this rate
    #[n(6)]
    pub package_ids: Vec<String>, // package submissions that captured this rate
}
