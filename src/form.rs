//! Form data carried by contract and rate revisions
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use super::documents::{DocumentInput, DocumentKind};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// Midnight UTC on the given calendar date, `None` if the date does not exist.
    pub fn ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Shape shared by the form payloads of both aggregate kinds.
pub trait FormData:
    Clone + fmt::Debug + PartialEq + minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()>
{
    /// Document kinds this form carries, in bundle order.
    const DOCUMENT_KINDS: &'static [DocumentKind];

    fn documents(&self, kind: DocumentKind) -> &[DocumentInput];
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubmissionType {
    #[n(0)]
    ContractOnly,
    #[default]
    #[n(1)]
    ContractAndRates,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractType {
    #[n(0)]
    Base,
    #[n(1)]
    Amendment,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    #[n(0)]
    Executed,
    #[n(1)]
    Unexecuted,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateType {
    #[n(0)]
    New,
    #[n(1)]
    Amendment,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct StateContact {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub title_role: String,
    #[n(2)]
    pub email: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct ActuaryContact {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub title_role: String,
    #[n(2)]
    pub email: String,
    #[n(3)]
    pub actuarial_firm: Option<String>,
}

// Also used for constructing drafts
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractFormData {
    #[n(0)]
    pub submission_type: SubmissionType,
    #[n(1)]
    pub submission_description: String,
    #[n(2)]
    pub program_ids: Vec<String>,
    #[n(3)]
    pub contract_type: Option<ContractType>,
    #[n(4)]
    pub contract_execution_status: Option<ExecutionStatus>,
    #[n(5)]
    pub contract_date_start: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub contract_date_end: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub managed_care_entities: Vec<String>,
    #[n(8)]
    pub federal_authorities: Vec<String>,
    #[n(9)]
    pub risk_based_contract: Option<bool>,
    #[n(10)]
    pub contract_documents: Vec<DocumentInput>,
    #[n(11)]
    pub supporting_documents: Vec<DocumentInput>,
    #[n(12)]
    pub state_contacts: Vec<StateContact>,
}

impl ContractFormData {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_submission_type(mut self, submission_type: SubmissionType) -> Self {
        self.submission_type = submission_type;
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.submission_description = description.to_string();
        self
    }
    pub fn add_program(mut self, program_id: &str) -> Self {
        self.program_ids.push(program_id.to_string());
        self
    }
    pub fn set_contract_type(mut self, contract_type: ContractType) -> Self {
        self.contract_type = Some(contract_type);
        self
    }
    pub fn set_execution_status(mut self, status: ExecutionStatus) -> Self {
        self.contract_execution_status = Some(status);
        self
    }
    pub fn set_dates(mut self, start: TimeStamp<Utc>, end: TimeStamp<Utc>) -> Self {
        self.contract_date_start = Some(start);
        self.contract_date_end = Some(end);
        self
    }
    pub fn add_managed_care_entity(mut self, entity: &str) -> Self {
        self.managed_care_entities.push(entity.to_string());
        self
    }
    pub fn add_federal_authority(mut self, authority: &str) -> Self {
        self.federal_authorities.push(authority.to_string());
        self
    }
    pub fn set_risk_based(mut self, risk_based: bool) -> Self {
        self.risk_based_contract = Some(risk_based);
        self
    }
    pub fn add_contract_document(mut self, document: DocumentInput) -> Self {
        self.contract_documents.push(document);
        self
    }
    pub fn add_supporting_document(mut self, document: DocumentInput) -> Self {
        self.supporting_documents.push(document);
        self
    }
    pub fn add_state_contact(mut self, contact: StateContact) -> Self {
        self.state_contacts.push(contact);
        self
    }
}

impl FormData for ContractFormData {
    const DOCUMENT_KINDS: &'static [DocumentKind] =
        &[DocumentKind::Contract, DocumentKind::Supporting];

    fn documents(&self, kind: DocumentKind) -> &[DocumentInput] {
        match kind {
            DocumentKind::Contract => &self.contract_documents,
            DocumentKind::Supporting => &self.supporting_documents,
            DocumentKind::Rate => &[],
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct RateFormData {
    #[n(0)]
    pub rate_type: Option<RateType>,
    #[n(1)]
    pub rate_certification_name: Option<String>,
    #[n(2)]
    pub rate_date_start: Option<TimeStamp<Utc>>,
    #[n(3)]
    pub rate_date_end: Option<TimeStamp<Utc>>,
    #[n(4)]
    pub rate_date_certified: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub amendment_effective_date_start: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub amendment_effective_date_end: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub rate_program_ids: Vec<String>,
    #[n(8)]
    pub rate_documents: Vec<DocumentInput>,
    #[n(9)]
    pub supporting_documents: Vec<DocumentInput>,
    #[n(10)]
    pub certifying_actuary_contacts: Vec<ActuaryContact>,
}

impl RateFormData {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_rate_type(mut self, rate_type: RateType) -> Self {
        self.rate_type = Some(rate_type);
        self
    }
    pub fn set_certification_name(mut self, name: &str) -> Self {
        self.rate_certification_name = Some(name.to_string());
        self
    }
    pub fn set_dates(mut self, start: TimeStamp<Utc>, end: TimeStamp<Utc>) -> Self {
        self.rate_date_start = Some(start);
        self.rate_date_end = Some(end);
        self
    }
    pub fn set_date_certified(mut self, date: TimeStamp<Utc>) -> Self {
        self.rate_date_certified = Some(date);
        self
    }
    pub fn set_amendment_dates(mut self, start: TimeStamp<Utc>, end: TimeStamp<Utc>) -> Self {
        self.amendment_effective_date_start = Some(start);
        self.amendment_effective_date_end = Some(end);
        self
    }
    pub fn add_program(mut self, program_id: &str) -> Self {
        self.rate_program_ids.push(program_id.to_string());
        self
    }
    pub fn add_rate_document(mut self, document: DocumentInput) -> Self {
        self.rate_documents.push(document);
        self
    }
    pub fn add_supporting_document(mut self, document: DocumentInput) -> Self {
        self.supporting_documents.push(document);
        self
    }
    pub fn add_actuary(mut self, contact: ActuaryContact) -> Self {
        self.certifying_actuary_contacts.push(contact);
        self
    }
}

impl FormData for RateFormData {
    const DOCUMENT_KINDS: &'static [DocumentKind] = &[DocumentKind::Rate, DocumentKind::Supporting];

    fn documents(&self, kind: DocumentKind) -> &[DocumentInput] {
        match kind {
            DocumentKind::Rate => &self.rate_documents,
            DocumentKind::Supporting => &self.supporting_documents,
            DocumentKind::Contract => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn impossible_dates_are_none() {
        assert!(TimeStamp::ymd(2024, 2, 30).is_none());
        assert!(TimeStamp::ymd(2024, 2, 29).is_some());
    }

    #[test]
    fn form_documents_follow_kind() {
        let doc = DocumentInput::new("rates.pdf", "documents/rates.pdf", "abc");
        let rate = RateFormData::new().add_rate_document(doc.clone());

        assert_eq!(rate.documents(DocumentKind::Rate), &[doc]);
        assert!(rate.documents(DocumentKind::Contract).is_empty());
        assert!(rate.documents(DocumentKind::Supporting).is_empty());
    }
}
