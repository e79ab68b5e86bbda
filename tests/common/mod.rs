//! Fixtures shared by the integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use package_review::{
    PackageService,
    blob::{BlobStore, SledBlobStore},
    config::ServiceConfig,
    form::{
        ActuaryContact, ContractFormData, ContractType, ExecutionStatus, RateFormData, RateType,
        StateContact, SubmissionType, TimeStamp,
    },
    validation::StandardRules,
};
use tempfile::{TempDir, tempdir};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A service over its own database. Sled locks the database file, so every
/// test gets a fresh one in a temp directory that is removed on drop.
pub struct Harness {
    pub service: PackageService,
    pub db: Arc<sled::Db>,
    _dir: TempDir,
}

pub fn harness(name: &str) -> anyhow::Result<Harness> {
    harness_with(name, ServiceConfig::default())
}

pub fn harness_with(name: &str, config: ServiceConfig) -> anyhow::Result<Harness> {
    init_tracing();
    let dir = tempdir()?;
    let db = Arc::new(sled::open(dir.path().join(format!("{name}.db")))?);
    let service = PackageService::open(db.clone(), config)?;

    Ok(Harness {
        service,
        db,
        _dir: dir,
    })
}

/// Blob store whose archive writes can be switched to fail.
pub struct FlakyBlobStore {
    inner: SledBlobStore,
    pub fail_archives: AtomicBool,
}

impl FlakyBlobStore {
    pub fn set_failing(&self, failing: bool) {
        self.fail_archives.store(failing, Ordering::SeqCst);
    }
}

impl BlobStore for FlakyBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> package_review::Result<String> {
        if key.starts_with("zips/") && self.fail_archives.load(Ordering::SeqCst) {
            return Err(package_review::Error::Blob("blob store unavailable".into()));
        }
        self.inner.put(key, bytes)
    }

    fn get(&self, locator: &str) -> package_review::Result<Vec<u8>> {
        self.inner.get(locator)
    }

    fn signed_url(&self, locator: &str, ttl: Duration) -> package_review::Result<String> {
        self.inner.signed_url(locator, ttl)
    }
}

pub fn flaky_harness(name: &str) -> anyhow::Result<(Harness, Arc<FlakyBlobStore>)> {
    init_tracing();
    let dir = tempdir()?;
    let db = Arc::new(sled::open(dir.path().join(format!("{name}.db")))?);
    let config = ServiceConfig::default();

    let blobs = Arc::new(FlakyBlobStore {
        inner: SledBlobStore::open(&db, config.blobs.clone())?,
        fail_archives: AtomicBool::new(false),
    });
    let service = PackageService::new(db.clone(), blobs.clone(), Arc::new(StandardRules), config);

    Ok((
        Harness {
            service,
            db,
            _dir: dir,
        },
        blobs,
    ))
}

pub fn date(year: i32, month: u32, day: u32) -> TimeStamp<Utc> {
    TimeStamp::ymd(year, month, day).expect("valid calendar date")
}

/// A contract draft that passes the standard rules once a rate is linked.
pub fn contract_form(service: &PackageService) -> anyhow::Result<ContractFormData> {
    let contract = service.upload_document("contract.pdf", b"executed contract")?;
    let budget = service.upload_document("budget.xlsx", b"budget workbook")?;

    Ok(ContractFormData::new()
        .set_submission_type(SubmissionType::ContractAndRates)
        .set_description("Managed care contract for calendar year 2025")
        .add_program("snbc")
        .set_contract_type(ContractType::Base)
        .set_execution_status(ExecutionStatus::Executed)
        .set_dates(date(2025, 1, 1), date(2025, 12, 31))
        .add_managed_care_entity("MCO")
        .add_federal_authority("STATE_PLAN")
        .set_risk_based(true)
        .add_contract_document(contract)
        .add_supporting_document(budget)
        .add_state_contact(StateContact {
            name: "State Contact".into(),
            title_role: "Program Manager".into(),
            email: "contact@state.gov".into(),
        }))
}

pub fn rate_form(service: &PackageService, certification: &str) -> anyhow::Result<RateFormData> {
    let rates = service.upload_document(&format!("{certification}.pdf"), certification.as_bytes())?;

    Ok(RateFormData::new()
        .set_rate_type(RateType::New)
        .set_certification_name(certification)
        .add_program("snbc")
        .set_dates(date(2025, 1, 1), date(2025, 12, 31))
        .set_date_certified(date(2024, 12, 1))
        .add_rate_document(rates)
        .add_actuary(ActuaryContact {
            name: "Certifying Actuary".into(),
            title_role: "Principal".into(),
            email: "actuary@firm.com".into(),
            actuarial_firm: Some("Mercer".into()),
        }))
}
