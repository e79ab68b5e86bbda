//! Smoke Screen Unit tests for package review components
//!
//! Unit tests that span the public API, testing behavior in isolation from
//! the integration scenarios. These are intended as smoke-screen and generally
//! test the happy-path.

mod common;

use package_review::utils::new_uuid_to_bech32;

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Identifiers carry their human-readable prefix
    #[test]
    fn generates_prefixed_ids() {
        for prefix in ["contract_", "rate_", "crev_", "rrev_", "sub_", "pkg_", "doc_"] {
            let id = new_uuid_to_bech32(prefix).unwrap();
            assert!(id.starts_with(&format!("{prefix}1")));
        }
    }

    #[test]
    fn ids_are_unique() {
        let a = new_uuid_to_bech32("contract_").unwrap();
        let b = new_uuid_to_bech32("contract_").unwrap();
        assert_ne!(a, b);
    }
}

// SERVICE TESTS
#[cfg(test)]
mod service_tests {
    use std::sync::Arc;

    use super::common::{contract_form, harness, rate_form};
    use package_review::{
        ErrorCode, PackageService,
        blob::SledBlobStore,
        config::{BlobConfig, ServiceConfig},
        documents::DocumentKind,
        status::Status,
        validation::StandardRules,
    };

    #[test]
    fn upload_records_hash_and_locator() {
        let h = harness("smoke_upload").unwrap();
        let doc = h.service.upload_document("rates.pdf", b"rate tables").unwrap();

        assert_eq!(doc.name, "rates.pdf");
        assert_eq!(doc.sha256, sha256::digest(b"rate tables".as_slice()));
        assert!(doc.s3_key.ends_with("/rates.pdf"));
    }

    #[test]
    fn new_contract_is_a_draft() {
        let h = harness("smoke_contract").unwrap();
        let form = contract_form(&h.service).unwrap();
        let view = h.service.create_contract("MN", form.clone()).unwrap();

        assert_eq!(view.status, Status::Draft);
        assert_eq!(view.state_code, "MN");
        assert!(view.revisions.is_empty());
        assert!(view.id.starts_with("contract_1"));

        let draft = view.draft_revision.unwrap();
        assert_eq!(draft.form_data, form);
        assert_eq!(draft.documents.len(), 2);
        assert_eq!(draft.documents[0].kind, DocumentKind::Contract);
        assert_eq!(draft.documents[1].kind, DocumentKind::Supporting);
    }

    #[test]
    fn document_keeps_its_first_added_time() {
        let h = harness("smoke_documents").unwrap();
        let form = rate_form(&h.service, "rates").unwrap();
        let view = h.service.create_rate("MN", form.clone()).unwrap();
        let first = view.draft_revision.unwrap().documents[0].clone();

        let renamed = form.set_certification_name("renamed");
        let view = h.service.update_rate_draft(&view.id, None, renamed).unwrap();
        let again = view.draft_revision.unwrap().documents[0].clone();

        assert_eq!(again.id, first.id);
        assert_eq!(again.added_at, first.added_at);
    }

    #[test]
    fn standalone_rate_submits() {
        let h = harness("smoke_rate").unwrap();
        let rate = h
            .service
            .create_rate("MN", rate_form(&h.service, "rates").unwrap())
            .unwrap();

        let submitted = h.service.submit_rate(&rate.id, None, "actuary@firm.com", None).unwrap();
        assert_eq!(submitted.view.status, Status::Submitted);
        assert!(submitted.bundles.failures.is_empty());
        assert!(h.service.verify_bundle(&submitted.view.revisions[0].id, DocumentKind::Rate).unwrap());
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let h = harness("smoke_missing").unwrap();

        let err = h.service.fetch_rate("rate_1nothing").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        let err = h
            .service
            .fetch_bundle("crev_1nothing", DocumentKind::Contract)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn huge_url_ttl_fails_instead_of_overflowing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("ttl.db")).unwrap());
        let config = ServiceConfig {
            blobs: BlobConfig {
                url_ttl_secs: i64::MAX as u64,
                ..BlobConfig::default()
            },
            ..ServiceConfig::default()
        };

        let err = PackageService::open(db.clone(), config.clone()).err().unwrap();
        assert_eq!(err.code(), ErrorCode::Internal);

        // a service assembled by hand skips config validation, so the blob
        // store has to refuse the expiry itself
        let blobs = SledBlobStore::open(&db, config.blobs.clone()).unwrap();
        let service = PackageService::new(db, Arc::new(blobs), Arc::new(StandardRules), config);
        let rate = service
            .create_rate("MN", rate_form(&service, "rates").unwrap())
            .unwrap();
        let submitted = service.submit_rate(&rate.id, None, "actuary@firm.com", None).unwrap();

        let err = service
            .fetch_bundle(&submitted.view.revisions[0].id, DocumentKind::Rate)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
    }
}
