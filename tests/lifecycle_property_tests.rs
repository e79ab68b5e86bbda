//! Property-based tests for status synthesis and lifecycle invariants
//!
//! Status is checked as a pure function of revision history shape, then
//! random submit/unlock/edit sequences are replayed against a real service
//! and compared with a small model of the lifecycle after every step.

mod common;

use common::{harness, rate_form};
use package_review::{ErrorCode, status::Status, status::derive_status};
use proptest::prelude::*;

// PROPERTY TEST STRATEGIES

#[derive(Debug, Clone)]
enum Step {
    Submit,
    Unlock,
    Edit(String),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Submit),
        Just(Step::Unlock),
        "[a-z]{1,12}".prop_map(Step::Edit),
    ]
}

/// Expected shape of a rate's history after a sequence of accepted steps
#[derive(Debug, Default)]
struct Model {
    sealed: usize,
    has_draft: bool,
}

impl Model {
    fn status(&self) -> Status {
        derive_status(self.sealed, self.has_draft, self.sealed > 0 && self.has_draft)
    }
}

proptest! {
    #[test]
    fn never_submitted_is_always_draft(has_draft in any::<bool>(), reopened in any::<bool>()) {
        prop_assert_eq!(derive_status(0, has_draft, reopened), Status::Draft);
    }

    #[test]
    fn settled_history_counts_submissions(sealed in 1usize..50, reopened in any::<bool>()) {
        // without a draft, an old unlock record does not make it unlocked
        let status = derive_status(sealed, false, reopened);
        if sealed == 1 {
            prop_assert_eq!(status, Status::Submitted);
        } else {
            prop_assert_eq!(status, Status::Resubmitted);
        }
    }

    #[test]
    fn reopened_draft_is_unlocked(sealed in 1usize..50) {
        prop_assert_eq!(derive_status(sealed, true, true), Status::Unlocked);
        prop_assert!(derive_status(sealed, true, true).can_submit());
        prop_assert!(!derive_status(sealed, false, false).can_submit());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn replayed_steps_match_the_model(steps in prop::collection::vec(step_strategy(), 1..10)) {
        let h = harness("replayed_steps").unwrap();
        let service = &h.service;

        let rate = service.create_rate("MN", rate_form(service, "rates").unwrap()).unwrap();
        let mut model = Model { sealed: 0, has_draft: true };

        for step in steps {
            let before = service.fetch_rate(&rate.id).unwrap();
            let outcome = match &step {
                Step::Submit => service
                    .submit_rate(&rate.id, None, "actuary@firm.com", Some("resubmit"))
                    .map(|s| s.view),
                Step::Unlock => service.unlock_rate(&rate.id, None, "cms@hhs.gov", "revise"),
                Step::Edit(name) => {
                    let form = before
                        .draft_revision
                        .as_ref()
                        .map(|draft| draft.form_data.clone())
                        .unwrap_or_default()
                        .set_certification_name(name);
                    service.update_rate_draft(&rate.id, None, form)
                }
            };

            match (outcome, &step) {
                (Ok(view), Step::Submit) => {
                    prop_assert!(model.has_draft);
                    model.sealed += 1;
                    model.has_draft = false;
                    prop_assert_eq!(view.revisions.len(), before.revisions.len() + 1);
                    if model.sealed > 1 {
                        prop_assert_eq!(
                            view.revisions[0].previous_revision_id.as_deref(),
                            Some(before.revisions[0].id.as_str())
                        );
                    }
                }
                (Ok(view), Step::Unlock) => {
                    prop_assert!(!model.has_draft);
                    model.has_draft = true;
                    let draft = view.draft_revision.as_ref().unwrap();
                    prop_assert_eq!(&draft.form_data, &before.revisions[0].form_data);
                }
                (Ok(_), Step::Edit(_)) => prop_assert!(model.has_draft),
                (Err(e), _) => {
                    prop_assert_eq!(e.code(), ErrorCode::InvalidState);
                    let after = service.fetch_rate(&rate.id).unwrap();
                    prop_assert_eq!(after, before);
                }
            }

            let current = service.fetch_rate(&rate.id).unwrap();
            prop_assert_eq!(current.status, model.status());
            prop_assert_eq!(current.revisions.len(), model.sealed);
            prop_assert_eq!(current.draft_revision.is_some(), model.has_draft);
            prop_assert!(current.revisions.iter().all(|r| r.is_sealed()));
            if let Some(draft) = &current.draft_revision {
                prop_assert!(!draft.is_sealed());
                prop_assert!(current.revisions.iter().all(|r| r.id != draft.id));
            }
        }
    }
}
