use chrono::{Duration, Utc};
use docflow::error::Error;
use docflow::model::{
    AnalysisStatus, CLAIM_EXPIRED, Commit, Completion, Document, Event, EventKind, FieldMapping,
    NewDocument, Transition, transition,
};
use serde_json::json;

/// A document in `status` with the fields that status implies.
fn doc_in(status: AnalysisStatus) -> Document {
    let now = Utc::now();
    let mut doc = NewDocument::new("report.txt", "report.txt")
        .meta("title", "Q3 report")
        .into_document(now);
    doc.analysis.status = status;
    match status {
        AnalysisStatus::Pending => doc.analysis.queued_at = Some(now),
        AnalysisStatus::InProgress => {
            doc.analysis.attempt_count = 1;
            doc.analysis.claimed_at = Some(now);
            doc.analysis.claim_deadline = Some(now + Duration::minutes(10));
            doc.analysis.claim_owner = Some("host:1:0".to_string());
        }
        AnalysisStatus::ReadyForReview => {
            doc.analysis.attempt_count = 1;
            doc.analysis.result = Some(json!({"entities": ["Acme"], "score": 0.9}));
        }
        AnalysisStatus::Failed => {
            doc.analysis.attempt_count = 1;
            doc.analysis.error = Some("boom".to_string());
        }
        _ => {}
    }
    doc
}

fn every_event() -> Vec<Event> {
    vec![
        Event::RequestAnalysis,
        Event::Claim {
            owner: "host:2:0".to_string(),
            deadline: Utc::now() + Duration::minutes(10),
        },
        Event::Complete(Completion::Succeeded(json!({"ok": true}))),
        Event::Complete(Completion::Failed("bad".to_string())),
        Event::Complete(Completion::Retry("flaky".to_string())),
        Event::Commit(Commit::new(FieldMapping::new().nest("analysis"))),
        Event::Discard,
        Event::Expire,
    ]
}

fn apply(doc: &Document, event: Event) -> Document {
    let now = Utc::now();
    match transition(doc, event, now).unwrap() {
        Transition::Apply { patch, guard, .. } => {
            assert!(guard.matches(&doc.analysis), "guard must match the source state");
            let mut next = doc.clone();
            patch.apply_to(&mut next, now);
            next
        }
        Transition::AlreadyQueued => doc.clone(),
    }
}

#[test]
fn status_round_trips_through_str() {
    for status in AnalysisStatus::ALL {
        assert_eq!(status.as_str().parse::<AnalysisStatus>().unwrap(), status);
    }
    assert!("queued".parse::<AnalysisStatus>().is_err());
}

#[test]
fn status_serializes_snake_case() {
    assert_eq!(
        serde_json::to_value(AnalysisStatus::ReadyForReview).unwrap(),
        json!("ready_for_review")
    );
}

#[test]
fn every_applied_transition_is_in_the_edge_table() {
    for status in AnalysisStatus::ALL {
        let doc = doc_in(status);
        for event in every_event() {
            if let Ok(Transition::Apply { from, to, .. }) = transition(&doc, event, Utc::now()) {
                assert_eq!(from, status);
                assert!(from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }
}

#[test]
fn claim_owner_present_exactly_when_in_progress() {
    for status in AnalysisStatus::ALL {
        let doc = doc_in(status);
        for event in every_event() {
            if transition(&doc, event.clone(), Utc::now()).is_err() {
                continue;
            }
            let next = apply(&doc, event);
            assert_eq!(
                next.analysis.claim_owner.is_some(),
                next.analysis.status == AnalysisStatus::InProgress,
                "{status} -> {}",
                next.analysis.status
            );
            assert_eq!(
                next.analysis.result.is_some(),
                next.analysis.status == AnalysisStatus::ReadyForReview
            );
        }
    }
}

#[test]
fn invalid_events_are_rejected() {
    let cases = [
        (AnalysisStatus::None, Event::Discard),
        (AnalysisStatus::None, Event::Expire),
        (AnalysisStatus::Pending, Event::Discard),
        (AnalysisStatus::Committed, Event::Discard),
        (AnalysisStatus::Failed, Event::Complete(Completion::Failed("x".into()))),
        (
            AnalysisStatus::Pending,
            Event::Commit(Commit::new(FieldMapping::new().keep("entities"))),
        ),
    ];
    for (status, event) in cases {
        let kind = event.kind();
        let err = transition(&doc_in(status), event, Utc::now()).unwrap_err();
        assert!(
            matches!(err, Error::InvalidTransition { from, event } if from == status && event == kind),
            "{status} / {kind}: {err}"
        );
    }
}

#[test]
fn claim_requires_pending() {
    let event = Event::Claim {
        owner: "w".to_string(),
        deadline: Utc::now(),
    };
    let err = transition(&doc_in(AnalysisStatus::None), event, Utc::now()).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: AnalysisStatus::None,
            event: EventKind::Claim
        }
    ));
}

#[test]
fn request_on_queued_or_running_is_a_no_op() {
    for status in [AnalysisStatus::Pending, AnalysisStatus::InProgress] {
        let result = transition(&doc_in(status), Event::RequestAnalysis, Utc::now()).unwrap();
        assert_eq!(result, Transition::AlreadyQueued);
    }
}

#[test]
fn request_starts_a_new_cycle_from_settled_states() {
    for status in [
        AnalysisStatus::None,
        AnalysisStatus::ReadyForReview,
        AnalysisStatus::Failed,
        AnalysisStatus::Committed,
    ] {
        let doc = doc_in(status);
        let next = apply(&doc, Event::RequestAnalysis);
        assert_eq!(next.analysis.status, AnalysisStatus::Pending);
        assert!(next.analysis.queued_at.is_some());
        assert!(next.analysis.error.is_none());
        assert!(next.analysis.result.is_none());
        assert_eq!(next.analysis.attempt_count, doc.analysis.attempt_count);
    }
}

#[test]
fn claim_increments_attempts_and_sets_deadline() {
    let doc = doc_in(AnalysisStatus::Pending);
    let deadline = Utc::now() + Duration::minutes(10);
    let next = apply(
        &doc,
        Event::Claim {
            owner: "host:9:1".to_string(),
            deadline,
        },
    );
    assert_eq!(next.analysis.status, AnalysisStatus::InProgress);
    assert_eq!(next.analysis.attempt_count, 1);
    assert_eq!(next.analysis.claim_owner.as_deref(), Some("host:9:1"));
    assert_eq!(next.analysis.claim_deadline, Some(deadline));
    assert!(next.analysis.queued_at.is_none());
}

#[test]
fn completion_is_guarded_on_claim_owner() {
    let doc = doc_in(AnalysisStatus::InProgress);
    let Transition::Apply { guard, .. } = transition(
        &doc,
        Event::Complete(Completion::Succeeded(json!({}))),
        Utc::now(),
    )
    .unwrap() else {
        panic!("expected an update");
    };
    assert_eq!(guard.claim_owner.as_deref(), Some("host:1:0"));

    let mut stolen = doc.analysis.clone();
    stolen.claim_owner = Some("host:2:0".to_string());
    assert!(!guard.matches(&stolen));
}

#[test]
fn completion_outcomes() {
    let doc = doc_in(AnalysisStatus::InProgress);

    let ok = apply(&doc, Event::Complete(Completion::Succeeded(json!({"a": 1}))));
    assert_eq!(ok.analysis.status, AnalysisStatus::ReadyForReview);
    assert_eq!(ok.analysis.result, Some(json!({"a": 1})));

    let failed = apply(&doc, Event::Complete(Completion::Failed("corrupt".into())));
    assert_eq!(failed.analysis.status, AnalysisStatus::Failed);
    assert_eq!(failed.analysis.error.as_deref(), Some("corrupt"));

    let retry = apply(&doc, Event::Complete(Completion::Retry("timeout".into())));
    assert_eq!(retry.analysis.status, AnalysisStatus::Pending);
    assert!(retry.analysis.queued_at.is_some());
    assert!(retry.analysis.error.is_none());
    assert_eq!(retry.analysis.attempt_count, 1);
}

#[test]
fn expire_fails_with_claim_expired() {
    let next = apply(&doc_in(AnalysisStatus::InProgress), Event::Expire);
    assert_eq!(next.analysis.status, AnalysisStatus::Failed);
    assert_eq!(next.analysis.error.as_deref(), Some(CLAIM_EXPIRED));
    assert!(next.analysis.claim_deadline.is_none());
}

#[test]
fn commit_merges_into_metadata_and_clears_result() {
    let doc = doc_in(AnalysisStatus::ReadyForReview);
    let next = apply(
        &doc,
        Event::Commit(Commit::new(FieldMapping::new().map("entities", "people"))),
    );
    assert_eq!(next.analysis.status, AnalysisStatus::Committed);
    assert!(next.analysis.result.is_none());
    assert_eq!(
        next.metadata,
        json!({"title": "Q3 report", "people": ["Acme"]})
    );
}

#[test]
fn commit_prefers_the_edited_result() {
    let doc = doc_in(AnalysisStatus::ReadyForReview);
    let commit = Commit::new(FieldMapping::new().keep("entities"))
        .edited(json!({"entities": ["Acme Corp"]}));
    let next = apply(&doc, Event::Commit(commit));
    assert_eq!(next.metadata["entities"], json!(["Acme Corp"]));
}

#[test]
fn discard_returns_to_none_and_keeps_metadata() {
    let doc = doc_in(AnalysisStatus::ReadyForReview);
    let next = apply(&doc, Event::Discard);
    assert_eq!(next.analysis.status, AnalysisStatus::None);
    assert!(next.analysis.result.is_none());
    assert_eq!(next.metadata, doc.metadata);
}

#[test]
fn mapping_skips_missing_keys_and_nests() {
    let mapping = FieldMapping::new()
        .keep("entities")
        .map("missing", "nowhere")
        .nest("analysis");
    let result = json!({"entities": [1, 2], "relations": []});
    let merged = mapping.merge(&json!({"title": "t"}), &result).unwrap();
    assert_eq!(
        merged,
        json!({"title": "t", "entities": [1, 2], "analysis": result})
    );
}

#[test]
fn mapping_rejects_non_object_result_without_nest() {
    let mapping = FieldMapping::new().keep("entities");
    assert!(mapping.merge(&json!({}), &json!("plain text")).is_err());

    let nested = FieldMapping::new().nest("summary");
    let merged = nested.merge(&json!({}), &json!("plain text")).unwrap();
    assert_eq!(merged, json!({"summary": "plain text"}));
}

#[test]
fn mapping_loads_from_toml() {
    let mapping = FieldMapping::from_toml_str(
        r#"
        nest = "analysis"

        [fields]
        entities = "entities"
        relations = "knowledge_relations"
        "#,
    )
    .unwrap();
    assert_eq!(mapping.nest.as_deref(), Some("analysis"));
    assert!(
        mapping
            .fields
            .contains(&("relations".to_string(), "knowledge_relations".to_string()))
    );
    assert_eq!(mapping.fields.len(), 2);
}

#[test]
fn mapping_toml_rejects_non_string_targets() {
    let err = FieldMapping::from_toml_str("[fields]\nentities = 3\n").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn mapping_toml_keeps_file_order() {
    let mapping = FieldMapping::from_toml_str(
        r#"
        [fields]
        z = "out"
        a = "out"
        "#,
    )
    .unwrap();
    assert_eq!(
        mapping.fields,
        vec![
            ("z".to_string(), "out".to_string()),
            ("a".to_string(), "out".to_string()),
        ]
    );

    // Later rules win when they target the same key.
    let merged = mapping.merge(&json!({}), &json!({"z": 1, "a": 2})).unwrap();
    assert_eq!(merged, json!({"out": 2}));
}

#[test]
fn guards_are_pinned_to_the_attempt_they_were_read_at() {
    let doc = doc_in(AnalysisStatus::InProgress);
    let Transition::Apply { guard, .. } = transition(&doc, Event::Expire, Utc::now()).unwrap()
    else {
        panic!("expected an update");
    };
    assert_eq!(guard.attempt_count, Some(1));

    let mut reclaimed = doc.analysis.clone();
    reclaimed.attempt_count = 2;
    assert!(!guard.matches(&reclaimed));
}
