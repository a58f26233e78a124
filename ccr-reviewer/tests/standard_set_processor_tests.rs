//! Standard-set ingestion integration tests
//!
//! Fixture repositories are served by `FixtureFetcher`; the LLM is scripted.

mod helpers;

use ccr_common::events::ReviewEvent;
use ccr_reviewer::db;
use ccr_reviewer::error::PipelineError;
use ccr_reviewer::models::{IngestStatus, StandardSetCreate};
use ccr_reviewer::services::{FetchError, LlmError};
use helpers::{count_all_rows, seed_classifications, tagging_reply, CallKind, ScriptedLlmClient, TestContext};
use std::time::Duration;

fn request(name: &str, url: &str) -> StandardSetCreate {
    StandardSetCreate {
        name: name.to_string(),
        repository_url: url.to_string(),
        custom_prompt: None,
    }
}

fn assert_workspaces_removed(ctx: &TestContext) {
    let handed_out = ctx.fetcher.workspaces();
    assert!(!handed_out.is_empty(), "fetcher was never called");
    for path in handed_out {
        assert!(!path.exists(), "workspace {} still exists", path.display());
    }
    assert!(ctx.leftover_workspaces().is_empty());
}

#[tokio::test]
async fn test_two_markdown_files_yield_two_standards() {
    let ctx = TestContext::new().await;
    let classes = seed_classifications(&ctx.db, &["Python", "Node.js"]).await;
    let python_id = classes[0].id;

    ctx.repo(
        "https://example.test/org/team-standards",
        &[
            ("README.md", "# Team standards\nTags: Python"),
            ("rules/error_handling.md", "# Error handling\nTags: Python\nCatch specific exceptions."),
            ("logging.md", "# Logging\nUse structured logging everywhere."),
            ("src/tool.py", "print('not a standard')"),
        ],
    );

    let llm = ScriptedLlmClient::tagging();
    let processor = ctx.standard_set_processor(llm.clone());

    let set = processor
        .ingest(&request("team", "https://example.test/org/team-standards"))
        .await
        .unwrap();

    assert_eq!(set.ingest_status, IngestStatus::Completed);
    assert!(set.error_message.is_none());

    let standards = db::standards::list_standards(&ctx.db, set.id).await.unwrap();
    assert_eq!(standards.len(), 2);
    assert!(standards.iter().all(|s| s.standard_set_id == set.id));

    let paths: Vec<&str> = standards.iter().map(|s| s.repository_path.as_str()).collect();
    assert_eq!(paths, vec!["logging.md", "rules/error_handling.md"]);

    assert!(standards[0].is_universal());
    assert_eq!(standards[1].classification_ids, vec![python_id]);
    assert!(standards[1].text.contains("Catch specific exceptions."));

    assert_eq!(llm.count(CallKind::StandardClassification), 2);
    assert_eq!(ctx.fetcher.labels(), vec![format!("standard-set-{}", set.id)]);
    assert_workspaces_removed(&ctx);
}

#[tokio::test]
async fn test_empty_repository_completes_with_zero_standards() {
    let ctx = TestContext::new().await;
    ctx.repo("https://example.test/org/empty", &[]);

    let llm = ScriptedLlmClient::tagging();
    let processor = ctx.standard_set_processor(llm.clone());

    let set = processor
        .ingest(&request("empty", "https://example.test/org/empty"))
        .await
        .unwrap();

    assert_eq!(set.ingest_status, IngestStatus::Completed);
    assert!(db::standards::list_standards(&ctx.db, set.id).await.unwrap().is_empty());
    assert!(llm.calls().is_empty());
    assert_workspaces_removed(&ctx);
}

#[tokio::test]
async fn test_reingest_replaces_standards() {
    let ctx = TestContext::new().await;
    ctx.repo(
        "https://example.test/org/python-v1",
        &[
            ("naming.md", "Use snake_case."),
            ("typing.md", "Annotate public functions."),
            ("testing.md", "Use pytest."),
        ],
    );
    ctx.repo("https://example.test/org/python-v2", &[("naming.md", "Use snake_case for functions.")]);

    let processor = ctx.standard_set_processor(ScriptedLlmClient::tagging());

    let first = processor
        .ingest(&request("python", "https://example.test/org/python-v1"))
        .await
        .unwrap();
    assert_eq!(db::standards::list_standards(&ctx.db, first.id).await.unwrap().len(), 3);

    let second = processor
        .ingest(&request("python", "https://example.test/org/python-v2"))
        .await
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.repository_url, "https://example.test/org/python-v2");

    let standards = db::standards::list_standards(&ctx.db, second.id).await.unwrap();
    assert_eq!(standards.len(), 1);
    assert_eq!(standards[0].text, "Use snake_case for functions.");
    assert_eq!(count_all_rows(&ctx.db, second.id).await, 1);
    assert_eq!(db::standard_sets::list_standard_sets(&ctx.db).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_llm_failure_rolls_back_attempt_and_keeps_previous_standards() {
    let ctx = TestContext::new().await;
    ctx.repo(
        "https://example.test/org/good",
        &[("a.md", "Rule A."), ("b.md", "Rule B.")],
    );
    ctx.repo(
        "https://example.test/org/broken",
        &[("a.md", "Rule A2."), ("b.md", "BREAKS the model"), ("c.md", "Rule C2.")],
    );

    let good = ctx.standard_set_processor(ScriptedLlmClient::tagging());
    let set = good
        .ingest(&request("rules", "https://example.test/org/good"))
        .await
        .unwrap();

    let llm = ScriptedLlmClient::new(|call| {
        if call.user_prompt.contains("BREAKS") {
            Err(LlmError::Unavailable("connection reset".to_string()))
        } else {
            tagging_reply(call)
        }
    });
    let failing = ctx.standard_set_processor(llm.clone());

    let err = failing
        .ingest(&request("rules", "https://example.test/org/broken"))
        .await
        .unwrap_err();

    assert_eq!(err.standard_set_id, Some(set.id));
    assert!(matches!(err.cause, PipelineError::Llm(LlmError::Unavailable(_))));

    // a.md once, b.md twice (one retry)
    assert_eq!(llm.count(CallKind::StandardClassification), 3);

    let after = db::standard_sets::get_standard_set(&ctx.db, set.id).await.unwrap().unwrap();
    assert_eq!(after.ingest_status, IngestStatus::Failed);
    assert!(after.error_message.unwrap().contains("connection reset"));

    let visible = db::standards::list_standards(&ctx.db, set.id).await.unwrap();
    let texts: Vec<&str> = visible.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["Rule A.", "Rule B."]);
    assert_eq!(count_all_rows(&ctx.db, set.id).await, 2);

    assert_workspaces_removed(&ctx);
}

#[tokio::test]
async fn test_failed_first_ingest_leaves_no_standards() {
    let ctx = TestContext::new().await;
    ctx.repo(
        "https://example.test/org/garbled",
        &[("a.md", "Rule A."), ("b.md", "Rule B.")],
    );

    let llm = ScriptedLlmClient::new(|call| {
        if call.user_prompt.contains("Rule B.") {
            Ok("I think this is about Python".to_string())
        } else {
            tagging_reply(call)
        }
    });
    let processor = ctx.standard_set_processor(llm.clone());

    let err = processor
        .ingest(&request("garbled", "https://example.test/org/garbled"))
        .await
        .unwrap_err();

    assert!(matches!(err.cause, PipelineError::Llm(LlmError::MalformedResponse { .. })));
    // a.md once, b.md asked twice (one malformed retry)
    assert_eq!(llm.count(CallKind::StandardClassification), 3);

    let set_id = err.standard_set_id.unwrap();
    assert!(db::standards::list_standards(&ctx.db, set_id).await.unwrap().is_empty());
    assert_eq!(count_all_rows(&ctx.db, set_id).await, 0);
    assert_workspaces_removed(&ctx);
}

#[tokio::test]
async fn test_fetch_failure_marks_set_failed() {
    let ctx = TestContext::new().await;
    ctx.fetcher.fail("https://example.test/org/missing");

    let llm = ScriptedLlmClient::tagging();
    let processor = ctx.standard_set_processor(llm.clone());

    let err = processor
        .ingest(&request("missing", "https://example.test/org/missing"))
        .await
        .unwrap_err();

    assert!(matches!(
        err.cause,
        PipelineError::RepositoryUnavailable(FetchError::CloneFailed { .. })
    ));

    let set = db::standard_sets::get_standard_set(&ctx.db, err.standard_set_id.unwrap())
        .await
        .unwrap()
        .expect("set record is retained");
    assert_eq!(set.ingest_status, IngestStatus::Failed);
    assert!(set.error_message.unwrap().contains("not found"));
    assert!(llm.calls().is_empty());
    assert_workspaces_removed(&ctx);
}

#[tokio::test]
async fn test_unknown_llm_tags_are_discarded() {
    let ctx = TestContext::new().await;
    let classes = seed_classifications(&ctx.db, &["Python"]).await;
    ctx.repo("https://example.test/org/mixed", &[("style.md", "Tags: python, COBOL\nBe consistent.")]);

    let processor = ctx.standard_set_processor(ScriptedLlmClient::tagging());
    let set = processor
        .ingest(&request("mixed", "https://example.test/org/mixed"))
        .await
        .unwrap();

    let standards = db::standards::list_standards(&ctx.db, set.id).await.unwrap();
    assert_eq!(standards.len(), 1);
    assert_eq!(standards[0].classification_ids, vec![classes[0].id]);
}

#[tokio::test]
async fn test_only_files_restricts_ingestion() {
    let ctx = TestContext::new().await;
    ctx.repo(
        "https://example.test/org/many",
        &[("security.md", "Rule S."), ("style.md", "Rule T."), ("docs/Security.txt", "Rule S2.")],
    );

    let processor = ctx
        .standard_set_processor(ScriptedLlmClient::tagging())
        .with_only_files(vec!["security".to_string()]);
    let set = processor
        .ingest(&request("many", "https://example.test/org/many"))
        .await
        .unwrap();

    let standards = db::standards::list_standards(&ctx.db, set.id).await.unwrap();
    let paths: Vec<&str> = standards.iter().map(|s| s.repository_path.as_str()).collect();
    assert_eq!(paths, vec!["docs/Security.txt", "security.md"]);
}

#[tokio::test]
async fn test_ingest_emits_started_and_completed_events() {
    let ctx = TestContext::new().await;
    ctx.repo("https://example.test/org/evented", &[("one.md", "Rule.")]);
    let mut rx = ctx.event_bus.subscribe();

    let processor = ctx.standard_set_processor(ScriptedLlmClient::tagging());
    let set = processor
        .ingest(&request("evented", "https://example.test/org/evented"))
        .await
        .unwrap();

    match rx.recv().await.unwrap() {
        ReviewEvent::StandardSetIngestStarted { standard_set_id, name, .. } => {
            assert_eq!(standard_set_id, set.id);
            assert_eq!(name, "evented");
        }
        other => panic!("unexpected event {:?}", other),
    }
    match rx.recv().await.unwrap() {
        ReviewEvent::StandardSetIngestCompleted { standards_count, .. } => assert_eq!(standards_count, 1),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_overlapping_ingests_of_one_set_keep_every_standard() {
    let ctx = TestContext::new().await;
    ctx.repo(
        "https://example.test/org/overlap",
        &[
            ("a.md", "Rule A."),
            ("b.md", "Rule B."),
            ("c.md", "Rule C."),
            ("d.md", "Rule D."),
        ],
    );

    let llm = ScriptedLlmClient::slow(Duration::from_millis(100), tagging_reply);
    let processor = ctx.standard_set_processor(llm.clone());
    let set = processor
        .register(&request("overlap", "https://example.test/org/overlap"))
        .await
        .unwrap();

    let (first, second) = tokio::join!(processor.process(set.id), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        processor.process(set.id).await
    });

    assert_eq!(first.unwrap().ingest_status, IngestStatus::Completed);
    assert_eq!(second.unwrap().ingest_status, IngestStatus::Completed);

    let standards = db::standards::list_standards(&ctx.db, set.id).await.unwrap();
    let paths: Vec<&str> = standards.iter().map(|s| s.repository_path.as_str()).collect();
    assert_eq!(paths, vec!["a.md", "b.md", "c.md", "d.md"]);
    assert_eq!(count_all_rows(&ctx.db, set.id).await, 4);
    assert_eq!(llm.count(CallKind::StandardClassification), 8);

    let handed_out = ctx.fetcher.workspaces();
    assert_eq!(handed_out.len(), 2);
    assert_ne!(handed_out[0], handed_out[1]);
    assert_workspaces_removed(&ctx);
}

#[tokio::test]
async fn test_ingest_of_invalid_request_reports_no_set_id() {
    let ctx = TestContext::new().await;
    let processor = ctx.standard_set_processor(ScriptedLlmClient::tagging());

    let err = processor
        .ingest(&request("", "https://example.test/org/anything"))
        .await
        .unwrap_err();

    assert!(err.standard_set_id.is_none());
    assert!(matches!(
        err.cause,
        PipelineError::Persistence(ccr_common::Error::InvalidInput(_))
    ));
    assert!(ctx.fetcher.workspaces().is_empty());
    assert!(db::standard_sets::list_standard_sets(&ctx.db).await.unwrap().is_empty());
}
