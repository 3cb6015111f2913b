//! ResultStore integration tests against a temp SQLite database.

mod support;

use std::sync::atomic::Ordering;

use orchestrator::store::{Fingerprint, NewResult, ResultStore};

use support::{CountMode, MockCompute};

async fn temp_store() -> (ResultStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("results.db");
    let store = ResultStore::connect(db_path.to_str().expect("utf8 path"))
        .await
        .expect("store connect");
    (store, dir)
}

fn fingerprint(query: &str) -> Fingerprint {
    Fingerprint {
        query: query.to_string(),
        rules_path: None,
        use_pro: false,
    }
}

fn pending(session_id: i64, repo: &str) -> NewResult {
    NewResult {
        session_id,
        repo_name: repo.to_string(),
        repo_url: format!("https://github.com/{repo}"),
        success: false,
        output: String::new(),
        artifact_uri: None,
        job_id: Some("job-id-1".into()),
        job_name: Some("dragnet-1-repo-abcd1234".into()),
    }
}

#[tokio::test]
async fn create_and_get_session_roundtrip() {
    let (store, _dir) = temp_store().await;

    let id = store
        .create_session(&Fingerprint {
            query: "extractall".into(),
            rules_path: Some("/rules/custom.yaml".into()),
            use_pro: true,
        })
        .await
        .unwrap();
    assert!(id > 0);

    let session = store.get_session(id).await.unwrap().expect("session");
    assert_eq!(session.query, "extractall");
    assert_eq!(session.rules_path.as_deref(), Some("/rules/custom.yaml"));
    assert!(session.use_pro);
    assert_eq!(session.status, "pending");

    assert!(store.get_session(id + 100).await.unwrap().is_none());
}

#[tokio::test]
async fn find_session_matches_full_fingerprint_most_recent_first() {
    let (store, _dir) = temp_store().await;

    let first = store.create_session(&fingerprint("q")).await.unwrap();
    let second = store.create_session(&fingerprint("q")).await.unwrap();
    assert!(second > first);

    // Most recent wins for an identical fingerprint.
    assert_eq!(store.find_session(&fingerprint("q")).await.unwrap(), Some(second));

    // Any differing tuple element is a different fingerprint.
    assert_eq!(store.find_session(&fingerprint("other")).await.unwrap(), None);
    let pro = Fingerprint {
        query: "q".into(),
        rules_path: None,
        use_pro: true,
    };
    assert_eq!(store.find_session(&pro).await.unwrap(), None);
    let with_rules = Fingerprint {
        query: "q".into(),
        rules_path: Some("/rules.yaml".into()),
        use_pro: false,
    };
    assert_eq!(store.find_session(&with_rules).await.unwrap(), None);
}

#[tokio::test]
async fn upsert_pending_then_terminal_leaves_one_terminal_row() {
    let (store, _dir) = temp_store().await;
    let session_id = store.create_session(&fingerprint("q")).await.unwrap();

    store.upsert_result(&pending(session_id, "owner/repo")).await.unwrap();

    let rows = store.list_results(session_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].is_terminal());

    store
        .upsert_result(&NewResult {
            success: true,
            output: "3 findings".into(),
            artifact_uri: Some("s3://bucket/key".into()),
            ..pending(session_id, "owner/repo")
        })
        .await
        .unwrap();

    let rows = store.list_results(session_id).await.unwrap();
    assert_eq!(rows.len(), 1, "upsert must replace, not duplicate");
    assert!(rows[0].is_terminal());
    assert!(rows[0].success);
    assert_eq!(rows[0].output, "3 findings");
    assert_eq!(rows[0].artifact_uri.as_deref(), Some("s3://bucket/key"));
    assert_eq!(rows[0].job_name.as_deref(), Some("dragnet-1-repo-abcd1234"));
}

#[tokio::test]
async fn pending_insert_never_supersedes_terminal_row() {
    let (store, _dir) = temp_store().await;
    let session_id = store.create_session(&fingerprint("q")).await.unwrap();

    // Worker callback landed first (callbacks interleave with admission).
    store
        .upsert_result(&NewResult {
            success: true,
            output: "finished early".into(),
            ..pending(session_id, "owner/repo")
        })
        .await
        .unwrap();

    // The admission path's pending write arrives late and must not win.
    store
        .insert_result_pending(&pending(session_id, "owner/repo"))
        .await
        .unwrap();

    let rows = store.list_results(session_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_terminal());
    assert_eq!(rows[0].output, "finished early");
}

#[tokio::test]
async fn results_are_scoped_per_session() {
    let (store, _dir) = temp_store().await;
    let a = store.create_session(&fingerprint("a")).await.unwrap();
    let b = store.create_session(&fingerprint("b")).await.unwrap();

    store.upsert_result(&pending(a, "owner/one")).await.unwrap();
    store.upsert_result(&pending(a, "owner/two")).await.unwrap();
    store.upsert_result(&pending(b, "owner/one")).await.unwrap();

    assert_eq!(store.list_results(a).await.unwrap().len(), 2);
    assert_eq!(store.list_results(b).await.unwrap().len(), 1);

    let names = store.analyzed_repo_names(a).await.unwrap();
    assert!(names.contains("owner/one"));
    assert!(names.contains("owner/two"));
    assert_eq!(names.len(), 2);

    // Unknown session: empty set, not an error.
    assert!(store.analyzed_repo_names(9999).await.unwrap().is_empty());
}

#[tokio::test]
async fn get_result_returns_job_name_for_callback_path() {
    let (store, _dir) = temp_store().await;
    let session_id = store.create_session(&fingerprint("q")).await.unwrap();
    store.upsert_result(&pending(session_id, "owner/repo")).await.unwrap();

    let row = store
        .get_result(session_id, "owner/repo")
        .await
        .unwrap()
        .expect("row");
    assert_eq!(row.job_name.as_deref(), Some("dragnet-1-repo-abcd1234"));

    assert!(store.get_result(session_id, "owner/other").await.unwrap().is_none());
}

#[tokio::test]
async fn list_sessions_counts_results_and_successes() {
    let (store, _dir) = temp_store().await;
    let session_id = store.create_session(&fingerprint("q")).await.unwrap();

    store.upsert_result(&pending(session_id, "owner/one")).await.unwrap();
    store
        .upsert_result(&NewResult {
            success: true,
            output: "clean".into(),
            ..pending(session_id, "owner/two")
        })
        .await
        .unwrap();

    let sessions = store.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].result_count, 2);
    assert_eq!(sessions[0].success_count, 1);
}

#[tokio::test]
async fn acquire_slot_grants_below_ceiling_and_denies_at_it() {
    let (store, _dir) = temp_store().await;
    let session_id = store.create_session(&fingerprint("q")).await.unwrap();

    let below = MockCompute::new(CountMode::Fixed(5));
    let decision = store
        .acquire_slot(session_id, 10, below.as_ref())
        .await
        .unwrap();
    assert!(decision.granted);
    assert_eq!(decision.active, 5);

    let at_ceiling = MockCompute::new(CountMode::Fixed(10));
    let decision = store
        .acquire_slot(session_id, 10, at_ceiling.as_ref())
        .await
        .unwrap();
    assert!(!decision.granted);
    assert_eq!(decision.active, 10);
}

#[tokio::test]
async fn acquire_slot_fails_closed_when_live_count_unavailable() {
    let (store, _dir) = temp_store().await;
    let session_id = store.create_session(&fingerprint("q")).await.unwrap();

    let broken = MockCompute::new(CountMode::Fixed(0));
    broken.fail_count.store(true, Ordering::SeqCst);

    let decision = store
        .acquire_slot(session_id, 10, broken.as_ref())
        .await
        .unwrap();
    assert!(!decision.granted, "a failed live count must deny, never grant");
    assert_eq!(decision.active, 10, "conservative fallback reports the ceiling");

    // The critical section was released: a healthy check still works.
    let healthy = MockCompute::new(CountMode::Fixed(0));
    let decision = store
        .acquire_slot(session_id, 10, healthy.as_ref())
        .await
        .unwrap();
    assert!(decision.granted);
}

#[tokio::test]
async fn update_session_status_persists() {
    let (store, _dir) = temp_store().await;
    let session_id = store.create_session(&fingerprint("q")).await.unwrap();

    store.update_session_status(session_id, "running").await.unwrap();
    let session = store.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.status, "running");
}
