mod helpers;

use serde_json::json;
use uuid::Uuid;

use ump_gateway::adapters::sqlite::SqliteJobRepository;
use ump_gateway::domain::models::{Job, JobStatus, ProcessId, StatusInfo};
use ump_gateway::domain::ports::{JobFilter, JobRepository};

use helpers::database::setup_test_db;

fn test_job() -> Job {
    Job::new(
        ProcessId::new("ms1", "square").unwrap(),
        Some(json!({"n": 4})),
    )
}

async fn repo() -> SqliteJobRepository {
    SqliteJobRepository::new(setup_test_db().await)
}

#[tokio::test]
async fn create_and_get_round_trips_every_field() {
    let repo = repo().await;
    let job = test_job();

    repo.create(&job).await.expect("create failed");
    let loaded = repo.get(job.id).await.expect("get failed").expect("missing");

    assert_eq!(loaded, job);
}

#[tokio::test]
async fn create_rejects_duplicate_ids() {
    let repo = repo().await;
    let job = test_job();
    repo.create(&job).await.unwrap();
    assert!(repo.create(&job).await.is_err());
}

#[tokio::test]
async fn get_unknown_job_returns_none() {
    let repo = repo().await;
    assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn update_persists_mutable_fields_and_preserves_identity() {
    let repo = repo().await;
    let mut job = test_job();
    repo.create(&job).await.unwrap();

    let created = job.created;
    let mut si = job.status_info.clone();
    si.status = JobStatus::Running;
    job.apply_status_info(si).unwrap();
    job.remote_job_id = Some("r-99".to_string());
    job.remote_status_url = Some("http://ms1/jobs/r-99".to_string());
    repo.update(&job).await.unwrap();

    let loaded = repo.get(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Running);
    assert_eq!(loaded.remote_job_id.as_deref(), Some("r-99"));
    assert_eq!(loaded.created, created);
    assert_eq!(loaded.process_id.to_string(), "ms1:square");
}

#[tokio::test]
async fn update_of_unknown_job_fails() {
    let repo = repo().await;
    assert!(repo.update(&test_job()).await.is_err());
}

#[tokio::test]
async fn list_filters_by_status_and_pages() {
    let repo = repo().await;
    for _ in 0..3 {
        repo.create(&test_job()).await.unwrap();
    }
    let mut failed = test_job();
    let si = StatusInfo::failed(failed.id, &failed.process_id, "boom");
    failed.apply_status_info(si).unwrap();
    repo.create(&failed).await.unwrap();

    let accepted = repo
        .list(&JobFilter {
            status: Some(JobStatus::Accepted),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(accepted.len(), 3);

    let paged = repo
        .list(&JobFilter {
            limit: Some(2),
            offset: Some(0),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(paged.len(), 2);

    let count = repo
        .count(&JobFilter {
            status: Some(JobStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn history_sequence_is_strictly_increasing() {
    let repo = repo().await;
    let job = test_job();
    repo.create(&job).await.unwrap();

    let mut snapshot = job.status_info.clone();
    repo.append_status(job.id, &snapshot).await.unwrap();
    snapshot.status = JobStatus::Running;
    repo.append_status(job.id, &snapshot).await.unwrap();
    snapshot.status = JobStatus::Successful;
    repo.append_status(job.id, &snapshot).await.unwrap();

    let history = repo.history(job.id).await.unwrap();
    assert_eq!(history.len(), 3);
    for window in history.windows(2) {
        assert!(window[1].seq > window[0].seq);
    }
    assert_eq!(history[0].snapshot.status, JobStatus::Accepted);
    assert_eq!(history[2].snapshot.status, JobStatus::Successful);
}

#[tokio::test]
async fn identical_snapshot_append_is_a_no_op() {
    let repo = repo().await;
    let job = test_job();
    repo.create(&job).await.unwrap();

    let snapshot = job.status_info.clone();
    repo.append_status(job.id, &snapshot).await.unwrap();
    repo.append_status(job.id, &snapshot).await.unwrap();

    let history = repo.history(job.id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn mark_failed_sets_terminal_failure_with_reason() {
    let repo = repo().await;
    let job = test_job();
    repo.create(&job).await.unwrap();

    let failed = repo
        .mark_failed(job.id, "upstream exploded")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.status_info.message.as_deref(),
        Some("upstream exploded")
    );
    assert!(failed.finished.is_some());
}

#[tokio::test]
async fn mark_failed_never_touches_terminal_jobs() {
    let repo = repo().await;
    let mut job = test_job();
    let mut si = job.status_info.clone();
    si.status = JobStatus::Successful;
    job.apply_status_info(si).unwrap();
    repo.create(&job).await.unwrap();

    let unchanged = repo.mark_failed(job.id, "too late").await.unwrap().unwrap();
    assert_eq!(unchanged.status, JobStatus::Successful);
}

#[tokio::test]
async fn mark_failed_on_unknown_job_returns_none() {
    let repo = repo().await;
    assert!(repo.mark_failed(Uuid::new_v4(), "x").await.unwrap().is_none());
}
