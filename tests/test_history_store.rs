use chrono::Utc;
use pushcast::automation::models::{ExecutionPhase, ExecutionStatus};
use pushcast::database::execution_history;
use pushcast::engine::{ExecutionMetrics, HistoryTracker};
use pushcast::establish_connection;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;

async fn setup() -> (Arc<DatabaseConnection>, HistoryTracker) {
    let db = Arc::new(establish_connection("sqlite::memory:").await.unwrap());
    let tracker = HistoryTracker::new(db.clone());
    (db, tracker)
}

#[tokio::test]
async fn test_history_lifecycle() {
    let (db, tracker) = setup().await;
    let start_time = Utc::now();

    let record_id = tracker
        .track_execution_start("a1", "Morning digest", "engine-test")
        .await
        .expect("history insert should succeed");

    let row = execution_history::Entity::find_by_id(&record_id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "running");
    assert_eq!(row.current_phase, "audience_generation");
    assert_eq!(row.instance_id, "engine-test");

    tracker
        .track_execution_phase(&record_id, ExecutionPhase::LiveExecution)
        .await;
    let row = execution_history::Entity::find_by_id(&record_id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.current_phase, "live_execution");

    let metrics = ExecutionMetrics {
        audience_size: 1200,
        pushes_sent: 3,
        pushes_failed: 0,
        error_message: None,
        error_stack: None,
    };
    tracker
        .track_execution_complete(&record_id, ExecutionStatus::Completed, &metrics, start_time)
        .await;

    let row = execution_history::Entity::find_by_id(&record_id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "completed");
    assert_eq!(row.audience_size, 1200);
    assert_eq!(row.pushes_sent, 3);
    assert_eq!(row.pushes_failed, 0);
    assert!(row.completed_at.is_some());
    assert!(row.duration_ms.is_some());
    assert!(row.error_message.is_none());
}

#[tokio::test]
async fn test_failed_execution_records_error() {
    let (db, tracker) = setup().await;

    let record_id = tracker
        .track_execution_start("a1", "Morning digest", "engine-test")
        .await
        .unwrap();

    let metrics = ExecutionMetrics {
        audience_size: 0,
        pushes_sent: 0,
        pushes_failed: 3,
        error_message: Some("SSE stream timeout after 600000ms".to_string()),
        error_stack: None,
    };
    tracker
        .track_execution_complete(&record_id, ExecutionStatus::Failed, &metrics, Utc::now())
        .await;

    let row = execution_history::Entity::find_by_id(&record_id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "failed");
    assert!(row
        .error_message
        .unwrap()
        .starts_with("SSE stream timeout after"));
    assert_eq!(row.pushes_failed, 3);
}

#[tokio::test]
async fn test_bookkeeping_failures_do_not_panic() {
    let (_db, tracker) = setup().await;

    // Updates against a nonexistent record must be swallowed, never fatal.
    tracker
        .track_execution_phase("no-such-record", ExecutionPhase::Cleanup)
        .await;
    tracker
        .track_execution_complete(
            "no-such-record",
            ExecutionStatus::Completed,
            &ExecutionMetrics::default(),
            Utc::now(),
        )
        .await;
}
