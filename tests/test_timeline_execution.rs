use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream;
use pushcast::audience::{
    AudienceGenerator, GenerationRequest, GenerationResult, GeneratorRegistry,
};
use pushcast::automation::errors::Result as EngineResult;
use pushcast::automation::models::{
    AudienceCriteria, Automation, AutomationPush, AutomationSchedule, AutomationSettings,
    AutomationStatus, CustomScript, ExecutionPhase, Frequency,
};
use pushcast::config::{Config, EngineVersion};
use pushcast::database::{automations, execution_history};
use pushcast::engine::AutomationEngine;
use pushcast::establish_connection;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::time::Duration;

struct StaticGenerator;

#[async_trait]
impl AudienceGenerator for StaticGenerator {
    fn script_id(&self) -> &str {
        "vip-reengagement"
    }

    async fn generate(&self, _request: &GenerationRequest) -> EngineResult<GenerationResult> {
        Ok(GenerationResult {
            success: true,
            audience_size: 42,
            csv_files: vec![],
            error: None,
        })
    }
}

#[derive(Clone, Default)]
struct MockDownstream {
    modes: Arc<Mutex<Vec<String>>>,
}

async fn test_run(
    State(state): State<MockDownstream>,
    Path(_automation_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    state
        .modes
        .lock()
        .unwrap()
        .push(params.get("mode").cloned().unwrap_or_default());
    Sse::new(stream::iter(vec![
        Ok(Event::default()
            .data(r#"{"type":"log","level":"info","stage":"delivery","message":"dispatching"}"#)),
        Ok(Event::default().data(r#"{"type":"result","success":true,"message":"delivered"}"#)),
    ]))
}

async fn spawn_downstream() -> (String, MockDownstream) {
    let mock = MockDownstream::default();
    let app = Router::new()
        .route("/api/v1/test-run/:automation_id", get(test_run))
        .with_state(mock.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), mock)
}

fn automation(id: &str, window_minutes: i64, dry_run_first: bool) -> Automation {
    Automation {
        id: id.to_string(),
        name: format!("Automation {id}"),
        is_active: true,
        status: AutomationStatus::Active,
        schedule: AutomationSchedule {
            timezone: "America/Chicago".to_string(),
            frequency: Frequency::Daily,
            execution_time: "14:30".to_string(),
            start_date: None,
            lead_time_minutes: Some(30),
            cron_expression: None,
        },
        push_sequence: vec![
            AutomationPush {
                id: "p1".to_string(),
                sequence_order: 1,
                title: "One".to_string(),
                body: "Body".to_string(),
                layer_id: None,
                deep_link: None,
            },
            AutomationPush {
                id: "p2".to_string(),
                sequence_order: 2,
                title: "Two".to_string(),
                body: "Body".to_string(),
                layer_id: None,
                deep_link: None,
            },
            AutomationPush {
                id: "p3".to_string(),
                sequence_order: 3,
                title: "Three".to_string(),
                body: "Body".to_string(),
                layer_id: None,
                deep_link: None,
            },
        ],
        audience_criteria: AudienceCriteria {
            test_mode: false,
            custom_script: Some(CustomScript {
                script_id: "vip-reengagement".to_string(),
                lookback_hours: Some(72),
                cooling_hours: Some(24),
            }),
        },
        settings: AutomationSettings {
            dry_run_first,
            cancellation_window_minutes: Some(window_minutes),
            emergency_stop_enabled: true,
            is_test: false,
        },
    }
}

async fn insert_definition(db: &DatabaseConnection, automation: &Automation) {
    let row = automations::ActiveModel {
        id: Set(automation.id.clone()),
        name: Set(automation.name.clone()),
        definition: Set(serde_json::to_string(automation).unwrap()),
        created_at: Set(chrono::Utc::now()),
        updated_at: Set(chrono::Utc::now()),
    };
    row.insert(db).await.unwrap();
}

async fn build_engine(downstream_base_url: &str) -> (Arc<DatabaseConnection>, Arc<AutomationEngine>) {
    let db = Arc::new(establish_connection("sqlite::memory:").await.unwrap());
    let config = Config {
        port: 3001,
        database_url: "sqlite::memory:".to_string(),
        downstream_base_url: downstream_base_url.to_string(),
        cadence_service_url: None,
        engine_version: EngineVersion::V2,
        scripts_dir: PathBuf::from("scripts"),
        output_dir: PathBuf::from("data/audiences"),
        build_phase: false,
    };
    let mut registry = GeneratorRegistry::new();
    registry.register(Arc::new(StaticGenerator));
    let engine = AutomationEngine::new(db.clone(), &config, registry).await;
    (db, engine)
}

async fn wait_until<F, Fut>(timeout_secs: u64, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_happy_path_runs_all_five_phases() {
    let (base, mock) = spawn_downstream().await;
    let (db, engine) = build_engine(&base).await;

    let automation = automation("a1", 0, true);
    insert_definition(&db, &automation).await;

    let execution_id = engine.execute_now("a1").await.unwrap();

    let finished = wait_until(15, || {
        let engine = engine.clone();
        let execution_id = execution_id.clone();
        async move {
            match engine.progress().get_execution(&execution_id).await.unwrap() {
                Some(record) => record.status != "running",
                None => false,
            }
        }
    })
    .await;
    assert!(finished, "execution did not reach a terminal state");

    let record = engine
        .progress()
        .get_execution(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(record.current_phase, "cleanup");

    // Exactly one test send then one live send, in that order
    let modes = mock.modes.lock().unwrap().clone();
    assert_eq!(modes, vec!["test-live-send", "live-send"]);

    let history = execution_history::Entity::find()
        .filter(execution_history::Column::AutomationId.eq("a1"))
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.status, "completed");
    assert_eq!(history.pushes_sent, 3);
    assert_eq!(history.pushes_failed, 0);
    assert_eq!(history.audience_size, 3 * 42);
    assert!(history.error_message.is_none());

    // Phase transitions landed in the durable log, in order
    let logs = engine.progress().get_logs(&execution_id).await.unwrap();
    let phase_starts: Vec<&str> = logs
        .iter()
        .filter(|entry| entry.message.starts_with("Phase started:"))
        .map(|entry| entry.phase.as_str())
        .collect();
    assert_eq!(
        phase_starts,
        vec![
            "audience_generation",
            "test_sending",
            "cancellation_window",
            "live_execution",
            "cleanup"
        ]
    );

    // Terminal outcome removed the active entry
    assert!(engine.execution_status("a1").await.is_none());
}

#[tokio::test]
async fn test_execute_now_refuses_concurrent_run() {
    let (base, _mock) = spawn_downstream().await;
    let (db, engine) = build_engine(&base).await;

    // A long cancellation window keeps the first execution in phase 3
    let automation = automation("a1", 25, false);
    insert_definition(&db, &automation).await;

    let execution_id = engine.execute_now("a1").await.unwrap();
    let in_window = wait_until(15, || {
        let engine = engine.clone();
        async move {
            matches!(
                engine.execution_status("a1").await,
                Some(status) if status.phase == ExecutionPhase::CancellationWindow
            )
        }
    })
    .await;
    assert!(in_window, "execution never reached the cancellation window");

    // Dry-run disabled still transitions through the test-sending phase,
    // it just never calls downstream
    let logs = engine.progress().get_logs(&execution_id).await.unwrap();
    let phase_starts: Vec<&str> = logs
        .iter()
        .filter(|entry| entry.message.starts_with("Phase started:"))
        .map(|entry| entry.phase.as_str())
        .collect();
    assert_eq!(
        phase_starts,
        vec!["audience_generation", "test_sending", "cancellation_window"]
    );
    assert!(logs
        .iter()
        .any(|entry| entry.message.contains("skipping test send")));

    let second = engine.execute_now("a1").await;
    assert!(second.is_err(), "one-run-per-automation must hold");

    engine.cancel_automation("a1", "test teardown").await;
}

#[tokio::test]
async fn test_emergency_stop_during_window_skips_live_send() {
    let (base, mock) = spawn_downstream().await;
    let (db, engine) = build_engine(&base).await;

    let automation = automation("a1", 25, true);
    insert_definition(&db, &automation).await;

    let execution_id = engine.execute_now("a1").await.unwrap();

    let in_window = wait_until(15, || {
        let engine = engine.clone();
        async move {
            matches!(
                engine.execution_status("a1").await,
                Some(status) if status.phase == ExecutionPhase::CancellationWindow
            )
        }
    })
    .await;
    assert!(in_window, "execution never reached the cancellation window");

    assert!(engine.emergency_stop("a1").await);

    let finished = wait_until(45, || {
        let engine = engine.clone();
        let execution_id = execution_id.clone();
        async move {
            match engine.progress().get_execution(&execution_id).await.unwrap() {
                Some(record) => record.status != "running",
                None => false,
            }
        }
    })
    .await;
    assert!(finished, "execution did not stop");

    let record = engine
        .progress()
        .get_execution(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, "failed");
    assert_eq!(record.message.as_deref(), Some("Emergency stop requested"));

    // The test send ran; the live send never did
    let modes = mock.modes.lock().unwrap().clone();
    assert_eq!(modes, vec!["test-live-send"]);

    let history = execution_history::Entity::find()
        .filter(execution_history::Column::AutomationId.eq("a1"))
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.status, "failed");
    assert_eq!(history.error_message.as_deref(), Some("Emergency stop requested"));
}

#[tokio::test]
async fn test_reschedule_during_run_aborts_and_replaces() {
    let (base, _mock) = spawn_downstream().await;
    let (db, engine) = build_engine(&base).await;

    let automation_v1 = automation("a1", 25, false);
    insert_definition(&db, &automation_v1).await;

    let execution_id = engine.execute_now("a1").await.unwrap();
    let in_window = wait_until(15, || {
        let engine = engine.clone();
        async move {
            matches!(
                engine.execution_status("a1").await,
                Some(status) if status.phase == ExecutionPhase::CancellationWindow
            )
        }
    })
    .await;
    assert!(in_window, "execution never reached the cancellation window");

    // Reschedule with a new send time while the run is in its window
    let mut automation_v2 = automation("a1", 25, false);
    automation_v2.schedule.execution_time = "09:15".to_string();
    let result = engine.schedule_automation(&automation_v2).await;
    assert!(result.ok, "{}", result.message);

    // The running execution aborted...
    let record = engine
        .progress()
        .get_execution(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, "aborted");

    // ...the active table is empty, and exactly the new handle is armed
    assert!(engine.execution_status("a1").await.is_none());
    let info = engine.debug_info().await;
    let scheduled = info["scheduled"].as_array().unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0]["cronExpression"], "45 8 * * *");
}

#[tokio::test]
async fn test_test_artifacts_are_cleaned_up() {
    let (base, _mock) = spawn_downstream().await;
    let (db, engine) = build_engine(&base).await;

    let mut automation = automation("t1", 0, false);
    automation.name = "TEST SCHEDULED: validation run".to_string();
    insert_definition(&db, &automation).await;

    assert!(engine.schedule_automation(&automation).await.ok);
    let execution_id = engine.execute_now("t1").await.unwrap();

    let finished = wait_until(15, || {
        let engine = engine.clone();
        let execution_id = execution_id.clone();
        async move {
            match engine.progress().get_execution(&execution_id).await.unwrap() {
                Some(record) => record.status != "running",
                None => false,
            }
        }
    })
    .await;
    assert!(finished, "execution did not reach a terminal state");

    let record = engine
        .progress()
        .get_execution(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, "completed");

    // Cleanup removed both the cron handle and the definition
    assert!(!engine.is_scheduled("t1").await);
    let definition = automations::Entity::find_by_id("t1")
        .one(db.as_ref())
        .await
        .unwrap();
    assert!(definition.is_none());
}
