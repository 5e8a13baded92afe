use pushcast::audience::GeneratorRegistry;
use pushcast::automation::models::{
    AudienceCriteria, Automation, AutomationPush, AutomationSchedule, AutomationSettings,
    AutomationStatus, Frequency,
};
use pushcast::config::{Config, EngineVersion};
use pushcast::database::automations;
use pushcast::engine::AutomationEngine;
use pushcast::establish_connection;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::path::PathBuf;
use std::sync::Arc;

fn test_config() -> Config {
    Config {
        port: 3001,
        database_url: "sqlite::memory:".to_string(),
        downstream_base_url: "http://localhost:3001".to_string(),
        cadence_service_url: None,
        engine_version: EngineVersion::V2,
        scripts_dir: PathBuf::from("scripts"),
        output_dir: PathBuf::from("data/audiences"),
        build_phase: false,
    }
}

fn automation(id: &str, status: AutomationStatus, is_active: bool) -> Automation {
    Automation {
        id: id.to_string(),
        name: format!("Automation {id}"),
        is_active,
        status,
        schedule: AutomationSchedule {
            timezone: "America/Chicago".to_string(),
            frequency: Frequency::Daily,
            execution_time: "14:30".to_string(),
            start_date: None,
            lead_time_minutes: Some(30),
            cron_expression: None,
        },
        push_sequence: vec![AutomationPush {
            id: "p1".to_string(),
            sequence_order: 1,
            title: "Title".to_string(),
            body: "Body".to_string(),
            layer_id: None,
            deep_link: None,
        }],
        audience_criteria: AudienceCriteria::default(),
        settings: AutomationSettings::default(),
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

async fn insert_raw_definition(db: &DatabaseConnection, id: &str, definition: &str) {
    let row = automations::ActiveModel {
        id: Set(id.to_string()),
        name: Set(id.to_string()),
        definition: Set(definition.to_string()),
        created_at: Set(chrono::Utc::now()),
        updated_at: Set(chrono::Utc::now()),
    };
    row.insert(db).await.unwrap();
}

#[tokio::test]
async fn test_restoration_fidelity() {
    let db = Arc::new(establish_connection("sqlite::memory:").await.unwrap());

    // Only active+scheduled definitions belong in the schedule table
    insert_definition(&db, &automation("active-1", AutomationStatus::Active, true)).await;
    insert_definition(&db, &automation("sched-1", AutomationStatus::Scheduled, true)).await;
    insert_definition(&db, &automation("paused-1", AutomationStatus::Paused, true)).await;
    insert_definition(&db, &automation("inactive-1", AutomationStatus::Active, false)).await;
    insert_definition(&db, &automation("draft-1", AutomationStatus::Draft, true)).await;

    // Malformed documents are skipped with a warning, not fatal
    insert_raw_definition(&db, "broken-1", "{\"id\": \"broken-1\"").await;
    insert_raw_definition(&db, "missing-fields", "{\"id\": \"missing-fields\"}").await;

    let engine = AutomationEngine::new(db.clone(), &test_config(), GeneratorRegistry::new()).await;
    engine.startup_restore().await;

    assert!(engine.is_scheduled("active-1").await);
    assert!(engine.is_scheduled("sched-1").await);
    assert!(!engine.is_scheduled("paused-1").await);
    assert!(!engine.is_scheduled("inactive-1").await);
    assert!(!engine.is_scheduled("draft-1").await);
    assert!(!engine.is_scheduled("broken-1").await);
    assert!(!engine.is_scheduled("missing-fields").await);

    let status = engine.restoration_status().await;
    assert!(status.last_restoration_attempt.is_some());
    assert!(status.last_restoration_success.is_some());
    assert_eq!(status.restored_count, 2);
}

#[tokio::test]
async fn test_restoration_with_empty_store() {
    let db = Arc::new(establish_connection("sqlite::memory:").await.unwrap());
    let engine = AutomationEngine::new(db, &test_config(), GeneratorRegistry::new()).await;

    engine.startup_restore().await;

    let status = engine.restoration_status().await;
    assert!(status.last_restoration_success.is_some());
    assert_eq!(status.restored_count, 0);
    assert_eq!(
        engine.debug_info().await["scheduled"].as_array().unwrap().len(),
        0
    );
}
