use pushcast::audience::GeneratorRegistry;
use pushcast::automation::models::{
    AudienceCriteria, Automation, AutomationPush, AutomationSchedule, AutomationSettings,
    AutomationStatus, Frequency,
};
use pushcast::config::{Config, EngineVersion};
use pushcast::engine::AutomationEngine;
use pushcast::establish_connection;
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

fn daily_automation(id: &str, execution_time: &str) -> Automation {
    Automation {
        id: id.to_string(),
        name: format!("Automation {id}"),
        is_active: true,
        status: AutomationStatus::Active,
        schedule: AutomationSchedule {
            timezone: "America/Chicago".to_string(),
            frequency: Frequency::Daily,
            execution_time: execution_time.to_string(),
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

async fn test_engine() -> Arc<AutomationEngine> {
    let db = establish_connection("sqlite::memory:").await.unwrap();
    AutomationEngine::new(Arc::new(db), &test_config(), GeneratorRegistry::new()).await
}

#[tokio::test]
async fn test_schedule_installs_single_entry() {
    let engine = test_engine().await;
    let automation = daily_automation("a1", "14:30");

    let result = engine.schedule_automation(&automation).await;
    assert!(result.ok, "{}", result.message);
    assert!(engine.is_scheduled("a1").await);

    let info = engine.debug_info().await;
    let scheduled = info["scheduled"].as_array().unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0]["cronExpression"], "0 14 * * *");
    assert_eq!(scheduled[0]["timezone"], "America/Chicago");
}

#[tokio::test]
async fn test_reschedule_replaces_entry() {
    let engine = test_engine().await;

    let result = engine.schedule_automation(&daily_automation("a1", "14:30")).await;
    assert!(result.ok);
    let result = engine.schedule_automation(&daily_automation("a1", "09:15")).await;
    assert!(result.ok);

    let info = engine.debug_info().await;
    let scheduled = info["scheduled"].as_array().unwrap();
    assert_eq!(scheduled.len(), 1, "rescheduling must replace, not duplicate");
    assert_eq!(scheduled[0]["cronExpression"], "45 8 * * *");
}

#[tokio::test]
async fn test_schedule_rejects_malformed_automation() {
    let engine = test_engine().await;

    let mut automation = daily_automation("a1", "14:30");
    automation.push_sequence.clear();
    let result = engine.schedule_automation(&automation).await;
    assert!(!result.ok);
    assert!(!engine.is_scheduled("a1").await, "no partial state on failure");

    let mut automation = daily_automation("a2", "25:99");
    automation.schedule.execution_time = "25:99".to_string();
    let result = engine.schedule_automation(&automation).await;
    assert!(!result.ok);
    assert!(!engine.is_scheduled("a2").await);
}

#[tokio::test]
async fn test_unschedule_is_idempotent() {
    let engine = test_engine().await;
    let automation = daily_automation("a1", "14:30");
    assert!(engine.schedule_automation(&automation).await.ok);

    let first = engine.unschedule_automation("a1").await;
    assert!(first.ok);
    assert!(!engine.is_scheduled("a1").await);

    let second = engine.unschedule_automation("a1").await;
    assert!(second.ok);
    assert!(second.message.contains("was not scheduled"));
}

#[tokio::test]
async fn test_shutdown_leaves_no_armed_handles() {
    let engine = test_engine().await;
    for (id, time) in [("a1", "14:30"), ("a2", "06:00"), ("a3", "22:10")] {
        assert!(engine.schedule_automation(&daily_automation(id, time)).await.ok);
    }

    engine.shutdown().await;

    let info = engine.debug_info().await;
    assert_eq!(info["scheduled"].as_array().unwrap().len(), 0);
    for id in ["a1", "a2", "a3"] {
        assert!(!engine.is_scheduled(id).await);
    }

    // Repeated delivery of the shutdown signal is a no-op
    engine.shutdown().await;
}

#[tokio::test]
async fn test_timezone_and_custom_frequency() {
    let engine = test_engine().await;

    let mut automation = daily_automation("a1", "10:00");
    automation.schedule.frequency = Frequency::Custom;
    automation.schedule.cron_expression = Some("15 3 * * 2".to_string());
    let result = engine.schedule_automation(&automation).await;
    assert!(result.ok, "{}", result.message);

    let info = engine.debug_info().await;
    assert_eq!(info["scheduled"][0]["cronExpression"], "15 3 * * 2");

    let mut automation = daily_automation("a2", "10:00");
    automation.schedule.timezone = "Mars/Olympus_Mons".to_string();
    let result = engine.schedule_automation(&automation).await;
    assert!(!result.ok);
}
