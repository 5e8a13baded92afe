pub mod registry;
pub mod subprocess;

pub use registry::{AudienceGenerator, CsvArtifact, GenerationRequest, GenerationResult, GeneratorRegistry};
pub use subprocess::{truncate_output, ScriptExecutor, ScriptOutput};

use std::path::PathBuf;
use std::sync::Arc;

use crate::automation::errors::{PushCastError, Result};
use crate::automation::models::{Automation, AutomationPush};
use crate::config::EngineVersion;

/// Script id used when an automation carries no custom script.
pub const DEFAULT_SCRIPT_ID: &str = "default-audience";

/// Outcome of generating the audience for one push.
#[derive(Debug, Clone)]
pub struct AudienceOutcome {
    pub audience_size: i64,
    pub artifact_count: usize,
}

/// Facade over the two generation backends. The in-process registry is
/// preferred on the v2 engine whenever the script id is registered; the
/// legacy subprocess executor covers everything else (and all of v1).
pub struct AudienceService {
    registry: Arc<GeneratorRegistry>,
    executor: Arc<ScriptExecutor>,
    engine_version: EngineVersion,
    output_dir: PathBuf,
    cadence_service_url: Option<String>,
}

impl AudienceService {
    pub fn new(
        registry: Arc<GeneratorRegistry>,
        executor: Arc<ScriptExecutor>,
        engine_version: EngineVersion,
        output_dir: PathBuf,
        cadence_service_url: Option<String>,
    ) -> Self {
        Self {
            registry,
            executor,
            engine_version,
            output_dir,
            cadence_service_url,
        }
    }

    pub async fn generate_for_push(
        &self,
        automation: &Automation,
        push: &AutomationPush,
        execution_id: &str,
    ) -> Result<AudienceOutcome> {
        let script_id = automation.script_id().unwrap_or(DEFAULT_SCRIPT_ID);
        let dry_run = automation.audience_criteria.test_mode;

        if self.engine_version == EngineVersion::V2 {
            if let Some(generator) = self.registry.get(script_id) {
                return self
                    .generate_in_process(&*generator, automation, push, script_id, dry_run)
                    .await;
            }
        }

        self.generate_via_subprocess(automation, push, script_id, execution_id, dry_run)
            .await
    }

    async fn generate_in_process(
        &self,
        generator: &dyn AudienceGenerator,
        automation: &Automation,
        push: &AutomationPush,
        script_id: &str,
        dry_run: bool,
    ) -> Result<AudienceOutcome> {
        let custom = automation.audience_criteria.custom_script.as_ref();
        let request = GenerationRequest {
            automation_id: automation.id.clone(),
            push_id: push.id.clone(),
            lookback_hours: custom.and_then(|s| s.lookback_hours),
            cooling_hours: custom.and_then(|s| s.cooling_hours),
            output_dir: self.output_dir.clone(),
            dry_run,
            cadence_service_url: self.cadence_service_url.clone(),
        };

        let result = generator.generate(&request).await?;
        if !result.success {
            return Err(PushCastError::AudienceGeneration(format!(
                "Generator {} failed for push {}: {}",
                script_id,
                push.id,
                result.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        Ok(AudienceOutcome {
            audience_size: result.audience_size,
            artifact_count: result.csv_files.len(),
        })
    }

    async fn generate_via_subprocess(
        &self,
        automation: &Automation,
        push: &AutomationPush,
        script_id: &str,
        execution_id: &str,
        dry_run: bool,
    ) -> Result<AudienceOutcome> {
        let custom = automation.audience_criteria.custom_script.as_ref();
        let mut args = vec![
            format!("--automation-id={}", automation.id),
            format!("--push-id={}", push.id),
            format!("--output-dir={}", self.output_dir.display()),
        ];
        if let Some(hours) = custom.and_then(|s| s.lookback_hours) {
            args.push(format!("--lookback-hours={hours}"));
        }
        if let Some(hours) = custom.and_then(|s| s.cooling_hours) {
            args.push(format!("--cooling-hours={hours}"));
        }
        if let Some(url) = &self.cadence_service_url {
            args.push(format!("--cadence-service-url={url}"));
        }

        let output = self
            .executor
            .execute_script(script_id, &args, execution_id, dry_run)
            .await?;

        if !output.success {
            // Keep both streams in the surfaced error, each bounded.
            return Err(PushCastError::AudienceGeneration(format!(
                "Script {} failed for push {}: {}",
                script_id,
                push.id,
                output.error.unwrap_or_else(|| format!(
                    "stdout: {}; stderr: {}",
                    truncate_output(&output.stdout),
                    truncate_output(&output.stderr)
                ))
            )));
        }

        Ok(AudienceOutcome {
            audience_size: output.audience_size,
            artifact_count: output.generated_files.len(),
        })
    }
}
