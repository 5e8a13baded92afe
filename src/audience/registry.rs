use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::automation::errors::Result;

/// Inputs handed to an audience generator for a single push.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub automation_id: String,
    pub push_id: String,
    pub lookback_hours: Option<i64>,
    pub cooling_hours: Option<i64>,
    pub output_dir: PathBuf,
    pub dry_run: bool,
    pub cadence_service_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvArtifact {
    pub path: String,
    pub row_count: i64,
    pub is_test_file: bool,
    pub audience_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationResult {
    pub success: bool,
    pub audience_size: i64,
    pub csv_files: Vec<CsvArtifact>,
    pub error: Option<String>,
}

/// An in-process audience generator. Implementations run their own DB
/// queries and write CSV artifacts under `output_dir`.
#[async_trait]
pub trait AudienceGenerator: Send + Sync {
    fn script_id(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult>;
}

/// Registry of in-process generators keyed by script id.
#[derive(Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn AudienceGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, generator: Arc<dyn AudienceGenerator>) {
        self.generators
            .insert(generator.script_id().to_string(), generator);
    }

    pub fn has(&self, script_id: &str) -> bool {
        self.generators.contains_key(script_id)
    }

    pub fn get(&self, script_id: &str) -> Option<Arc<dyn AudienceGenerator>> {
        self.generators.get(script_id).cloned()
    }

    pub fn script_ids(&self) -> Vec<String> {
        self.generators.keys().cloned().collect()
    }
}
