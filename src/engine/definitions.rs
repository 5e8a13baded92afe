use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;

use crate::automation::errors::{PushCastError, Result};
use crate::automation::models::Automation;
use crate::database::automations;

/// Read-side of the automation definition store. Definitions are authored
/// elsewhere; the engine consumes them and only ever deletes throwaway test
/// artifacts after a successful validation run.
#[derive(Clone)]
pub struct DefinitionStore {
    db: Arc<DatabaseConnection>,
}

impl DefinitionStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn load(&self, automation_id: &str) -> Result<Automation> {
        let row = automations::Entity::find_by_id(automation_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| PushCastError::AutomationNotFound(automation_id.to_string()))?;

        let automation: Automation = serde_json::from_str(&row.definition).map_err(|e| {
            PushCastError::InvalidAutomation(format!(
                "Definition for {automation_id} failed to parse: {e}"
            ))
        })?;
        Ok(automation)
    }

    /// All definitions that parse. Malformed documents are skipped with a
    /// validation warning so one bad row cannot block restoration.
    pub async fn list(&self) -> Result<Vec<Automation>> {
        let rows = automations::Entity::find().all(&*self.db).await?;

        let mut parsed = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<Automation>(&row.definition) {
                Ok(automation) => parsed.push(automation),
                Err(e) => {
                    tracing::warn!(
                        "Skipping automation {} ('{}'): definition failed validation: {}",
                        row.id,
                        row.name,
                        e
                    );
                }
            }
        }
        Ok(parsed)
    }

    pub async fn delete(&self, automation_id: &str) -> Result<()> {
        automations::Entity::delete_by_id(automation_id)
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
