use crate::repository::CardRepository;
use database::{Database, RepositoryError};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: usize,
    pub failed: usize,
    pub errors: Vec<MigrationFailure>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MigrationFailure {
    pub id: i64,
    pub error: String,
}

/// New value for a stored name column, or `None` when it is already a list (or empty).
pub fn migrate_names(stored: Option<&str>) -> Option<Vec<String>> {
    match serde_json::from_str::<Value>(stored?) {
        Ok(Value::String(name)) => {
            let name = name.trim();
            Some(if name.is_empty() { Vec::new() } else { vec![name.to_string()] })
        }
        _ => None,
    }
}

/// Rewrites `from`/`to` values stored as a single string into one-element lists.
///
/// Each card is written in its own unit of work. A card that fails is recorded in the
/// report and the batch moves on. Running it again once every row is a list is a no-op.
pub struct LegacyFieldMigrator<'a> {
    db: &'a Database,
}

impl<'a> LegacyFieldMigrator<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn run(&self) -> Result<MigrationReport, RepositoryError> {
        let rows = {
            let mut uow = self.db.begin().await?;
            let mut repo = CardRepository::new(uow.connection());
            repo.find_legacy_name_fields().await?
        };

        let mut report = MigrationReport {
            scanned: rows.len(),
            ..Default::default()
        };

        for row in rows {
            let from = migrate_names(row.senders.as_deref());
            let to = migrate_names(row.recipients.as_deref());

            match self.write(row.id, from.as_deref(), to.as_deref()).await {
                Ok(()) => {
                    report.migrated += 1;
                    tracing::info!(card_id = row.id, ?from, ?to, "Migrated card names to lists");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(card_id = row.id, "Failed to migrate card names: {}", e);
                    report.errors.push(MigrationFailure {
                        id: row.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            migrated = report.migrated,
            failed = report.failed,
            "Legacy name migration complete"
        );
        Ok(report)
    }

    async fn write(
        &self,
        id: i64,
        from: Option<&[String]>,
        to: Option<&[String]>,
    ) -> Result<(), RepositoryError> {
        let mut uow = self.db.begin().await?;
        let mut repo = CardRepository::new(uow.connection());
        repo.write_names(id, from, to).await?;
        uow.commit().await
    }
}
