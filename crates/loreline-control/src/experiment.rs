//! A/B experiments with stable bucketing.
//!
//! The bucket for a subject is `sha256(experiment_id || "|" || subject_key)
//! mod 100`; variants are walked in declared order and the first
//! bucket-enclosing one wins (the last variant absorbs any remainder when
//! weights sum below 100). Assignments persist with insert-if-absent
//! semantics, so a subject's variant never changes, not even when the
//! weights later do.

use std::sync::Mutex;

use chrono::Utc;
use loreline_core::Scope;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub weight: u32,
    #[serde(default)]
    pub strategy_overrides: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub tenant_id: String,
    pub site_id: String,
    pub name: String,
    pub status: String,
    pub subject_type: String,
    pub variants: Vec<Variant>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentAssignment {
    pub experiment_id: String,
    pub experiment_name: String,
    pub variant: String,
    pub bucket_hash: u32,
    #[serde(default)]
    pub strategy_overrides: Value,
    pub is_new_assignment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExperimentAssignment {
    /// Degraded assignment used when bucketing is impossible; callers treat
    /// `control` with no overrides as the safe default.
    pub fn default_control(error: impl Into<String>) -> Self {
        Self {
            experiment_id: String::new(),
            experiment_name: String::new(),
            variant: "control".to_string(),
            bucket_hash: 0,
            strategy_overrides: Value::Object(Default::default()),
            is_new_assignment: false,
            error: Some(error.into()),
        }
    }
}

/// Deterministic bucket in [0, 100).
pub fn bucket_for(experiment_id: &str, subject_key: &str) -> u32 {
    let digest = Sha256::digest(format!("{}|{}", experiment_id, subject_key).as_bytes());
    let head = u64::from_be_bytes(digest[..8].try_into().expect("8 bytes"));
    (head % 100) as u32
}

/// Walk variants in order; the last one absorbs the remainder.
fn variant_for(variants: &[Variant], bucket: u32) -> Option<&Variant> {
    let mut cumulative = 0u32;
    for variant in variants {
        cumulative += variant.weight;
        if bucket < cumulative {
            return Some(variant);
        }
    }
    variants.last()
}

pub struct ExperimentStore {
    db: Mutex<Connection>,
}

impl ExperimentStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn create(
        &self,
        scope: &Scope,
        name: &str,
        subject_type: &str,
        variants: Vec<Variant>,
    ) -> Result<Experiment> {
        if variants.is_empty() {
            return Err(ControlError::Invalid {
                entity: "experiment".to_string(),
                reason: "at least one variant is required".to_string(),
            });
        }
        let total: u32 = variants.iter().map(|v| v.weight).sum();
        if total > 100 {
            return Err(ControlError::Invalid {
                entity: "experiment".to_string(),
                reason: format!("variant weights sum to {} (max 100)", total),
            });
        }

        let now = Utc::now().to_rfc3339();
        let experiment = Experiment {
            id: Uuid::new_v4().to_string(),
            tenant_id: scope.tenant_id.clone(),
            site_id: scope.site_id.clone(),
            name: name.to_string(),
            status: "draft".to_string(),
            subject_type: subject_type.to_string(),
            variants,
            created_at: now.clone(),
            updated_at: now,
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO experiments
             (id, tenant_id, site_id, name, status, subject_type, variants,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            rusqlite::params![
                experiment.id,
                experiment.tenant_id,
                experiment.site_id,
                experiment.name,
                experiment.status,
                experiment.subject_type,
                serde_json::to_string(&experiment.variants)?,
                experiment.created_at,
                experiment.updated_at,
            ],
        )?;
        info!(experiment_id = %experiment.id, "experiment created");
        Ok(experiment)
    }

    pub fn get(&self, experiment_id: &str) -> Result<Option<Experiment>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                &format!("{} WHERE id = ?1", SELECT),
                [experiment_id],
                row_to_experiment,
            )
            .ok())
    }

    pub fn set_status(&self, experiment_id: &str, status: &str) -> Result<Experiment> {
        if !matches!(status, "draft" | "active" | "paused" | "ended") {
            return Err(ControlError::Invalid {
                entity: "experiment status".to_string(),
                reason: format!("unknown status: {}", status),
            });
        }
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE experiments SET status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![status, Utc::now().to_rfc3339(), experiment_id],
        )?;
        if n == 0 {
            return Err(ControlError::NotFound {
                entity: "experiment".to_string(),
                id: experiment_id.to_string(),
            });
        }
        drop(db);
        self.get(experiment_id)?.ok_or(ControlError::NotFound {
            entity: "experiment".to_string(),
            id: experiment_id.to_string(),
        })
    }

    /// Update variant definitions. Existing assignments are untouched: a
    /// subject already bucketed keeps its recorded variant forever.
    pub fn update_variants(&self, experiment_id: &str, variants: Vec<Variant>) -> Result<Experiment> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE experiments SET variants = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![
                serde_json::to_string(&variants)?,
                Utc::now().to_rfc3339(),
                experiment_id
            ],
        )?;
        if n == 0 {
            return Err(ControlError::NotFound {
                entity: "experiment".to_string(),
                id: experiment_id.to_string(),
            });
        }
        drop(db);
        self.get(experiment_id)?.ok_or(ControlError::NotFound {
            entity: "experiment".to_string(),
            id: experiment_id.to_string(),
        })
    }

    pub fn list_active(&self, scope: &Scope) -> Result<Vec<Experiment>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{} WHERE tenant_id = ?1 AND site_id = ?2 AND status = 'active'
             ORDER BY created_at",
            SELECT
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![scope.tenant_id, scope.site_id],
                row_to_experiment,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Stable bucket assignment. The write is insert-if-absent: when a
    /// concurrent writer recorded the assignment first, the stored variant
    /// wins and is returned.
    pub fn assign(&self, experiment_id: &str, subject_key: &str) -> Result<ExperimentAssignment> {
        if subject_key.is_empty() {
            return Ok(ExperimentAssignment::default_control("missing_subject_key"));
        }
        let Some(experiment) = self.get(experiment_id)? else {
            return Ok(ExperimentAssignment::default_control("experiment_not_found"));
        };
        if experiment.status != "active" {
            return Ok(ExperimentAssignment::default_control("experiment_not_active"));
        }

        let bucket = bucket_for(experiment_id, subject_key);

        let db = self.db.lock().unwrap();
        let existing: Option<(String, i64)> = db
            .query_row(
                "SELECT variant, bucket_hash FROM experiment_assignments
                 WHERE experiment_id = ?1 AND subject_key = ?2",
                [experiment_id, subject_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();

        if let Some((variant_name, stored_bucket)) = existing {
            let overrides = experiment
                .variants
                .iter()
                .find(|v| v.name == variant_name)
                .map(|v| v.strategy_overrides.clone())
                .unwrap_or(Value::Object(Default::default()));
            return Ok(ExperimentAssignment {
                experiment_id: experiment.id,
                experiment_name: experiment.name,
                variant: variant_name,
                bucket_hash: stored_bucket as u32,
                strategy_overrides: overrides,
                is_new_assignment: false,
                error: None,
            });
        }

        let Some(variant) = variant_for(&experiment.variants, bucket) else {
            return Ok(ExperimentAssignment::default_control("no_variants"));
        };

        let inserted = db.execute(
            "INSERT OR IGNORE INTO experiment_assignments
             (experiment_id, subject_key, variant, bucket_hash, created_at)
             VALUES (?1,?2,?3,?4,?5)",
            rusqlite::params![
                experiment_id,
                subject_key,
                variant.name,
                bucket as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;

        // Lost the race: re-read the winner.
        if inserted == 0 {
            let (variant_name, stored_bucket): (String, i64) = db.query_row(
                "SELECT variant, bucket_hash FROM experiment_assignments
                 WHERE experiment_id = ?1 AND subject_key = ?2",
                [experiment_id, subject_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let overrides = experiment
                .variants
                .iter()
                .find(|v| v.name == variant_name)
                .map(|v| v.strategy_overrides.clone())
                .unwrap_or(Value::Object(Default::default()));
            return Ok(ExperimentAssignment {
                experiment_id: experiment.id,
                experiment_name: experiment.name,
                variant: variant_name,
                bucket_hash: stored_bucket as u32,
                strategy_overrides: overrides,
                is_new_assignment: false,
                error: None,
            });
        }

        info!(experiment_id, subject_key, variant = %variant.name, bucket, "subject bucketed");
        Ok(ExperimentAssignment {
            experiment_id: experiment.id.clone(),
            experiment_name: experiment.name.clone(),
            variant: variant.name.clone(),
            bucket_hash: bucket,
            strategy_overrides: variant.strategy_overrides.clone(),
            is_new_assignment: true,
            error: None,
        })
    }
}

const SELECT: &str =
    "SELECT id, tenant_id, site_id, name, status, subject_type, variants,
            created_at, updated_at
     FROM experiments";

fn row_to_experiment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Experiment> {
    let variants_json: String = row.get(6)?;
    Ok(Experiment {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        site_id: row.get(2)?,
        name: row.get(3)?,
        status: row.get(4)?,
        subject_type: row.get(5)?,
        variants: serde_json::from_str(&variants_json).unwrap_or_default(),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ExperimentStore {
        ExperimentStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn two_variants() -> Vec<Variant> {
        vec![
            Variant {
                name: "control".to_string(),
                weight: 50,
                strategy_overrides: json!({"retrieval_strategy": "trgm"}),
            },
            Variant {
                name: "treatment".to_string(),
                weight: 50,
                strategy_overrides: json!({"retrieval_strategy": "hybrid"}),
            },
        ]
    }

    fn active_experiment(store: &ExperimentStore) -> Experiment {
        let exp = store
            .create(&Scope::new("t1", "s1"), "retrieval-ab", "session_id", two_variants())
            .unwrap();
        store.set_status(&exp.id, "active").unwrap()
    }

    #[test]
    fn assignment_is_stable_across_calls() {
        let store = store();
        let exp = active_experiment(&store);
        let first = store.assign(&exp.id, "sess-A").unwrap();
        assert!(first.is_new_assignment);
        for _ in 0..100 {
            let again = store.assign(&exp.id, "sess-A").unwrap();
            assert_eq!(again.variant, first.variant);
            assert_eq!(again.bucket_hash, first.bucket_hash);
            assert!(!again.is_new_assignment);
        }
    }

    #[test]
    fn weight_change_does_not_rebucket_existing_subjects() {
        let store = store();
        let exp = active_experiment(&store);
        let original = store.assign(&exp.id, "sess-A").unwrap();

        store
            .update_variants(
                &exp.id,
                vec![
                    Variant {
                        name: "control".to_string(),
                        weight: 80,
                        strategy_overrides: json!({}),
                    },
                    Variant {
                        name: "treatment".to_string(),
                        weight: 20,
                        strategy_overrides: json!({}),
                    },
                ],
            )
            .unwrap();

        let after = store.assign(&exp.id, "sess-A").unwrap();
        assert_eq!(after.variant, original.variant);
    }

    #[test]
    fn bucket_is_deterministic_and_bounded() {
        let a = bucket_for("exp-1", "sess-A");
        assert_eq!(a, bucket_for("exp-1", "sess-A"));
        assert!(a < 100);
        // Different subjects can land elsewhere; the hash spreads inputs.
        let spread: std::collections::HashSet<u32> =
            (0..50).map(|i| bucket_for("exp-1", &format!("sess-{}", i))).collect();
        assert!(spread.len() > 10);
    }

    #[test]
    fn short_weights_fall_through_to_last_variant() {
        let variants = vec![
            Variant {
                name: "a".to_string(),
                weight: 10,
                strategy_overrides: json!({}),
            },
            Variant {
                name: "b".to_string(),
                weight: 10,
                strategy_overrides: json!({}),
            },
        ];
        // Bucket 99 is outside both declared ranges; the last variant wins.
        assert_eq!(variant_for(&variants, 99).unwrap().name, "b");
        assert_eq!(variant_for(&variants, 5).unwrap().name, "a");
        assert_eq!(variant_for(&variants, 15).unwrap().name, "b");
    }

    #[test]
    fn inactive_experiment_degrades_to_control() {
        let store = store();
        let exp = store
            .create(&Scope::new("t1", "s1"), "paused-ab", "session_id", two_variants())
            .unwrap();
        let assignment = store.assign(&exp.id, "sess-A").unwrap();
        assert_eq!(assignment.variant, "control");
        assert_eq!(assignment.error.as_deref(), Some("experiment_not_active"));
    }
}
