use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// A storable record produced by a rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataCell {
    pub task_name: String,
    pub rule_name: String,
    pub url: String,
    pub time: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl DataCell {
    pub fn task_name(&self) -> &str {
        &self.task_name
    }
}

/// Persistence backend for extracted records.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save(&self, cell: &DataCell) -> Result<(), StorageError>;
}
