use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One run of a background sweep, scheduled or triggered by hand.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job_executions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub job_name: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub success: Option<i64>, // NULL while running
    pub error_message: Option<String>,
    pub records_processed: Option<i64>,
}

impl Model {
    /// `None` while the run is still in progress.
    pub fn succeeded(&self) -> Option<bool> {
        self.success.map(|s| s == 1)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
