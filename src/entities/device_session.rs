use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub device_code: String,
    pub status: String, // "pending" | "approved" | "expired" | "consumed" | "cancelled"
    pub created_at: i64,
    pub expires_at: i64,
    pub requested_token_name: String,
    pub owner_subject: Option<String>,
    // Sealed credential, base64. Only populated while status == "approved".
    pub sealed_ciphertext: Option<String>,
    pub sealed_nonce: Option<String>,
    pub sealed_tag: Option<String>,
    pub bound_token_id: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub approved_at: Option<i64>,
    pub consumed_at: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
