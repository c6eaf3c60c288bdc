use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// One upstream credential/quota unit. The token columns are the derived
/// aggregate over `usage_entries`; both are written in the same transaction.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "account_label")]
    pub label: String,
    pub credential: String,
    pub disabled: bool,
    pub usage_rows: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_cost: f64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
