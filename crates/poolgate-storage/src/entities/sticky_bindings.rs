use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sticky_bindings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_key: String,
    pub account_id: i64,
    pub last_touched_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
