#![allow(clippy::needless_update)]

use async_trait::async_trait;
use sea_orm::sea_query::{Expr, ExprTrait, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    EntityTrait, FromQueryResult, QueryFilter, QuerySelect, Schema, TransactionTrait,
};
use time::OffsetDateTime;

use poolgate_common::AccountId;
use poolgate_pool::{BindingUpsert, UsageRecord};

use crate::entities;
use crate::store::{
    AccountRow, BindingRow, GatewayStore, StorageError, StorageResult, TotalsRow,
};

#[derive(Debug, FromQueryResult)]
struct TotalsQueryRow {
    rows: Option<i64>,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    cost: Option<f64>,
}

#[derive(Clone)]
pub struct SqlStorage {
    db: DatabaseConnection,
}

impl SqlStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        // Cascade deletes from accounts to usage rows need this on sqlite.
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl GatewayStore for SqlStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Accounts)
            .register(entities::UsageEntries)
            .register(entities::StickyBindings)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn upsert_account(
        &self,
        label: &str,
        credential: &str,
        disabled: bool,
    ) -> StorageResult<AccountId> {
        use entities::accounts::Column;

        let now = OffsetDateTime::now_utc();
        let active = entities::accounts::ActiveModel {
            id: ActiveValue::NotSet,
            label: ActiveValue::Set(label.to_string()),
            credential: ActiveValue::Set(credential.to_string()),
            disabled: ActiveValue::Set(disabled),
            usage_rows: ActiveValue::Set(0),
            input_tokens: ActiveValue::Set(0),
            output_tokens: ActiveValue::Set(0),
            total_cost: ActiveValue::Set(0.0),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        entities::Accounts::insert(active)
            .on_conflict(
                OnConflict::column(Column::Label)
                    .update_columns([Column::Credential, Column::Disabled, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        let row = entities::Accounts::find()
            .filter(Column::Label.eq(label))
            .one(&self.db)
            .await?
            .ok_or_else(|| StorageError::Db(sea_orm::DbErr::RecordNotFound(
                format!("account {label} missing after upsert"),
            )))?;
        Ok(row.id)
    }

    async fn load_accounts(&self) -> StorageResult<Vec<AccountRow>> {
        let rows = entities::Accounts::find().all(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|row| AccountRow {
                id: row.id,
                label: row.label,
                credential: row.credential,
                disabled: row.disabled,
                totals: TotalsRow {
                    rows: row.usage_rows,
                    input_tokens: row.input_tokens,
                    output_tokens: row.output_tokens,
                    cost: row.total_cost,
                },
            })
            .collect())
    }

    async fn write_usage(&self, record: &UsageRecord) -> StorageResult<()> {
        use entities::accounts::Column as AccountColumn;

        let account_id = record.account_id;
        let input_tokens = record.input_tokens;
        let output_tokens = record.output_tokens;
        let cost = record.cost;
        let status = record.status.as_str().to_string();
        let recorded_at = OffsetDateTime::from(record.recorded_at);

        let result = self
            .db
            .transaction(move |txn| {
                Box::pin(async move {
                    let now = OffsetDateTime::now_utc();
                    let entry = entities::usage_entries::ActiveModel {
                        id: ActiveValue::NotSet,
                        account_id: ActiveValue::Set(account_id),
                        input_tokens: ActiveValue::Set(input_tokens),
                        output_tokens: ActiveValue::Set(output_tokens),
                        cost: ActiveValue::Set(cost),
                        status: ActiveValue::Set(status),
                        recorded_at: ActiveValue::Set(recorded_at),
                        created_at: ActiveValue::Set(now),
                        ..Default::default()
                    };
                    entities::UsageEntries::insert(entry).exec(txn).await?;

                    entities::Accounts::update_many()
                        .col_expr(
                            AccountColumn::UsageRows,
                            Expr::col(AccountColumn::UsageRows).add(1),
                        )
                        .col_expr(
                            AccountColumn::InputTokens,
                            Expr::col(AccountColumn::InputTokens).add(input_tokens),
                        )
                        .col_expr(
                            AccountColumn::OutputTokens,
                            Expr::col(AccountColumn::OutputTokens).add(output_tokens),
                        )
                        .col_expr(
                            AccountColumn::TotalCost,
                            Expr::col(AccountColumn::TotalCost).add(cost),
                        )
                        .col_expr(AccountColumn::UpdatedAt, Expr::value(now))
                        .filter(AccountColumn::Id.eq(account_id))
                        .exec(txn)
                        .await?;
                    Ok::<(), sea_orm::DbErr>(())
                })
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(sea_orm::TransactionError::Connection(err)) => Err(err.into()),
            Err(sea_orm::TransactionError::Transaction(err)) => Err(err.into()),
        }
    }

    async fn upsert_binding(&self, upsert: &BindingUpsert) -> StorageResult<()> {
        use entities::sticky_bindings::Column;

        let active = entities::sticky_bindings::ActiveModel {
            session_key: ActiveValue::Set(upsert.session_key.clone()),
            account_id: ActiveValue::Set(upsert.account_id),
            last_touched_at: ActiveValue::Set(OffsetDateTime::from(upsert.touched_at)),
            ..Default::default()
        };
        entities::StickyBindings::insert(active)
            .on_conflict(
                OnConflict::column(Column::SessionKey)
                    .update_columns([Column::AccountId, Column::LastTouchedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn load_bindings(&self) -> StorageResult<Vec<BindingRow>> {
        let rows = entities::StickyBindings::find().all(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|row| BindingRow {
                session_key: row.session_key,
                account_id: row.account_id,
                last_touched_at: row.last_touched_at,
            })
            .collect())
    }

    async fn totals_from_rows(&self, account_id: AccountId) -> StorageResult<TotalsRow> {
        use entities::usage_entries::Column;

        let row = entities::UsageEntries::find()
            .select_only()
            .column_as(Column::Id.count(), "rows")
            .column_as(Column::InputTokens.sum(), "input_tokens")
            .column_as(Column::OutputTokens.sum(), "output_tokens")
            .column_as(Column::Cost.sum(), "cost")
            .filter(Column::AccountId.eq(account_id))
            .into_model::<TotalsQueryRow>()
            .one(&self.db)
            .await?;

        // No rows means zero consumption, never an absent/maximal sentinel.
        let row = row.unwrap_or(TotalsQueryRow {
            rows: None,
            input_tokens: None,
            output_tokens: None,
            cost: None,
        });
        Ok(TotalsRow {
            rows: row.rows.unwrap_or(0),
            input_tokens: row.input_tokens.unwrap_or(0),
            output_tokens: row.output_tokens.unwrap_or(0),
            cost: row.cost.unwrap_or(0.0),
        })
    }
}
