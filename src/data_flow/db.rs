//! Data Flow Database Layer
//!
//! PostgreSQL-backed [`DataFlowStore`]. Every lease change is a single
//! conditional statement, so two runtime instances racing on the same id
//! cannot both win:
//!
//! - acquire: `UPDATE ... WHERE id = $1 AND (lease free) RETURNING ...`
//! - create:  `INSERT ... ON CONFLICT (id) DO NOTHING RETURNING ...`
//! - upsert:  `INSERT ... ON CONFLICT (id) DO UPDATE ... WHERE (lease free or ours)`
//!
//! Lease expiry is computed and compared with the database clock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use super::criterion::{Criterion, Field, Operator};
use super::error::SignalingError;
use super::state::DataFlowState;
use super::store::{DEFAULT_LEASE_DURATION, DataFlowStore, Lease, LeasedFlow};
use super::types::{DataAddress, DataFlow, TransferType};

const COLUMNS: &str = r#"
    id, source::text AS source, destination::text AS destination, callback_address,
    transfer_type::text AS transfer_type, runtime_id, participant_id, asset_id, agreement_id,
    provision_requested, provision_complete, deprovision_requested, deprovision_complete,
    is_consumer, state, state_reason, error_detail, created_at, updated_at
"#;

/// Insert column list matching the `$1..$19` order of [`bind_flow`]
const INSERT_COLUMNS: &str = r#"
    id, source, destination, callback_address, transfer_type, runtime_id,
    participant_id, asset_id, agreement_id,
    provision_requested, provision_complete, deprovision_requested, deprovision_complete,
    is_consumer, state, state_reason, error_detail, created_at, updated_at
"#;

const INSERT_VALUES: &str = r#"
    $1, $2::jsonb, $3::jsonb, $4, $5::jsonb, $6,
    $7, $8, $9,
    $10, $11, $12, $13,
    $14, $15, $16, $17, $18, $19
"#;

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Data flow database operations
pub struct PgDataFlowStore {
    pool: PgPool,
    lease_duration: Duration,
}

impl PgDataFlowStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self::with_lease_duration(pool, DEFAULT_LEASE_DURATION)
    }

    pub fn with_lease_duration(pool: PgPool, lease_duration: Duration) -> Self {
        Self {
            pool,
            lease_duration,
        }
    }

    fn lease_millis(&self) -> i64 {
        self.lease_duration.as_millis().min(i64::MAX as u128) as i64
    }

    async fn exists(&self, id: &str) -> Result<bool, SignalingError> {
        let found = sqlx::query_scalar::<_, i32>("SELECT 1 FROM data_flows_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Convert database row to DataFlow
    fn row_to_flow(row: &PgRow) -> Result<DataFlow, SignalingError> {
        let state_id: i16 = row.try_get("state")?;
        let state = DataFlowState::from_id(state_id)
            .ok_or_else(|| SignalingError::InvalidRecord(format!("Invalid state ID: {}", state_id)))?;

        let source: String = row.try_get("source")?;
        let destination: String = row.try_get("destination")?;
        let transfer_type: String = row.try_get("transfer_type")?;
        let source: DataAddress = serde_json::from_str(&source)?;
        let destination: DataAddress = serde_json::from_str(&destination)?;
        let transfer_type: TransferType = serde_json::from_str(&transfer_type)?;

        Ok(DataFlow {
            id: row.try_get("id")?,
            source,
            destination,
            callback_address: row.try_get("callback_address")?,
            transfer_type,
            runtime_id: row.try_get("runtime_id")?,
            participant_id: row.try_get("participant_id")?,
            asset_id: row.try_get("asset_id")?,
            agreement_id: row.try_get("agreement_id")?,
            provision_requested: row.try_get("provision_requested")?,
            provision_complete: row.try_get("provision_complete")?,
            deprovision_requested: row.try_get("deprovision_requested")?,
            deprovision_complete: row.try_get("deprovision_complete")?,
            is_consumer: row.try_get("is_consumer")?,
            state,
            state_reason: row.try_get("state_reason")?,
            error_detail: row.try_get("error_detail")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Serialized JSON columns of a flow
struct JsonColumns {
    source: String,
    destination: String,
    transfer_type: String,
}

impl JsonColumns {
    fn of(flow: &DataFlow) -> Result<Self, SignalingError> {
        Ok(Self {
            source: serde_json::to_string(&flow.source)?,
            destination: serde_json::to_string(&flow.destination)?,
            transfer_type: serde_json::to_string(&flow.transfer_type)?,
        })
    }
}

/// Bind `$1..$19` in [`INSERT_COLUMNS`] order
fn bind_flow<'q>(query: PgQuery<'q>, flow: &'q DataFlow, json: &'q JsonColumns) -> PgQuery<'q> {
    query
        .bind(&flow.id)
        .bind(&json.source)
        .bind(&json.destination)
        .bind(&flow.callback_address)
        .bind(&json.transfer_type)
        .bind(&flow.runtime_id)
        .bind(&flow.participant_id)
        .bind(&flow.asset_id)
        .bind(&flow.agreement_id)
        .bind(flow.provision_requested)
        .bind(flow.provision_complete)
        .bind(flow.deprovision_requested)
        .bind(flow.deprovision_complete)
        .bind(flow.is_consumer)
        .bind(flow.state.id())
        .bind(&flow.state_reason)
        .bind(&flow.error_detail)
        .bind(flow.created_at)
        .bind(flow.updated_at)
}

#[async_trait]
impl DataFlowStore for PgDataFlowStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<DataFlow>, SignalingError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM data_flows_tb WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_flow).transpose()
    }

    async fn next_not_leased(
        &self,
        max: usize,
        states: &[DataFlowState],
    ) -> Result<Vec<DataFlow>, SignalingError> {
        let state_ids: Vec<i16> = states.iter().map(DataFlowState::id).collect();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM data_flows_tb
            WHERE state = ANY($1)
              AND (lease_token IS NULL OR lease_expires_at <= NOW())
            ORDER BY updated_at ASC
            LIMIT $2
            "#
        ))
        .bind(state_ids)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_flow).collect()
    }

    async fn find_by_id_and_lease(
        &self,
        id: &str,
        holder: &str,
    ) -> Result<LeasedFlow, SignalingError> {
        let token = Uuid::new_v4();

        // Atomic CAS: only succeeds when no live lease exists
        let row = sqlx::query(&format!(
            r#"
            UPDATE data_flows_tb
            SET lease_holder = $2,
                lease_token = $3,
                lease_expires_at = NOW() + ($4::bigint * INTERVAL '1 millisecond')
            WHERE id = $1
              AND (lease_token IS NULL OR lease_expires_at <= NOW())
            RETURNING {COLUMNS}, lease_expires_at
            "#
        ))
        .bind(id)
        .bind(holder)
        .bind(token.to_string())
        .bind(self.lease_millis())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let expires_at: DateTime<Utc> = row.try_get("lease_expires_at")?;
                Ok(LeasedFlow {
                    flow: Self::row_to_flow(&row)?,
                    lease: Lease {
                        flow_id: id.to_string(),
                        holder: holder.to_string(),
                        token,
                        expires_at,
                    },
                })
            }
            None if self.exists(id).await? => {
                debug!(flow_id = %id, "Lease CAS lost");
                Err(SignalingError::conflict(format!(
                    "Data flow {} is leased by another holder",
                    id
                )))
            }
            None => Err(SignalingError::not_found(id)),
        }
    }

    async fn create_leased(&self, flow: &DataFlow, holder: &str) -> Result<Lease, SignalingError> {
        let json = JsonColumns::of(flow)?;
        let token = Uuid::new_v4();

        let sql = format!(
            r#"
            INSERT INTO data_flows_tb
                ({INSERT_COLUMNS}, lease_holder, lease_token, lease_expires_at)
            VALUES
                ({INSERT_VALUES}, $20, $21, NOW() + ($22::bigint * INTERVAL '1 millisecond'))
            ON CONFLICT (id) DO NOTHING
            RETURNING lease_expires_at
            "#
        );
        let row = bind_flow(sqlx::query(&sql), flow, &json)
            .bind(holder)
            .bind(token.to_string())
            .bind(self.lease_millis())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Lease {
                flow_id: flow.id.clone(),
                holder: holder.to_string(),
                token,
                expires_at: row.try_get("lease_expires_at")?,
            }),
            None => Err(SignalingError::conflict(format!(
                "Data flow {} already exists",
                flow.id
            ))),
        }
    }

    async fn upsert(&self, flow: &DataFlow, lease: Option<&Lease>) -> Result<(), SignalingError> {
        let json = JsonColumns::of(flow)?;

        // A leased write only lands while our token is still on the row,
        // expired or not. Anyone who re-leased in between cleared or replaced it.
        let result = match lease {
            Some(lease) => {
                let sql = r#"
                    UPDATE data_flows_tb SET
                        source = $2::jsonb,
                        destination = $3::jsonb,
                        callback_address = $4,
                        transfer_type = $5::jsonb,
                        runtime_id = $6,
                        participant_id = $7,
                        asset_id = $8,
                        agreement_id = $9,
                        provision_requested = $10,
                        provision_complete = $11,
                        deprovision_requested = $12,
                        deprovision_complete = $13,
                        is_consumer = $14,
                        state = $15,
                        state_reason = $16,
                        error_detail = $17,
                        created_at = $18,
                        updated_at = $19,
                        lease_holder = NULL,
                        lease_token = NULL,
                        lease_expires_at = NULL
                    WHERE id = $1 AND lease_token = $20
                "#;
                bind_flow(sqlx::query(sql), flow, &json)
                    .bind(lease.token.to_string())
                    .execute(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO data_flows_tb ({INSERT_COLUMNS})
                    VALUES ({INSERT_VALUES})
                    ON CONFLICT (id) DO UPDATE SET
                        source = EXCLUDED.source,
                        destination = EXCLUDED.destination,
                        callback_address = EXCLUDED.callback_address,
                        transfer_type = EXCLUDED.transfer_type,
                        runtime_id = EXCLUDED.runtime_id,
                        participant_id = EXCLUDED.participant_id,
                        asset_id = EXCLUDED.asset_id,
                        agreement_id = EXCLUDED.agreement_id,
                        provision_requested = EXCLUDED.provision_requested,
                        provision_complete = EXCLUDED.provision_complete,
                        deprovision_requested = EXCLUDED.deprovision_requested,
                        deprovision_complete = EXCLUDED.deprovision_complete,
                        is_consumer = EXCLUDED.is_consumer,
                        state = EXCLUDED.state,
                        state_reason = EXCLUDED.state_reason,
                        error_detail = EXCLUDED.error_detail,
                        created_at = EXCLUDED.created_at,
                        updated_at = EXCLUDED.updated_at
                    WHERE data_flows_tb.lease_token IS NULL
                       OR data_flows_tb.lease_expires_at <= NOW()
                    "#
                );
                bind_flow(sqlx::query(&sql), flow, &json)
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            debug!(flow_id = %flow.id, "Upsert fenced off");
            return Err(SignalingError::conflict(format!(
                "Data flow {} is leased by another holder",
                flow.id
            )));
        }
        Ok(())
    }

    async fn break_lease(&self, lease: &Lease) -> Result<(), SignalingError> {
        sqlx::query(
            r#"
            UPDATE data_flows_tb
            SET lease_holder = NULL, lease_token = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_token = $2
            "#,
        )
        .bind(&lease.flow_id)
        .bind(lease.token.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        criteria: &[Criterion],
        limit: usize,
    ) -> Result<Vec<DataFlow>, SignalingError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM data_flows_tb WHERE TRUE"));

        for criterion in criteria {
            let field = criterion.validate()?;
            push_criterion(&mut qb, field, criterion)?;
        }

        qb.push(" ORDER BY created_at ASC LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_flow).collect()
    }
}

/// Append `AND <column> <op> <bind>` for one criterion
fn push_criterion(
    qb: &mut QueryBuilder<'_, Postgres>,
    field: Field,
    criterion: &Criterion,
) -> Result<(), SignalingError> {
    qb.push(" AND ");
    qb.push(field.column());

    match (criterion.operator, &criterion.right) {
        (Operator::IsNull, _) => {
            qb.push(" IS NULL");
        }
        (Operator::IsNotNull, _) => {
            qb.push(" IS NOT NULL");
        }
        (Operator::Eq | Operator::Ne, Some(value)) => {
            qb.push(if criterion.operator == Operator::Eq {
                " = "
            } else {
                " <> "
            });
            push_scalar(qb, field, value)?;
        }
        (Operator::In, Some(Value::Array(items))) => {
            qb.push(" = ANY(");
            match field {
                Field::State => {
                    let ids = items.iter().map(state_operand).collect::<Result<Vec<_>, _>>()?;
                    qb.push_bind(ids);
                }
                Field::IsConsumer => {
                    let flags = items.iter().map(bool_operand).collect::<Result<Vec<_>, _>>()?;
                    qb.push_bind(flags);
                }
                _ => {
                    let texts = items.iter().map(text_operand).collect::<Result<Vec<_>, _>>()?;
                    qb.push_bind(texts);
                }
            }
            qb.push(")");
        }
        _ => {
            return Err(SignalingError::bad_request(format!(
                "Malformed criterion on {}",
                criterion.left
            )));
        }
    }
    Ok(())
}

fn push_scalar(
    qb: &mut QueryBuilder<'_, Postgres>,
    field: Field,
    value: &Value,
) -> Result<(), SignalingError> {
    match field {
        Field::State => {
            qb.push_bind(state_operand(value)?);
        }
        Field::IsConsumer => {
            qb.push_bind(bool_operand(value)?);
        }
        _ => {
            qb.push_bind(text_operand(value)?);
        }
    }
    Ok(())
}

/// State operands may be given as numeric id or as name
fn state_operand(value: &Value) -> Result<i16, SignalingError> {
    let state = match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|id| i16::try_from(id).ok())
            .and_then(DataFlowState::from_id),
        Value::String(s) => DataFlowState::from_name(s),
        _ => None,
    };
    state
        .map(|s| s.id())
        .ok_or_else(|| SignalingError::bad_request(format!("Invalid state operand: {}", value)))
}

fn bool_operand(value: &Value) -> Result<bool, SignalingError> {
    value
        .as_bool()
        .ok_or_else(|| SignalingError::bad_request(format!("Expected boolean operand: {}", value)))
}

fn text_operand(value: &Value) -> Result<String, SignalingError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(SignalingError::bad_request(format!(
            "Expected string operand: {}",
            value
        ))),
    }
}
