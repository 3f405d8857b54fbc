//! PostgreSQL sink
//!
//! Every write is `INSERT ... ON CONFLICT DO NOTHING`, so rows are never updated
//! once written. Savepoints map directly onto SQL savepoints inside one
//! transaction per sink.

use aligner_common::types::ALL_TABLES;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

use super::{ActivitySink, SinkFactory, SinkResult};
use crate::error::IngestError;
use crate::models::{Activity, ChildRecord, SqlValue};

const INSERT_ACTIVITY: &str = r#"
INSERT INTO activities (
    activity_id, activity_type, description, date_activity, updated_at,
    destination_id, source_id, is_read, patient_id, is_finition,
    treatment_id, email_sent, dentist_first_name, dentist_last_name, dentist_email,
    dentist_type, commercial_en_charge, commercial_name, suivi_portefeuille,
    id_invoice_pennylane, invoice_amount, meta_data_object_name,
    number_of_aligners, number_of_refinements, number_of_retainers
)
VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
)
ON CONFLICT (activity_id) DO NOTHING
"#;

/// A sink holding at most one open transaction on the pool
pub struct PgSink {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    async fn tx(&mut self) -> SinkResult<&mut Transaction<'static, Postgres>> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };
        Ok(self.tx.insert(tx))
    }

    async fn execute(&mut self, sql: String) -> SinkResult<()> {
        let tx = self.tx().await?;
        sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(())
    }
}

#[async_trait]
impl ActivitySink for PgSink {
    async fn savepoint(&mut self, name: &'static str) -> SinkResult<()> {
        self.execute(format!("SAVEPOINT {name}")).await
    }

    async fn release_savepoint(&mut self, name: &'static str) -> SinkResult<()> {
        self.execute(format!("RELEASE SAVEPOINT {name}")).await
    }

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> SinkResult<()> {
        self.execute(format!("ROLLBACK TO SAVEPOINT {name}")).await
    }

    async fn upsert_activity(&mut self, activity: &Activity) -> SinkResult<bool> {
        let tx = self.tx().await?;
        let result = sqlx::query(INSERT_ACTIVITY)
            .bind(activity.activity_id)
            .bind(&activity.activity_type)
            .bind(&activity.description)
            .bind(activity.date_activity)
            .bind(activity.updated_at)
            .bind(activity.destination_id)
            .bind(activity.source_id)
            .bind(activity.is_read)
            .bind(activity.patient_id)
            .bind(activity.is_finition)
            .bind(activity.treatment_id)
            .bind(activity.email_sent)
            .bind(&activity.dentist_first_name)
            .bind(&activity.dentist_last_name)
            .bind(&activity.dentist_email)
            .bind(&activity.dentist_type)
            .bind(&activity.commercial_en_charge)
            .bind(&activity.commercial_name)
            .bind(&activity.suivi_portefeuille)
            .bind(&activity.id_invoice_pennylane)
            .bind(&activity.invoice_amount)
            .bind(&activity.summary.object_name)
            .bind(activity.summary.number_of_aligners)
            .bind(activity.summary.number_of_refinements)
            .bind(activity.summary.number_of_retainers)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_child(&mut self, child: &ChildRecord) -> SinkResult<bool> {
        let mut builder = child_insert(child);
        let tx = self.tx().await?;
        let result = builder.build().execute(&mut **tx).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(&mut self) -> SinkResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> SinkResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

/// Build `INSERT INTO <table> (id, activity_id, ...) VALUES (...) ON CONFLICT (id) DO NOTHING`
fn child_insert(child: &ChildRecord) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(format!("INSERT INTO {} (id, activity_id", child.table()));
    for (column, _) in &child.columns {
        builder.push(", \"").push(*column).push("\"");
    }
    builder.push(") VALUES (");

    let mut values = builder.separated(", ");
    values.push_bind(child.id);
    values.push_bind(child.activity_id);
    for (_, value) in &child.columns {
        match value {
            SqlValue::Int(v) => {
                values.push_bind(*v);
            },
            SqlValue::Text(v) => {
                values.push_bind(v.as_deref());
            },
            SqlValue::Bool(v) => {
                values.push_bind(*v);
            },
            SqlValue::Decimal(v) => {
                values.push_bind(v.as_ref());
            },
            SqlValue::Timestamp(v) => {
                values.push_bind(*v);
            },
            SqlValue::Json(v) => {
                values.push_bind(v.as_ref());
            },
        }
    }
    values.push_unseparated(") ON CONFLICT (id) DO NOTHING");

    builder
}

/// Opens a fresh [`PgSink`] per worker; each gets its own pooled connection
#[derive(Clone)]
pub struct PgSinkFactory {
    pool: PgPool,
}

impl PgSinkFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SinkFactory for PgSinkFactory {
    type Sink = PgSink;

    async fn open(&self) -> SinkResult<PgSink> {
        Ok(PgSink::new(self.pool.clone()))
    }
}

/// Check that every table written by the import exists in the current schema
pub async fn verify_schema(pool: &PgPool) -> Result<(), IngestError> {
    let expected: Vec<String> = ALL_TABLES.iter().map(|t| t.to_string()).collect();

    let present: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT table_name::text
        FROM information_schema.tables
        WHERE table_schema = current_schema()
          AND table_name = ANY($1)
        "#,
    )
    .bind(&expected)
    .fetch_all(pool)
    .await?;

    let missing: Vec<String> = expected
        .into_iter()
        .filter(|table| !present.contains(table))
        .collect();

    if !missing.is_empty() {
        return Err(IngestError::SchemaMissing(missing));
    }

    debug!(tables = ALL_TABLES.len(), "Schema check passed");
    Ok(())
}
