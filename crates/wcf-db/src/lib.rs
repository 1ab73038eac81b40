//! Storage schema and the atomic batch coordinator (C1, spec.md §4.1).
//!
//! Every mutation of outbox/inbox/perspective-checkpoint state funnels
//! through [`process_work_batch`] — one call, one transaction, one
//! round-trip. No other function in this crate is permitted to touch
//! `lease_owner`, `lease_expires_at`, `status`, or
//! `perspective_checkpoints.last_event_id` (§5 shared-resource policy).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;
use wcf_types::ServiceInstanceId;

pub const ENV_DB_URL: &str = "WCF_DATABASE_URL";

/// Connect to Postgres using `WCF_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper: connect using `WCF_DATABASE_URL` and ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations. Safe to call repeatedly against an
/// already-migrated database (no-op, per SPEC_FULL.md §1).
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connectivity + core-table presence probe, used by the daemon's health
/// endpoint.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (has_core_tables,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1 from information_schema.tables
            where table_schema = 'public' and table_name = 'outbox'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_core_tables,
    })
}

/// Live instance ids (same "heartbeat within `stale_threshold_seconds`"
/// window `process_work_batch` phase 7 uses), for read-only display of
/// partition assignment — not an authoritative source, since the real
/// assignment is computed per-instance inside the stored procedure.
pub async fn list_live_instance_ids(pool: &PgPool, stale_threshold_seconds: i64) -> Result<Vec<String>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        select instance_id
        from service_instances
        where last_heartbeat_at > now() - make_interval(secs => $1)
        order by instance_id::text
        "#,
    )
    .bind(stale_threshold_seconds as i32)
    .fetch_all(pool)
    .await
    .context("list_live_instance_ids query failed")?;

    Ok(rows.into_iter().map(|(id,)| id.to_string()).collect())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_core_tables: bool,
}

/// Register (or refresh) a `MessageAssociation` row, as done once per
/// message type at service start from code-generated metadata (spec.md
/// §3.1). `process_work_batch` consults these to auto-create perspective
/// checkpoints.
pub async fn register_message_association(
    pool: &PgPool,
    message_type: &str,
    association_type: &str,
    target_name: &str,
    service_name: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into message_associations (message_type, association_type, target_name, service_name)
        values ($1, $2, $3, $4)
        on conflict (message_type, association_type, target_name) do update
            set service_name = excluded.service_name
        "#,
    )
    .bind(message_type)
    .bind(association_type)
    .bind(target_name)
    .bind(service_name)
    .execute(pool)
    .await
    .context("register_message_association failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// process_work_batch wire types
// ---------------------------------------------------------------------------

/// A not-yet-persisted outbox row, queued by `wcf-coordinator` (C2) and sent
/// to `process_work_batch` as part of `new_outbox`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxMessage {
    pub message_id: Uuid,
    pub destination: String,
    pub envelope_type: String,
    pub envelope_data: Value,
    pub message_type: String,
    pub stream_id: String,
    pub partition_number: i32,
    pub is_event: bool,
    /// Required when `is_event` — the event's version within its stream.
    pub event_version: Option<i64>,
    #[serde(default)]
    pub metadata: Value,
}

/// A not-yet-persisted inbox row (C4 consumer intake).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInboxMessage {
    pub message_id: Uuid,
    pub envelope_type: String,
    pub envelope_data: Value,
    pub message_type: String,
    pub handler_name: String,
    pub stream_id: String,
    pub partition_number: i32,
    pub is_event: bool,
    pub event_version: Option<i64>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxCompletion {
    pub message_id: Uuid,
    #[serde(default)]
    pub status: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxFailure {
    pub message_id: Uuid,
    #[serde(default)]
    pub status: i32,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxCompletion {
    pub message_id: Uuid,
    #[serde(default)]
    pub status: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxFailure {
    pub message_id: Uuid,
    #[serde(default)]
    pub status: i32,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerspectiveCompletion {
    pub perspective_name: String,
    pub stream_id: String,
    pub last_event_id: Uuid,
    pub last_sequence_number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerspectiveFailure {
    pub perspective_name: String,
    pub stream_id: String,
    pub error: String,
}

/// Placeholder shapes for the wire contract's `receptor_completions` /
/// `receptor_failures` parameters. No durable row backs a receptor
/// invocation (§3.1 defines no such entity) so these are accepted and
/// carried for forward compatibility but never change any row; see
/// DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceptorCompletion {
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceptorFailure {
    pub message_id: Uuid,
    pub error: String,
}

/// One `process_work_batch` call's worth of accumulated work, built by
/// `wcf-coordinator`'s `Flush`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessWorkBatchArgs {
    pub instance: ServiceInstanceId,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub outbox_completions: Vec<OutboxCompletion>,
    #[serde(default)]
    pub outbox_failures: Vec<OutboxFailure>,
    #[serde(default)]
    pub inbox_completions: Vec<InboxCompletion>,
    #[serde(default)]
    pub inbox_failures: Vec<InboxFailure>,
    #[serde(default)]
    pub receptor_completions: Vec<ReceptorCompletion>,
    #[serde(default)]
    pub receptor_failures: Vec<ReceptorFailure>,
    #[serde(default)]
    pub perspective_completions: Vec<PerspectiveCompletion>,
    #[serde(default)]
    pub perspective_failures: Vec<PerspectiveFailure>,
    #[serde(default)]
    pub new_outbox: Vec<NewOutboxMessage>,
    #[serde(default)]
    pub new_inbox: Vec<NewInboxMessage>,
    #[serde(default)]
    pub renew_outbox_lease_ids: Vec<Uuid>,
    #[serde(default)]
    pub renew_inbox_lease_ids: Vec<Uuid>,
    pub lease_seconds: i64,
    pub stale_threshold_seconds: i64,
    #[serde(default)]
    pub flags: Value,
    pub partition_count: i32,
    pub max_partitions_per_instance: Option<i32>,
}

impl ProcessWorkBatchArgs {
    /// An otherwise-empty batch that still performs the heartbeat — used by
    /// workers that have nothing queued (spec.md §4.3 point 1 "Flush the
    /// strategy with no queued work").
    pub fn heartbeat_only(
        instance: ServiceInstanceId,
        lease_seconds: i64,
        stale_threshold_seconds: i64,
        partition_count: i32,
        max_partitions_per_instance: Option<i32>,
    ) -> Self {
        Self {
            instance,
            metadata: Value::Object(Default::default()),
            outbox_completions: Vec::new(),
            outbox_failures: Vec::new(),
            inbox_completions: Vec::new(),
            inbox_failures: Vec::new(),
            receptor_completions: Vec::new(),
            receptor_failures: Vec::new(),
            perspective_completions: Vec::new(),
            perspective_failures: Vec::new(),
            new_outbox: Vec::new(),
            new_inbox: Vec::new(),
            renew_outbox_lease_ids: Vec::new(),
            renew_inbox_lease_ids: Vec::new(),
            lease_seconds,
            stale_threshold_seconds,
            flags: Value::Object(Default::default()),
            partition_count,
            max_partitions_per_instance,
        }
    }
}

/// One row claimed by `process_work_batch`, tagged by which queue it came
/// from (§9 redesign flag: tagged variants over a closed set rather than a
/// single row shape with fields that are null depending on `source`).
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimedRow {
    Outbox(ClaimedOutboxRow),
    Inbox(ClaimedInboxRow),
    Perspective(ClaimedPerspectiveRow),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedOutboxRow {
    pub message_id: Uuid,
    pub destination: String,
    pub envelope_type: String,
    pub envelope_data: Value,
    pub stream_id: String,
    pub partition_number: i32,
    pub attempts: i32,
    pub status: i32,
    pub sequence_order: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedInboxRow {
    pub message_id: Uuid,
    pub envelope_type: String,
    pub envelope_data: Value,
    pub stream_id: String,
    pub partition_number: i32,
    pub attempts: i32,
    pub status: i32,
    pub sequence_order: i64,
    pub handler_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedPerspectiveRow {
    pub perspective_name: String,
    pub stream_id: String,
    pub partition_number: i32,
    pub attempts: i32,
    pub last_event_id: Option<Uuid>,
    pub last_sequence_number: i64,
}

/// Call `process_work_batch`. Exactly one round-trip per flush (spec.md
/// §4.2 flush contract) — this is the only function in the crate allowed to
/// mutate outbox/inbox/checkpoint state.
pub async fn process_work_batch(pool: &PgPool, args: ProcessWorkBatchArgs) -> Result<Vec<ClaimedRow>> {
    let rows = sqlx::query(
        r#"
        select * from process_work_batch(
            $1, $2, $3, $4, $5,
            $6, $7, $8, $9, $10, $11, $12, $13,
            $14, $15,
            $16, $17,
            $18, $19,
            $20,
            $21, $22
        )
        "#,
    )
    .bind(args.instance.instance_id)
    .bind(&args.instance.service_name)
    .bind(&args.instance.host_name)
    .bind(args.instance.process_id as i32)
    .bind(&args.metadata)
    .bind(serde_json::to_value(&args.outbox_completions)?)
    .bind(serde_json::to_value(&args.outbox_failures)?)
    .bind(serde_json::to_value(&args.inbox_completions)?)
    .bind(serde_json::to_value(&args.inbox_failures)?)
    .bind(serde_json::to_value(&args.receptor_completions)?)
    .bind(serde_json::to_value(&args.receptor_failures)?)
    .bind(serde_json::to_value(&args.perspective_completions)?)
    .bind(serde_json::to_value(&args.perspective_failures)?)
    .bind(serde_json::to_value(&args.new_outbox)?)
    .bind(serde_json::to_value(&args.new_inbox)?)
    .bind(serde_json::to_value(&args.renew_outbox_lease_ids)?)
    .bind(serde_json::to_value(&args.renew_inbox_lease_ids)?)
    .bind(args.lease_seconds as i32)
    .bind(args.stale_threshold_seconds as i32)
    .bind(&args.flags)
    .bind(args.partition_count)
    .bind(args.max_partitions_per_instance)
    .fetch_all(pool)
    .await
    .context("process_work_batch failed")?;

    tracing::debug!(
        instance_id = %args.instance.instance_id,
        claimed = rows.len(),
        "process_work_batch"
    );

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let source: String = row.try_get("source")?;
        out.push(match source.as_str() {
            "outbox" => ClaimedRow::Outbox(ClaimedOutboxRow {
                message_id: row.try_get("message_id")?,
                destination: row.try_get("destination")?,
                envelope_type: row.try_get("envelope_type")?,
                envelope_data: row.try_get("envelope_data")?,
                stream_id: row.try_get("stream_id")?,
                partition_number: row.try_get("partition_number")?,
                attempts: row.try_get("attempts")?,
                status: row.try_get("status")?,
                sequence_order: row.try_get("sequence_order")?,
            }),
            "inbox" => ClaimedRow::Inbox(ClaimedInboxRow {
                message_id: row.try_get("message_id")?,
                envelope_type: row.try_get("envelope_type")?,
                envelope_data: row.try_get("envelope_data")?,
                stream_id: row.try_get("stream_id")?,
                partition_number: row.try_get("partition_number")?,
                attempts: row.try_get("attempts")?,
                status: row.try_get("status")?,
                sequence_order: row.try_get("sequence_order")?,
                handler_name: row.try_get("handler_name")?,
            }),
            "perspective" => ClaimedRow::Perspective(ClaimedPerspectiveRow {
                perspective_name: row.try_get("perspective_name")?,
                stream_id: row.try_get("stream_id")?,
                partition_number: row.try_get("partition_number")?,
                attempts: row.try_get("attempts")?,
                last_event_id: row.try_get("last_event_id")?,
                last_sequence_number: row.try_get("sequence_order")?,
            }),
            other => anyhow::bail!("process_work_batch returned unknown source '{other}'"),
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Recovery / operator queries (read-only; never mutate lease/status state)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub message_id: Uuid,
    pub destination: String,
    pub stream_id: String,
    pub status: i32,
    pub attempts: i32,
    pub error: Option<String>,
    pub sequence_order: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InboxRow {
    pub message_id: Uuid,
    pub handler_name: String,
    pub stream_id: String,
    pub status: i32,
    pub attempts: i32,
    pub error: Option<String>,
    pub sequence_order: i64,
    pub created_at: DateTime<Utc>,
}

/// Unresolved (not Published, not Failed) outbox rows for a stream, ordered
/// by `sequence_order`. Used by operator tooling and by `wcf-testkit`'s
/// recovery scenarios — never by a worker's normal poll path.
pub async fn list_unresolved_outbox_for_stream(pool: &PgPool, stream_id: &str) -> Result<Vec<OutboxRow>> {
    let rows = sqlx::query(
        r#"
        select message_id, destination, stream_id, status, attempts, error, sequence_order, created_at
        from outbox
        where stream_id = $1
          and (status & 12) = 0 -- not Published(4) and not Failed(8)
        order by sequence_order asc
        "#,
    )
    .bind(stream_id)
    .fetch_all(pool)
    .await
    .context("list_unresolved_outbox_for_stream failed")?;

    rows.into_iter()
        .map(|row| {
            Ok(OutboxRow {
                message_id: row.try_get("message_id")?,
                destination: row.try_get("destination")?,
                stream_id: row.try_get("stream_id")?,
                status: row.try_get("status")?,
                attempts: row.try_get("attempts")?,
                error: row.try_get("error")?,
                sequence_order: row.try_get("sequence_order")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

pub async fn list_unresolved_inbox_for_stream(pool: &PgPool, stream_id: &str) -> Result<Vec<InboxRow>> {
    let rows = sqlx::query(
        r#"
        select message_id, handler_name, stream_id, status, attempts, error, sequence_order, created_at
        from inbox
        where stream_id = $1
          and (status & 10) = 0 -- not Completed(2) and not Failed(8)
        order by sequence_order asc
        "#,
    )
    .bind(stream_id)
    .fetch_all(pool)
    .await
    .context("list_unresolved_inbox_for_stream failed")?;

    rows.into_iter()
        .map(|row| {
            Ok(InboxRow {
                message_id: row.try_get("message_id")?,
                handler_name: row.try_get("handler_name")?,
                stream_id: row.try_get("stream_id")?,
                status: row.try_get("status")?,
                attempts: row.try_get("attempts")?,
                error: row.try_get("error")?,
                sequence_order: row.try_get("sequence_order")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

/// Fetch the durable envelope payload for one outbox row, used by
/// `wcf-testkit`'s crash-recovery replay to resubmit work a previous process
/// never finished delivering (the envelope a worker would otherwise only see
/// transiently via `ClaimedOutboxRow`).
pub async fn load_outbox_envelope(pool: &PgPool, message_id: Uuid) -> Result<Option<(String, Value)>> {
    let row: Option<(String, Value)> = sqlx::query_as(
        "select destination, envelope_data from outbox where message_id = $1",
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await
    .context("load_outbox_envelope failed")?;
    Ok(row)
}

/// Operator action: resolve a Failed row by skipping it (Failed → Completed
/// with a skip marker, spec.md §4.1 "Failure semantics"). Deliberately
/// bypasses `process_work_batch` — this is an out-of-band operator
/// intervention, not a worker-loop transition, and carries its own audit
/// trail obligation at the caller (left to the CLI/scaffolding layer, out of
/// scope per spec.md §1).
pub async fn skip_failed_outbox(pool: &PgPool, message_id: Uuid) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update outbox
           set status = (status & ~8) | 4, -- clear Failed, set Published
               error = coalesce(error, '') || ' [skipped by operator]'
         where message_id = $1
           and (status & 8) <> 0
        returning message_id
        "#,
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await
    .context("skip_failed_outbox failed")?;
    Ok(row.is_some())
}

pub async fn skip_failed_inbox(pool: &PgPool, message_id: Uuid) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update inbox
           set status = (status & ~8) | 2, -- clear Failed, set Completed
               error = coalesce(error, '') || ' [skipped by operator]'
         where message_id = $1
           and (status & 8) <> 0
        returning message_id
        "#,
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await
    .context("skip_failed_inbox failed")?;
    Ok(row.is_some())
}

/// Load events for a stream after `after_event_id` (by version), for the
/// Perspective Worker's replay step (spec.md §4.5 point 1). `after_event_id
/// = None` replays the whole stream from version 1.
pub async fn load_stream_events_after(
    pool: &PgPool,
    stream_id: &str,
    after_event_id: Option<Uuid>,
) -> Result<Vec<StoredEvent>> {
    let after_version: i64 = match after_event_id {
        Some(id) => {
            let row: Option<(i64,)> =
                sqlx::query_as("select version from event_store where event_id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await
                    .context("load_stream_events_after: resolve checkpoint version failed")?;
            row.map(|(v,)| v).unwrap_or(0)
        }
        None => 0,
    };

    let rows = sqlx::query(
        r#"
        select event_id, stream_id, version, event_type, event_data, metadata, sequence_number, created_at
        from event_store
        where stream_id = $1 and version > $2
        order by version asc
        "#,
    )
    .bind(stream_id)
    .bind(after_version)
    .fetch_all(pool)
    .await
    .context("load_stream_events_after failed")?;

    rows.into_iter()
        .map(|row| {
            Ok(StoredEvent {
                event_id: row.try_get("event_id")?,
                stream_id: row.try_get("stream_id")?,
                version: row.try_get("version")?,
                event_type: row.try_get("event_type")?,
                event_data: row.try_get("event_data")?,
                metadata: row.try_get("metadata")?,
                sequence_number: row.try_get("sequence_number")?,
                occurred_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

/// Allocates the next version for a stream (invariant §3.2.1: versions for
/// a stream are 1, 2, …, N with no gaps). Callers constructing an
/// `is_event: true` outbox/inbox row must call this before queuing it —
/// `process_work_batch` writes the value straight into `event_store.version`,
/// which is `not null`.
///
/// Racy under concurrent callers for the same stream (two callers can read
/// the same max and both try to insert the same version; the unique
/// `(stream_id, version)` constraint in `process_work_batch` phase 5 turns
/// that into a transaction failure rather than silent corruption). Callers
/// that append to the same stream from multiple instances concurrently are
/// expected to serialize on the stream (spec.md §3.2.1 is an instance-local
/// append-order guarantee, not a distributed lock).
pub async fn next_event_version(pool: &PgPool, stream_id: &str) -> Result<i64> {
    let (max_version,): (Option<i64>,) =
        sqlx::query_as("select max(version) from event_store where stream_id = $1")
            .bind(stream_id)
            .fetch_one(pool)
            .await
            .context("next_event_version: query max version failed")?;
    Ok(max_version.unwrap_or(0) + 1)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub stream_id: String,
    pub version: i64,
    pub event_type: String,
    pub event_data: Value,
    pub metadata: Value,
    pub sequence_number: i64,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_work_batch_args_round_trips_through_json() {
        let args = ProcessWorkBatchArgs::heartbeat_only(
            ServiceInstanceId::new("inventory", "host-1"),
            30,
            60,
            10_000,
            Some(4),
        );
        let json = serde_json::to_value(&args).unwrap();
        let back: ProcessWorkBatchArgs = serde_json::from_value(json).unwrap();
        assert_eq!(back.instance.service_name, "inventory");
        assert_eq!(back.partition_count, 10_000);
    }
}
