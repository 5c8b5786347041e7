use catalog::{CatalogStore, ConstraintDropGate, HeartbeatSample, RetryBackoff, error::CatalogError};
use catalog::sled_store::SledCatalog;
use chrono::Utc;
use model::{
    catalog::{
        chunk::{Chunk, ChunkOutcome},
        status::{ChunkStatus, JobStatus, TableStatus, ValidationStatus},
        table::TableState,
    },
    core::ids::{JobId, TableId, WorkerId},
    spec::{
        connection::{ConnectionDescriptor, Driver, Secret},
        job::JobSpec,
        mapping::TableMapping,
    },
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tempfile::tempdir;

fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor {
        host: "localhost".into(),
        port: None,
        database: "db".into(),
        username: "u".into(),
        password: Secret::new("p"),
        tls: false,
        driver: Some(Driver::Postgres),
    }
}

fn spec(max_retries: u32) -> JobSpec {
    JobSpec {
        source: descriptor(),
        target: descriptor(),
        tables: BTreeMap::from([("users".to_string(), TableMapping::default())]),
        chunk_size: 100,
        batch_size: 50,
        max_retries,
        failure_threshold_percent: 5,
        max_concurrent_workers: 8,
        priority: 100,
        drop_constraints: false,
        validate: true,
    }
}

fn table_state(job_id: JobId, chunk_count: u64) -> TableState {
    TableState {
        id: TableId::generate(),
        job_id,
        table_name: "users".into(),
        target_table: "users".into(),
        pk_column: "id".into(),
        mapping: TableMapping::default(),
        total_rows_estimate: chunk_count * 100,
        total_chunks: chunk_count,
        completed_chunks: 0,
        failed_chunks: 0,
        status: TableStatus::Pending,
        created_at: Utc::now(),
        completed_at: None,
        last_error: None,
    }
}

/// Seed one job with one table split into `chunk_count` chunks.
async fn seed(
    store: &SledCatalog,
    chunk_count: u64,
    max_retries: u32,
) -> (JobId, TableId, Vec<Chunk>) {
    let job = store.create_job(&spec(max_retries)).await.unwrap();
    store.mark_job_planning(job.id).await.unwrap();

    let table = table_state(job.id, chunk_count);
    let mut chunks = Vec::new();
    for i in 0..chunk_count {
        let lo = (i * 100) as i64 + 1;
        let hi = lo + 99;
        let last = i == chunk_count - 1;
        chunks.push(Chunk::new(
            job.id,
            table.id,
            "users",
            lo,
            hi,
            last,
            max_retries,
            Utc::now(),
        ));
    }
    let table_id = table.id;
    store
        .insert_tables_and_chunks(job.id, vec![table], chunks.clone())
        .await
        .unwrap();
    (job.id, table_id, chunks)
}

fn outcome(rows: u64) -> ChunkOutcome {
    ChunkOutcome {
        rows_processed: rows,
        source_row_count: rows,
        target_row_count: rows,
        checksum: 42,
        duration_ms: 120,
        bytes_copied: rows * 64,
        batch_size_used: 50,
        throughput_rows_per_sec: 800.0,
        throughput_mb_per_sec: 0.05,
        memory_peak_mb: 12.0,
        insert_latency_ms: 60.0,
        validation_enabled: true,
    }
}

/// Recompute counters from chunk rows and compare with the denormalized
/// job counters.
async fn assert_counters_coherent(store: &SledCatalog, job_id: JobId) {
    let job = store.get_job(job_id).await.unwrap();
    let chunks = store.get_chunks(job_id).await.unwrap();

    let completed = chunks
        .iter()
        .filter(|c| c.status == ChunkStatus::Completed)
        .count() as u64;
    let failed = chunks
        .iter()
        .filter(|c| c.status == ChunkStatus::Failed && c.retry_count >= c.max_retries)
        .count() as u64;
    let running = chunks
        .iter()
        .filter(|c| c.status == ChunkStatus::Running)
        .count() as u64;

    assert_eq!(job.completed_chunks, completed, "completed counter drift");
    assert_eq!(job.failed_chunks, failed, "failed counter drift");
    assert_eq!(job.running_chunks, running, "running counter drift");
    assert_eq!(job.total_chunks, chunks.len() as u64, "total counter drift");
    assert!(job.completed_chunks + job.failed_chunks <= job.total_chunks);
}

#[tokio::test]
async fn concurrent_claimers_get_distinct_chunks() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SledCatalog::open(dir.path()).unwrap());
    let (job_id, _table, _chunks) = seed(&store, 3, 3).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        let worker = WorkerId::new(format!("worker-{i}"));
        handles.push(tokio::spawn(async move {
            store.claim_next_chunk(&worker).await.unwrap()
        }));
    }

    let mut claimed = Vec::new();
    let mut misses = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Some(chunk) => claimed.push(chunk.id),
            None => misses += 1,
        }
    }

    assert_eq!(claimed.len(), 3, "exactly three claimers must win");
    assert_eq!(misses, 7);
    claimed.sort();
    claimed.dedup();
    assert_eq!(claimed.len(), 3, "no chunk may be handed out twice");
    assert_counters_coherent(&store, job_id).await;
}

#[tokio::test]
async fn first_claim_moves_job_to_running() {
    let dir = tempdir().unwrap();
    let store = SledCatalog::open(dir.path()).unwrap();
    let (job_id, _table, _chunks) = seed(&store, 1, 3).await;

    assert_eq!(
        store.get_job(job_id).await.unwrap().status,
        JobStatus::Planning
    );
    let worker = WorkerId::new("w1");
    let chunk = store.claim_next_chunk(&worker).await.unwrap().unwrap();
    assert_eq!(chunk.worker_id.as_ref(), Some(&worker));
    assert!(chunk.started_at.is_some());

    let job = store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.started_at.is_some());
}

#[tokio::test]
async fn completing_every_chunk_completes_job_and_table() {
    let dir = tempdir().unwrap();
    let store = SledCatalog::open(dir.path()).unwrap();
    let (job_id, table_id, _chunks) = seed(&store, 2, 3).await;
    let worker = WorkerId::new("w1");

    for _ in 0..2 {
        let chunk = store.claim_next_chunk(&worker).await.unwrap().unwrap();
        store.complete_chunk(chunk.id, outcome(100)).await.unwrap();
        assert_counters_coherent(&store, job_id).await;
    }

    let job = store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_chunks, 2);
    assert_eq!(job.failed_chunks, 0);
    assert!(job.completed_at.is_some());
    assert!(job.started_at.unwrap() <= job.completed_at.unwrap());

    let tables = store.get_tables(job_id).await.unwrap();
    let table = tables.iter().find(|t| t.id == table_id).unwrap();
    assert_eq!(table.status, TableStatus::Completed);
    assert_eq!(table.completed_chunks, 2);

    // Terminal job: no further claims.
    assert!(store.claim_next_chunk(&worker).await.unwrap().is_none());
}

#[tokio::test]
async fn reaped_chunk_is_rescheduled_with_backoff() {
    let dir = tempdir().unwrap();
    let store = SledCatalog::open(dir.path()).unwrap();
    let (job_id, _table, _chunks) = seed(&store, 1, 3).await;
    let worker = WorkerId::new("w1");
    let chunk = store.claim_next_chunk(&worker).await.unwrap().unwrap();

    // Liveness threshold of zero: the freshly stamped heartbeat is
    // already "stale" by the time the reaper looks.
    let reaped = store
        .reap_dead_workers(Duration::ZERO, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].chunk_id, chunk.id);
    assert_eq!(reaped[0].worker_id.as_ref(), Some(&worker));
    assert!(reaped[0].retry_scheduled);

    let after = store.get_chunk(chunk.id).await.unwrap();
    assert_eq!(after.status, ChunkStatus::Pending);
    assert_eq!(after.retry_count, 1);
    assert!(after.worker_id.is_none());
    let delay = (after.next_retry_at.unwrap() - Utc::now()).num_seconds();
    assert!((15..=20).contains(&delay), "expected ≈20s backoff, got {delay}s");

    let log = store.execution_log(chunk.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].attempt_number, 1);
    assert_eq!(log[0].error_message.as_deref(), Some("heartbeat timeout"));

    // The original owner finds out through its next heartbeat.
    let err = store
        .heartbeat(&worker, chunk.id, HeartbeatSample::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::OwnershipLost(_)));
    assert_counters_coherent(&store, job_id).await;
}

#[tokio::test]
async fn retries_exhaust_to_terminal_failed() {
    let dir = tempdir().unwrap();
    let store = SledCatalog::open(dir.path())
        .unwrap()
        .with_backoff(RetryBackoff::new(Duration::ZERO, Duration::ZERO));
    let (job_id, _table, chunks) = seed(&store, 1, 3).await;
    let worker = WorkerId::new("w1");

    for attempt in 1..=3u32 {
        let chunk = store.claim_next_chunk(&worker).await.unwrap().unwrap();
        store
            .fail_chunk(chunk.id, "constraint violation: duplicate key", 40, false)
            .await
            .unwrap();
        let after = store.get_chunk(chunk.id).await.unwrap();
        assert_eq!(after.retry_count, attempt);
        assert_counters_coherent(&store, job_id).await;
    }

    let chunk = store.get_chunk(chunks[0].id).await.unwrap();
    assert_eq!(chunk.status, ChunkStatus::Failed);
    assert_eq!(chunk.retry_count, 3);
    assert!(chunk.is_terminal_failed());

    // Nothing left to claim; the job went terminal failed.
    assert!(store.claim_next_chunk(&worker).await.unwrap().is_none());
    let job = store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_chunks, 1);

    // Audit trail: attempts 1, 2, 3 and never rewritten.
    let log = store.execution_log(chunk.id).await.unwrap();
    let attempts: Vec<u32> = log.iter().map(|e| e.attempt_number).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn operator_reset_reopens_terminal_chunk_and_job() {
    let dir = tempdir().unwrap();
    let store = SledCatalog::open(dir.path())
        .unwrap()
        .with_backoff(RetryBackoff::new(Duration::ZERO, Duration::ZERO));
    let (job_id, _table, chunks) = seed(&store, 1, 1).await;
    let worker = WorkerId::new("w1");

    let chunk = store.claim_next_chunk(&worker).await.unwrap().unwrap();
    store.fail_chunk(chunk.id, "type mismatch", 10, false).await.unwrap();
    assert!(store.get_chunk(chunk.id).await.unwrap().is_terminal_failed());

    // Resetting a non-terminal chunk is rejected, a terminal one works.
    store.retry_chunk(chunks[0].id).await.unwrap();
    let err = store.retry_chunk(chunks[0].id).await.unwrap_err();
    assert!(matches!(err, CatalogError::InvalidTransition { .. }));

    let after = store.get_chunk(chunks[0].id).await.unwrap();
    assert_eq!(after.status, ChunkStatus::Pending);
    assert_eq!(after.retry_count, 0);
    assert!(after.next_retry_at.is_none());

    let job = store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.failed_chunks, 0);
    assert_counters_coherent(&store, job_id).await;

    // And the chunk can be driven to completion afterwards.
    let chunk = store.claim_next_chunk(&worker).await.unwrap().unwrap();
    store.complete_chunk(chunk.id, outcome(100)).await.unwrap();
    assert_eq!(
        store.get_job(job_id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn paused_jobs_hand_out_nothing() {
    let dir = tempdir().unwrap();
    let store = SledCatalog::open(dir.path()).unwrap();
    let (job_id, _table, _chunks) = seed(&store, 1, 3).await;
    let worker = WorkerId::new("w1");

    store.pause_job(job_id).await.unwrap();
    assert!(store.claim_next_chunk(&worker).await.unwrap().is_none());

    store.resume_job(job_id).await.unwrap();
    assert!(store.claim_next_chunk(&worker).await.unwrap().is_some());
}

#[tokio::test]
async fn validation_mismatch_holds_job_open_until_requeued() {
    let dir = tempdir().unwrap();
    let store = SledCatalog::open(dir.path()).unwrap();
    let (job_id, _table, _chunks) = seed(&store, 1, 3).await;
    let worker = WorkerId::new("w1");

    let chunk = store.claim_next_chunk(&worker).await.unwrap().unwrap();
    let mut bad = outcome(100);
    bad.target_row_count = 97;
    store.complete_chunk(chunk.id, bad).await.unwrap();

    let after = store.get_chunk(chunk.id).await.unwrap();
    assert_eq!(after.status, ChunkStatus::Completed);
    assert_eq!(after.validation_status, ValidationStatus::Failed);

    // The mismatch keeps the job from closing out.
    let job = store.get_job(job_id).await.unwrap();
    assert_ne!(job.status, JobStatus::Completed);

    let requeued = store.requeue_unvalidated_chunks(job_id).await.unwrap();
    assert_eq!(requeued, vec![chunk.id]);
    assert_counters_coherent(&store, job_id).await;

    let chunk = store.claim_next_chunk(&worker).await.unwrap().unwrap();
    store.complete_chunk(chunk.id, outcome(100)).await.unwrap();
    let job = store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn per_job_concurrency_cap_is_enforced() {
    let dir = tempdir().unwrap();
    let store = SledCatalog::open(dir.path()).unwrap();

    let mut job_spec = spec(3);
    job_spec.max_concurrent_workers = 1;
    let job = store.create_job(&job_spec).await.unwrap();
    store.mark_job_planning(job.id).await.unwrap();
    let table = table_state(job.id, 2);
    let chunks = vec![
        Chunk::new(job.id, table.id, "users", 1, 100, false, 3, Utc::now()),
        Chunk::new(job.id, table.id, "users", 100, 200, true, 3, Utc::now()),
    ];
    store
        .insert_tables_and_chunks(job.id, vec![table], chunks)
        .await
        .unwrap();

    let w1 = WorkerId::new("w1");
    let w2 = WorkerId::new("w2");
    let first = store.claim_next_chunk(&w1).await.unwrap().unwrap();
    assert!(store.claim_next_chunk(&w2).await.unwrap().is_none());

    store.complete_chunk(first.id, outcome(100)).await.unwrap();
    assert!(store.claim_next_chunk(&w2).await.unwrap().is_some());
}

#[tokio::test]
async fn leader_lease_is_exclusive_until_expiry() {
    let dir = tempdir().unwrap();
    let store = SledCatalog::open(dir.path()).unwrap();

    assert!(store
        .acquire_leader("node-a", Duration::from_secs(60))
        .await
        .unwrap());
    // Renewal by the holder succeeds, takeover by another node does not.
    assert!(store
        .acquire_leader("node-a", Duration::from_secs(60))
        .await
        .unwrap());
    assert!(!store
        .acquire_leader("node-b", Duration::from_secs(60))
        .await
        .unwrap());

    // Zero-ttl lease from the holder expires immediately.
    assert!(store
        .acquire_leader("node-a", Duration::ZERO)
        .await
        .unwrap());
    assert!(store
        .acquire_leader("node-b", Duration::from_secs(60))
        .await
        .unwrap());
}

#[tokio::test]
async fn constraint_drop_gate_elects_one_owner() {
    let dir = tempdir().unwrap();
    let store = SledCatalog::open(dir.path()).unwrap();
    let (job_id, _table, _chunks) = seed(&store, 1, 3).await;
    let w1 = WorkerId::new("w1");
    let w2 = WorkerId::new("w2");

    assert_eq!(
        store.begin_constraint_drop(job_id, "users", &w1).await.unwrap(),
        ConstraintDropGate::Owner
    );
    assert_eq!(
        store.begin_constraint_drop(job_id, "users", &w2).await.unwrap(),
        ConstraintDropGate::InProgress
    );
    // The owner is re-entrant while dropping.
    assert_eq!(
        store.begin_constraint_drop(job_id, "users", &w1).await.unwrap(),
        ConstraintDropGate::Owner
    );

    store
        .finish_constraint_drop(job_id, "users", &[])
        .await
        .unwrap();
    assert_eq!(
        store.begin_constraint_drop(job_id, "users", &w2).await.unwrap(),
        ConstraintDropGate::Dropped
    );
}
