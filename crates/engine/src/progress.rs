use catalog::HeartbeatSample;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

/// Shared counters between a chunk executor and its heartbeat ticker.
/// The executor updates after every batch; the ticker samples whenever
/// it fires. f64 gauges are stored as raw bits.
#[derive(Debug)]
pub struct ExecutionProgress {
    started: Instant,
    rows: AtomicU64,
    bytes: AtomicU64,
    memory_peak_mb_bits: AtomicU64,
    insert_latency_ms_bits: AtomicU64,
}

impl ExecutionProgress {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            rows: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            memory_peak_mb_bits: AtomicU64::new(0f64.to_bits()),
            insert_latency_ms_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn record_batch(&self, rows: u64, bytes: u64, memory_mb: f64, latency_ms: f64) {
        self.rows.fetch_add(rows, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.insert_latency_ms_bits
            .store(latency_ms.to_bits(), Ordering::Relaxed);
        // Monotonic max over concurrent updates.
        let mut current = self.memory_peak_mb_bits.load(Ordering::Relaxed);
        while f64::from_bits(current) < memory_mb {
            match self.memory_peak_mb_bits.compare_exchange_weak(
                current,
                memory_mb.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn memory_peak_mb(&self) -> f64 {
        f64::from_bits(self.memory_peak_mb_bits.load(Ordering::Relaxed))
    }

    pub fn insert_latency_ms(&self) -> f64 {
        f64::from_bits(self.insert_latency_ms_bits.load(Ordering::Relaxed))
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn sample(&self) -> HeartbeatSample {
        let elapsed = self.elapsed_secs().max(1e-6);
        HeartbeatSample {
            memory_mb: self.memory_peak_mb(),
            rows_per_sec: self.rows() as f64 / elapsed,
            mb_per_sec: self.bytes() as f64 / (1024.0 * 1024.0) / elapsed,
            insert_latency_ms: self.insert_latency_ms(),
        }
    }
}

impl Default for ExecutionProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_memory_is_monotonic() {
        let progress = ExecutionProgress::new();
        progress.record_batch(10, 1024, 32.0, 50.0);
        progress.record_batch(10, 1024, 8.0, 70.0);
        assert_eq!(progress.memory_peak_mb(), 32.0);
        assert_eq!(progress.rows(), 20);
        assert_eq!(progress.insert_latency_ms(), 70.0);
    }
}
