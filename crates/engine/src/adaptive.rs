use chrono::Utc;
use model::{
    catalog::audit::BatchAdjustment,
    core::ids::{JobId, WorkerId},
};

pub const MIN_BATCH: u32 = 500;
pub const MAX_BATCH: u32 = 50_000;
const SAMPLES_PER_DECISION: usize = 5;

/// Per-worker feedback loop steering the insert batch size toward the
/// target latency: grow 1.5x when comfortably under it, halve when well
/// over, hold otherwise. One decision per window of observed batches.
#[derive(Debug, Clone)]
pub struct BatchController {
    current: u32,
    target_latency_ms: f64,
    window: Vec<f64>,
}

impl BatchController {
    pub fn new(initial: u32, target_latency_ms: f64) -> Self {
        Self {
            current: initial.clamp(MIN_BATCH, MAX_BATCH),
            target_latency_ms,
            window: Vec::with_capacity(SAMPLES_PER_DECISION),
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Feed one batch's measured insert latency. Returns the adjustment
    /// record when a full window produced a change.
    pub fn observe(
        &mut self,
        latency_ms: f64,
        job_id: JobId,
        worker_id: &WorkerId,
    ) -> Option<BatchAdjustment> {
        self.window.push(latency_ms);
        if self.window.len() < SAMPLES_PER_DECISION {
            return None;
        }
        let avg = self.window.iter().sum::<f64>() / self.window.len() as f64;
        self.window.clear();

        let old = self.current;
        let (new, reason) = if avg < 0.5 * self.target_latency_ms {
            (
                (((old as f64) * 1.5) as u32).min(MAX_BATCH),
                format!(
                    "avg latency {avg:.1}ms below target {:.0}ms, growing batch",
                    self.target_latency_ms
                ),
            )
        } else if avg > 1.5 * self.target_latency_ms {
            (
                (old / 2).max(MIN_BATCH),
                format!(
                    "avg latency {avg:.1}ms above target {:.0}ms, shrinking batch",
                    self.target_latency_ms
                ),
            )
        } else {
            return None;
        };

        if new == old {
            return None;
        }
        self.current = new;
        Some(BatchAdjustment {
            job_id,
            worker_id: worker_id.clone(),
            old_batch_size: old,
            new_batch_size: new,
            avg_latency_ms: avg,
            target_latency_ms: self.target_latency_ms,
            reason,
            recorded_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> BatchController {
        BatchController::new(5_000, 200.0)
    }

    fn feed(c: &mut BatchController, latency: f64, n: usize) -> Option<BatchAdjustment> {
        let job = JobId::generate();
        let worker = WorkerId::new("w1");
        let mut last = None;
        for _ in 0..n {
            last = c.observe(latency, job, &worker);
        }
        last
    }

    #[test]
    fn fast_inserts_grow_the_batch_by_half() {
        let mut c = controller();
        let adj = feed(&mut c, 60.0, 5).expect("a decision after five samples");
        assert_eq!(adj.old_batch_size, 5_000);
        assert_eq!(adj.new_batch_size, 7_500);
        assert_eq!(adj.avg_latency_ms, 60.0);
        assert!(adj.reason.contains("below target"));
        assert_eq!(c.current(), 7_500);
    }

    #[test]
    fn slow_inserts_halve_the_batch() {
        let mut c = controller();
        let adj = feed(&mut c, 450.0, 5).expect("a decision after five samples");
        assert_eq!(adj.new_batch_size, 2_500);
        assert!(adj.reason.contains("above target"));
    }

    #[test]
    fn in_band_latency_holds_steady() {
        let mut c = controller();
        assert!(feed(&mut c, 200.0, 5).is_none());
        assert_eq!(c.current(), 5_000);
    }

    #[test]
    fn no_decision_before_the_window_fills() {
        let mut c = controller();
        assert!(feed(&mut c, 60.0, 4).is_none());
        assert_eq!(c.current(), 5_000);
    }

    #[test]
    fn growth_and_shrink_are_clamped() {
        let mut c = BatchController::new(40_000, 200.0);
        let adj = feed(&mut c, 10.0, 5).unwrap();
        assert_eq!(adj.new_batch_size, MAX_BATCH);
        // Already at the ceiling: further growth is not a change.
        assert!(feed(&mut c, 10.0, 5).is_none());

        let mut c = BatchController::new(600, 200.0);
        let adj = feed(&mut c, 900.0, 5).unwrap();
        assert_eq!(adj.new_batch_size, MIN_BATCH);
        assert!(feed(&mut c, 900.0, 5).is_none());
    }
}
