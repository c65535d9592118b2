//! Stress helpers for kvlayer.
//!
//! These drive a database from many tasks at once: writers, readers and
//! iterators racing each other, optionally while the database is opening.

use kvlayer_core::{Database, IteratorOptions};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Logs a summary of the run.
    pub fn log_summary(&self, name: &str) {
        tracing::info!(
            name,
            total = self.total_ops,
            successful = self.successful_ops,
            failed = self.failed_ops,
            duration = ?self.duration,
            ops_per_second = self.ops_per_second,
            "stress run finished"
        );
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per task.
    pub operations: usize,
    /// Number of concurrent tasks.
    pub tasks: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            tasks: 4,
            value_size: 64,
        }
    }
}

fn key(task: usize, i: usize) -> String {
    format!("t{task:02}-{i:06}")
}

async fn collect(mut set: JoinSet<(usize, usize)>, start: Instant) -> StressTestResult {
    let mut successful = 0;
    let mut failed = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((ok, err)) => {
                successful += ok;
                failed += err;
            }
            Err(_) => failed += 1,
        }
    }
    StressTestResult::new(successful, failed, start.elapsed())
}

/// Runs `config.tasks` writers concurrently, each putting
/// `config.operations` distinct keys.
///
/// The database must use a string-compatible key and value encoding.
pub async fn stress_concurrent_writes(db: &Database, config: &StressConfig) -> StressTestResult {
    let value = "x".repeat(config.value_size);
    let start = Instant::now();
    let mut set = JoinSet::new();

    for task in 0..config.tasks {
        let db = db.clone();
        let value = value.clone();
        let operations = config.operations;
        set.spawn(async move {
            let mut ok = 0;
            let mut err = 0;
            for i in 0..operations {
                match db.put(key(task, i), value.as_str()).await {
                    Ok(()) => ok += 1,
                    Err(_) => err += 1,
                }
            }
            (ok, err)
        });
    }

    collect(set, start).await
}

/// Runs writers and full-scan readers side by side.
///
/// Each reader iteration counts as one operation; a scan that fails or
/// yields keys out of order counts as a failure.
pub async fn stress_mixed_workload(db: &Database, config: &StressConfig) -> StressTestResult {
    let value = "y".repeat(config.value_size);
    let start = Instant::now();
    let mut set = JoinSet::new();

    for task in 0..config.tasks {
        let db = db.clone();
        let value = value.clone();
        let operations = config.operations;
        let reader = task % 2 == 1;
        set.spawn(async move {
            let mut ok = 0;
            let mut err = 0;
            for i in 0..operations {
                let outcome = if reader {
                    scan_in_order(&db).await
                } else {
                    db.put(key(task, i), value.as_str()).await.is_ok()
                };
                if outcome {
                    ok += 1;
                } else {
                    err += 1;
                }
            }
            (ok, err)
        });
    }

    collect(set, start).await
}

async fn scan_in_order(db: &Database) -> bool {
    let Ok(keys) = db.keys(IteratorOptions::new().limit(50)) else {
        return false;
    };
    match keys.all().await {
        Ok(keys) => keys.windows(2).all(|w| w[0].as_str() < w[1].as_str()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDatabase;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_all_land() {
        let db = TestDatabase::memory();
        let config = StressConfig {
            operations: 50,
            tasks: 4,
            value_size: 8,
        };
        let result = stress_concurrent_writes(&db, &config).await;
        assert_eq!(result.successful_ops, 200);
        assert_eq!(result.failed_ops, 0);

        let keys = db.keys(IteratorOptions::new()).unwrap().all().await.unwrap();
        assert_eq!(keys.len(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn mixed_workload_while_opening() {
        let db = TestDatabase::memory();
        let config = StressConfig {
            operations: 20,
            tasks: 4,
            value_size: 8,
        };
        // The first calls arrive while the database is still new
        let result = stress_mixed_workload(&db, &config).await;
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.total_ops, 80);
    }
}
