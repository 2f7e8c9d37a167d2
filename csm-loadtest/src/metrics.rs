//! Collection and printing of load test metrics.
//!
//! Every virtual user reports into the [`ProfileMetrics`] of its profile. Call latencies and
//! failures arrive as [`RequestEvent`]s from a [`StatsClient`](csm_client::StatsClient), while
//! payload sizes and write fallbacks are recorded from the [`TaskOutcome`] of each task.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use bytesize::ByteSize;
use csm_client::{EventSink, Operation, Outcome, RequestEvent};
use sketches_ddsketch::{DDSketch, DDSketchError};
use yansi::Paint;

use crate::workload::TaskOutcome;

/// Timings and failures of a single operation.
#[derive(Clone, Default)]
pub struct OperationMetrics {
    /// Latency of successful calls, in seconds.
    pub timing: DDSketch,
    /// Number of failed calls.
    pub failures: u64,
}

impl OperationMetrics {
    /// Returns the number of successful calls.
    pub fn count(&self) -> usize {
        self.timing.count()
    }

    fn merge(&mut self, other: &Self) -> Result<(), DDSketchError> {
        self.timing.merge(&other.timing)?;
        self.failures += other.failures;
        Ok(())
    }
}

impl fmt::Debug for OperationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationMetrics")
            .field("count", &self.count())
            .field("failures", &self.failures)
            .finish()
    }
}

/// Aggregated metrics of one or more virtual users.
#[derive(Clone, Default)]
pub struct WorkloadMetrics {
    /// Metrics of `get_many` calls.
    pub get_many: OperationMetrics,
    /// Metrics of `set_many` calls.
    pub set_many: OperationMetrics,

    /// Total number of blocks returned by reads.
    pub blocks_read: u64,
    /// Serialized sizes of written blocks, in bytes.
    pub payload_sizes: DDSketch,
    /// Total serialized size of written blocks.
    pub bytes_written: u64,
    /// Number of reads that turned into writes because too few blocks had been written.
    pub fallbacks: u64,
}

impl WorkloadMetrics {
    /// Returns the metrics of the given operation.
    pub fn operation(&self, operation: Operation) -> &OperationMetrics {
        match operation {
            Operation::GetMany => &self.get_many,
            Operation::SetMany => &self.set_many,
        }
    }

    fn operation_mut(&mut self, operation: Operation) -> &mut OperationMetrics {
        match operation {
            Operation::GetMany => &mut self.get_many,
            Operation::SetMany => &mut self.set_many,
        }
    }

    /// Records a single call.
    pub fn record_event(&mut self, event: &RequestEvent) {
        let metrics = self.operation_mut(event.operation);
        match event.outcome {
            Outcome::Success { response_length } => {
                metrics.timing.add(event.response_time.as_secs_f64());
                if event.operation == Operation::GetMany {
                    self.blocks_read += response_length as u64;
                }
            }
            Outcome::Failure { .. } => metrics.failures += 1,
        }
    }

    /// Records the outcome of a successful task.
    pub fn record_outcome(&mut self, outcome: TaskOutcome) {
        if let TaskOutcome::Write {
            payload_size,
            fallback,
        } = outcome
        {
            self.payload_sizes.add(payload_size as f64);
            self.bytes_written += payload_size as u64;
            if fallback {
                self.fallbacks += 1;
            }
        }
    }

    /// Adds all metrics from `other` to these metrics.
    pub fn merge(&mut self, other: &Self) -> Result<(), DDSketchError> {
        self.get_many.merge(&other.get_many)?;
        self.set_many.merge(&other.set_many)?;
        self.blocks_read += other.blocks_read;
        self.payload_sizes.merge(&other.payload_sizes)?;
        self.bytes_written += other.bytes_written;
        self.fallbacks += other.fallbacks;
        Ok(())
    }
}

impl fmt::Debug for WorkloadMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadMetrics")
            .field("get_many", &self.get_many)
            .field("set_many", &self.set_many)
            .field("blocks_read", &self.blocks_read)
            .field("bytes_written", &self.bytes_written)
            .field("fallbacks", &self.fallbacks)
            .finish_non_exhaustive()
    }
}

/// Shared metrics of all virtual users of one profile.
///
/// This is the [`EventSink`] passed to every [`StatsClient`](csm_client::StatsClient) of the
/// profile.
#[derive(Debug, Default)]
pub struct ProfileMetrics {
    inner: Mutex<WorkloadMetrics>,
}

impl ProfileMetrics {
    /// Creates empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of a successful task.
    pub fn record_outcome(&self, outcome: TaskOutcome) {
        self.lock().record_outcome(outcome);
    }

    /// Takes all metrics recorded so far, leaving empty metrics behind.
    pub fn take(&self) -> WorkloadMetrics {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WorkloadMetrics> {
        // Metrics are plain counters, so they remain usable after a panic while recording.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for ProfileMetrics {
    fn record(&self, event: RequestEvent) {
        self.lock().record_event(&event);
    }
}

/// Metrics of a single profile after a finished run.
#[derive(Debug)]
pub struct ProfileReport {
    /// Name of the profile.
    pub name: String,
    /// Number of virtual users that ran this profile.
    pub users: usize,
    /// Aggregated metrics of all virtual users.
    pub metrics: WorkloadMetrics,
}

/// The result of a load test run.
#[derive(Debug)]
pub struct Report {
    /// Wall-clock time the run took.
    pub elapsed: Duration,
    /// Metrics per profile, in configuration order.
    pub profiles: Vec<ProfileReport>,
}

impl Report {
    /// Merges the metrics of all profiles.
    pub fn totals(&self) -> Result<WorkloadMetrics, DDSketchError> {
        let mut totals = WorkloadMetrics::default();
        for profile in &self.profiles {
            totals.merge(&profile.metrics)?;
        }
        Ok(totals)
    }

    /// Prints the report to stdout.
    pub fn print(&self) -> Result<(), DDSketchError> {
        for profile in &self.profiles {
            println!();
            println!(
                "{} {} (users: {})",
                "## Profile".bold(),
                profile.name.bold().blue(),
                profile.users.bold()
            );
            print_metrics(&profile.metrics, self.elapsed)?;
        }

        println!();
        println!("{} ({:.2?})", "## TOTALS".bold(), self.elapsed);
        print_metrics(&self.totals()?, self.elapsed)?;
        println!();

        Ok(())
    }
}

fn print_metrics(metrics: &WorkloadMetrics, duration: Duration) -> Result<(), DDSketchError> {
    print_operation(Operation::GetMany, &metrics.get_many, duration)?;
    if metrics.get_many.count() > 0 {
        println!("  {} blocks read", metrics.blocks_read.bold());
    }

    print_operation(Operation::SetMany, &metrics.set_many, duration)?;
    let sizes = &metrics.payload_sizes;
    if sizes.count() > 0 {
        let [avg, p50, p90, p99] = quantiles(sizes)?.map(|q| ByteSize::b(q as u64));
        println!(
            "  size avg: {}; p50: {p50:.2}; p90: {p90:.2}; p99: {p99:.2}",
            avg.bold()
        );
        print_ops(sizes.count(), duration);
        print_throughput(metrics.bytes_written, duration);
    }
    if metrics.fallbacks > 0 {
        println!(
            "  {} reads fell back to writes",
            metrics.fallbacks.bold().yellow()
        );
    }

    Ok(())
}

fn print_operation(
    operation: Operation,
    metrics: &OperationMetrics,
    duration: Duration,
) -> Result<(), DDSketchError> {
    let label = operation.as_str().to_uppercase();
    if metrics.count() > 0 {
        print!(
            "{} ({} ops",
            format!("{label}:").bold().green(),
            metrics.count().bold()
        );
        if metrics.failures > 0 {
            print!(
                ", {}",
                format!("{} FAILURES", metrics.failures).bold().red()
            )
        }
        println!(")");
        print_ops(metrics.count(), duration);
        println!();
        print_percentiles(&metrics.timing, Duration::from_secs_f64)?;
    } else if metrics.failures > 0 {
        println!(
            "{}",
            format!("{} {label} FAILURES", metrics.failures)
                .bold()
                .red()
        );
    }
    Ok(())
}

/// Returns the average, p50, p90 and p99 of a non-empty sketch.
fn quantiles(sketch: &DDSketch) -> Result<[f64; 4], DDSketchError> {
    let avg = sketch.sum().unwrap_or_default() / sketch.count().max(1) as f64;
    let quantile = |q| -> Result<f64, DDSketchError> {
        Ok(sketch.quantile(q)?.unwrap_or_default())
    };
    Ok([avg, quantile(0.5)?, quantile(0.9)?, quantile(0.99)?])
}

fn print_percentiles<T: fmt::Debug>(
    sketch: &DDSketch,
    map: impl Fn(f64) -> T,
) -> Result<(), DDSketchError> {
    let [avg, p50, p90, p99] = quantiles(sketch)?.map(map);
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
    Ok(())
}

fn print_ops(ops: usize, duration: Duration) {
    let ops_ps = ops as f64 / duration.as_secs_f64().max(f64::EPSILON);
    print!("  {:.2} operations/s", ops_ps.bold());
}

fn print_throughput(total: u64, duration: Duration) {
    let throughput = (total as f64 / duration.as_secs_f64().max(f64::EPSILON)) as u64;
    println!(", {:.2}/s", ByteSize::b(throughput).bold());
}
