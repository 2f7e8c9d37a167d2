//! Run virtual users concurrently against the user state storage and collect metrics.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use csm_client::{BoxedClient, StatsClient};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, UserProfile};
use crate::metrics::{ProfileMetrics, ProfileReport, Report};
use crate::workload::CsmLoadModel;

/// Everything needed to run a load test, independent of the client.
#[derive(Clone, Debug)]
pub struct Scenario {
    /// Time after which no new tasks are started.
    pub duration: Duration,
    /// Seed from which the seeds of all virtual users are derived.
    pub seed: Option<u64>,
    /// Upper bound for the serialized size of a written block.
    pub max_block_size: u64,
    /// Groups of virtual users to run.
    pub profiles: Vec<UserProfile>,
}

impl From<&Config> for Scenario {
    fn from(config: &Config) -> Self {
        Self {
            duration: config.duration,
            seed: config.seed,
            max_block_size: config.max_block_size.as_u64(),
            profiles: config.users.clone(),
        }
    }
}

type UserClient = StatsClient<BoxedClient, Arc<ProfileMetrics>>;

/// A single simulated learner.
struct VirtualUser {
    model: CsmLoadModel,
    client: UserClient,
    metrics: Arc<ProfileMetrics>,
    min_wait: Duration,
    max_wait: Duration,
}

impl VirtualUser {
    /// Runs tasks until the deadline passes or the run is cancelled.
    ///
    /// A task in flight at the deadline is completed, while cancellation aborts it.
    async fn run(mut self, deadline: Instant, cancel: CancellationToken) {
        tracing::debug!(username = self.model.username(), "starting virtual user");

        while Instant::now() < deadline {
            let task = self.model.next_task();
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.model.run_task(task, &self.client) => match result {
                    Ok(outcome) => self.metrics.record_outcome(outcome),
                    Err(error) => tracing::debug!(
                        error = &error as &dyn std::error::Error,
                        ?task,
                        username = self.model.username(),
                        "task failed"
                    ),
                },
            }

            let wait = self.model.wait_time(self.min_wait, self.max_wait);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::debug!(
            username = self.model.username(),
            written = self.model.seen_usages().len(),
            "virtual user finished"
        );
    }
}

/// Runs all virtual users of the scenario concurrently against `client`.
///
/// The run ends after the scenario's duration, or early when `cancel` is triggered. Either way, the
/// metrics collected so far are returned.
pub async fn run(
    client: BoxedClient,
    scenario: Scenario,
    cancel: CancellationToken,
) -> Result<Report> {
    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message("Running load test:");
    bar.enable_steady_tick(Duration::from_millis(100));

    let started = Instant::now();
    let deadline = started + scenario.duration;
    let mut seeds = match scenario.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };

    let mut running = Vec::with_capacity(scenario.profiles.len());
    for profile in scenario.profiles {
        let metrics = Arc::new(ProfileMetrics::new());
        tracing::info!(
            profile = %profile.name,
            users = profile.count,
            "starting profile"
        );

        let mut tasks = Vec::with_capacity(profile.count);
        for _ in 0..profile.count {
            let seed: u64 = seeds.random();
            let username = format!(
                "{}-{}",
                profile.name,
                uuid::Builder::from_random_bytes(seeds.random()).into_uuid()
            );

            let model = CsmLoadModel::builder(username)
                .seed(seed)
                .max_block_size(scenario.max_block_size)
                .task_weights(profile.weights.get_many, profile.weights.set_many)
                .build()
                .with_context(|| format!("invalid profile `{}`", profile.name))?;

            let user = VirtualUser {
                model,
                client: StatsClient::new(Arc::clone(&client), Arc::clone(&metrics)),
                metrics: Arc::clone(&metrics),
                min_wait: profile.min_wait,
                max_wait: profile.max_wait,
            };
            tasks.push(tokio::spawn(user.run(deadline, cancel.clone())));
        }

        running.push((profile, metrics, tasks));
    }

    let mut profiles = Vec::with_capacity(running.len());
    for (profile, metrics, tasks) in running {
        for result in futures::future::join_all(tasks).await {
            result.context("virtual user panicked")?;
        }

        profiles.push(ProfileReport {
            name: profile.name,
            users: profile.count,
            metrics: metrics.take(),
        });
    }

    bar.finish_and_clear();
    let elapsed = started.elapsed();
    tracing::info!(?elapsed, cancelled = cancel.is_cancelled(), "load test finished");

    Ok(Report { elapsed, profiles })
}
