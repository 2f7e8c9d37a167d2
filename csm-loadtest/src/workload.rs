//! A module for defining the [`CsmLoadModel`], the synthetic workload of a single virtual user.
//!
//! The model issues `get_many` and `set_many` calls against a [`UserStateClient`] with relative
//! weights 2:1 by default. Request shapes follow empirically chosen distributions:
//!
//! - The serialized size of a written block follows a heavy-tailed Pareto distribution
//!   (shape `0.262`). Most blocks are tiny or empty, a few are huge.
//! - The number of fields per block is 1 or 2 in 90% of all cases.
//! - The number of blocks read at once follows a Pareto distribution with shape `2.21`.
//!
//! Reads only ever request blocks this model has written before in the same session.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use csm_client::{Result, UserStateClient};
use csm_types::{BlockData, BlockType, CourseKey, UsageKey, serialized_size};
use rand::rngs::SmallRng;
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};
use rand_distr::weighted::WeightedIndex;
use rand_distr::{Distribution, Pareto};

/// Pareto shape of the serialized block size.
const DATA_SIZE_SHAPE: f64 = 0.262;
/// Pareto shape of the number of blocks requested by a single read.
const BLOCK_COUNT_SHAPE: f64 = 2.21;
/// Serialized size of a block without any fields, `{}`.
const EMPTY_SIZE: u64 = 2;
/// Syntax characters per serialized field.
const FIELD_OVERHEAD: u64 = csm_types::block::FIELD_OVERHEAD as u64;
/// Block ids are drawn from `0..MAX_BLOCK_ID`. Real courses request at most this many blocks.
const MAX_BLOCK_ID: u32 = 1000;
/// Upper bound of the field count distribution, paired with the resulting count.
const FIELD_COUNTS: [(f64, usize); 4] = [(0.45, 1), (0.9, 2), (0.99, 3), (0.999, 4)];

/// Default upper bound for the serialized size of a single block.
pub const DEFAULT_MAX_BLOCK_SIZE: u64 = 16 * 1024 * 1024;
/// Largest accepted bound for the serialized size of a single block.
pub const MAX_BLOCK_SIZE_LIMIT: u64 = 1024 * 1024 * 1024;

/// Printable ASCII characters: digits, letters, punctuation and whitespace.
const PRINTABLE: &[u8] = b"0123456789\
    abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\
    !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~ \t\n\r\x0b\x0c";

/// Size of the shared character pool that field values are cut from.
const POOL_SIZE: usize = 1000;

/// Random printable characters that all field values are sliced from.
///
/// Initialized once per process and never modified afterwards.
static RANDOM_CHARACTERS: LazyLock<String> = LazyLock::new(|| {
    let mut rng = rand::rng();
    (0..POOL_SIZE)
        .map(|_| char::from(PRINTABLE[rng.random_range(0..PRINTABLE.len())]))
        .collect()
});

/// Returns `len` characters from the shared pool, repeating the pool as needed.
fn random_characters(len: usize) -> String {
    let pool = RANDOM_CHARACTERS.as_str();
    let mut value = String::with_capacity(len);
    while value.len() < len {
        let take = (len - value.len()).min(pool.len());
        value.push_str(&pool[..take]);
    }
    value
}

/// The tasks a virtual user can perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Task {
    /// Read a number of previously written blocks.
    GetMany,
    /// Write a single block.
    SetMany,
}

/// What a successfully executed [`Task`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A `get_many` call was issued for `block_count` blocks.
    Read {
        /// Number of distinct blocks requested.
        block_count: usize,
    },
    /// A `set_many` call was issued for a single block.
    Write {
        /// Approximate serialized size of the written block.
        payload_size: usize,
        /// `true` if the write replaced a read, because too few blocks had been written yet.
        fallback: bool,
    },
}

/// A builder for creating a [`CsmLoadModel`].
#[derive(Clone, Debug)]
pub struct LoadModelBuilder {
    username: String,
    course: CourseKey,
    seed: u64,
    max_block_size: u64,

    get_many_weight: u32,
    set_many_weight: u32,
}

impl LoadModelBuilder {
    /// The course all generated usage keys belong to.
    pub fn course(mut self, course: CourseKey) -> Self {
        self.course = course;
        self
    }

    /// Seeds the RNG driving all distributions, for reproducible runs.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Upper bound for the serialized size of a written block.
    ///
    /// The block size distribution has no finite mean, so without a bound a single write could
    /// request gigabytes of data.
    pub fn max_block_size(mut self, max_block_size: u64) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    /// The ratio between `get_many` and `set_many` tasks.
    pub fn task_weights(mut self, get_many: u32, set_many: u32) -> Self {
        self.get_many_weight = get_many;
        self.set_many_weight = set_many;
        self
    }

    /// Creates the load model.
    ///
    /// # Errors
    ///
    /// Fails if both task weights are zero or if `max_block_size` exceeds
    /// [`MAX_BLOCK_SIZE_LIMIT`].
    pub fn build(self) -> anyhow::Result<CsmLoadModel> {
        anyhow::ensure!(
            self.max_block_size <= MAX_BLOCK_SIZE_LIMIT,
            "max_block_size of {} bytes exceeds the limit of {MAX_BLOCK_SIZE_LIMIT} bytes",
            self.max_block_size
        );
        let task_distribution = WeightedIndex::new([self.get_many_weight, self.set_many_weight])
            .context("invalid task weights")?;
        let data_size = Pareto::new(1.0, DATA_SIZE_SHAPE).context("invalid size distribution")?;
        let block_count =
            Pareto::new(1.0, BLOCK_COUNT_SHAPE).context("invalid block count distribution")?;

        Ok(CsmLoadModel {
            username: self.username,
            course_key: self.course,
            max_block_size: self.max_block_size.max(EMPTY_SIZE),

            rng: SmallRng::seed_from_u64(self.seed),
            task_distribution,
            data_size,
            block_count,

            usages_with_data: BTreeSet::new(),
        })
    }
}

/// Synthetic load of a single virtual user against the user state storage.
#[derive(Debug)]
pub struct CsmLoadModel {
    /// The user all requests are issued for.
    username: String,
    /// The course all generated blocks belong to.
    course_key: CourseKey,
    /// Serialized block sizes are clamped to this value.
    max_block_size: u64,

    /// The RNG driving all our distributions.
    rng: SmallRng,
    /// Picks the next task.
    task_distribution: WeightedIndex<u32>,
    /// Pareto distribution of serialized block sizes.
    data_size: Pareto<f64>,
    /// Pareto distribution of the number of blocks per read.
    block_count: Pareto<f64>,

    /// Blocks written during this session, which reads are drawn from.
    usages_with_data: BTreeSet<UsageKey>,
}

impl CsmLoadModel {
    /// Constructs a new load model builder for the given user.
    pub fn builder(username: impl Into<String>) -> LoadModelBuilder {
        LoadModelBuilder {
            username: username.into(),
            course: CourseKey::default(),
            seed: rand::random(),
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,

            get_many_weight: 2,
            set_many_weight: 1,
        }
    }

    /// Returns the user all requests are issued for.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns all blocks written during this session.
    pub fn seen_usages(&self) -> &BTreeSet<UsageKey> {
        &self.usages_with_data
    }

    /// Picks the next task according to the task weights.
    pub fn next_task(&mut self) -> Task {
        match self.task_distribution.sample(&mut self.rng) {
            0 => Task::GetMany,
            _ => Task::SetMany,
        }
    }

    /// Draws the time to wait before the next task, uniformly from `min..=max`.
    pub fn wait_time(&mut self, min: Duration, max: Duration) -> Duration {
        if min >= max {
            return min;
        }
        self.rng.random_range(min..=max)
    }

    /// Executes the given task against `client`.
    pub async fn run_task<C>(&mut self, task: Task, client: &C) -> Result<TaskOutcome>
    where
        C: UserStateClient + ?Sized,
    {
        match task {
            Task::GetMany => self.get_many(client).await,
            Task::SetMany => self.set_many(client).await,
        }
    }

    /// Reads a random selection of previously written blocks.
    ///
    /// If fewer blocks have been written than the drawn block count, this writes a block instead.
    pub async fn get_many<C>(&mut self, client: &C) -> Result<TaskOutcome>
    where
        C: UserStateClient + ?Sized,
    {
        let block_count = self.gen_num_blocks();
        self.read_blocks(client, block_count).await
    }

    /// Writes random data for a single, randomly chosen block.
    pub async fn set_many<C>(&mut self, client: &C) -> Result<TaskOutcome>
    where
        C: UserStateClient + ?Sized,
    {
        self.write_block(client, false).await
    }

    async fn read_blocks<C>(&mut self, client: &C, block_count: usize) -> Result<TaskOutcome>
    where
        C: UserStateClient + ?Sized,
    {
        if block_count > self.usages_with_data.len() {
            tracing::trace!(
                block_count,
                written = self.usages_with_data.len(),
                "not enough blocks written, writing instead"
            );
            return self.write_block(client, true).await;
        }

        let keys: BTreeSet<UsageKey> = self
            .usages_with_data
            .iter()
            .choose_multiple(&mut self.rng, block_count)
            .into_iter()
            .cloned()
            .collect();

        client.get_many(&self.username, &keys).await?;
        Ok(TaskOutcome::Read { block_count })
    }

    async fn write_block<C>(&mut self, client: &C, fallback: bool) -> Result<TaskOutcome>
    where
        C: UserStateClient + ?Sized,
    {
        let usage_key = self.gen_usage_key();
        let data = self.gen_block_data();
        let payload_size = serialized_size(&data);

        let blocks = BTreeMap::from([(usage_key.clone(), data)]);
        client.set_many(&self.username, blocks).await?;
        self.usages_with_data.insert(usage_key);

        Ok(TaskOutcome::Write {
            payload_size,
            fallback,
        })
    }

    fn gen_field_count(&mut self) -> usize {
        let choice: f64 = self.rng.random();
        FIELD_COUNTS
            .iter()
            .find(|(bound, _)| choice <= *bound)
            .map_or(5, |(_, count)| *count)
    }

    fn gen_block_type(&mut self) -> BlockType {
        BlockType::ALL[self.rng.random_range(0..BlockType::ALL.len())]
    }

    /// Draws the target serialized size of a block, clamped to the maximum block size.
    fn gen_target_size(&mut self) -> u64 {
        // `Pareto` has support `[1, inf)`, shift it to `[0, inf)` like a Lomax distribution.
        let lomax = self.data_size.sample(&mut self.rng) - 1.0;
        ((lomax + EMPTY_SIZE as f64) as u64).min(self.max_block_size)
    }

    fn gen_block_data(&mut self) -> BlockData {
        let target_size = self.gen_target_size();
        self.block_data_for_size(target_size)
    }

    /// Generates block data that serializes to roughly `target_size` bytes.
    fn block_data_for_size(&mut self, target_size: u64) -> BlockData {
        let num_fields = self.gen_field_count();
        if target_size == EMPTY_SIZE {
            return BlockData::new();
        }

        // A serialized field looks like `"k": "value",`. Keys are single characters shared by all
        // blocks, so everything but the key and the syntax goes to the value.
        let per_field = (target_size / num_fields as u64).saturating_sub(FIELD_OVERHEAD);
        let value = random_characters(per_field as usize);

        (0..num_fields)
            .map(|field| (field.to_string(), value.clone()))
            .collect()
    }

    fn gen_num_blocks(&mut self) -> usize {
        // Shifted like in `gen_target_size`, plus one.
        let lomax = self.block_count.sample(&mut self.rng) - 1.0;
        (lomax + 1.0) as usize
    }

    fn gen_usage_key(&mut self) -> UsageKey {
        let block_type = self.gen_block_type();
        let block_id = self.rng.random_range(0..MAX_BLOCK_ID);
        self.course_key.numbered_usage_key(block_type, block_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use csm_client::{Call, InMemoryClient};
    use csm_test::client::FailingClient;

    use super::*;

    const SAMPLES: usize = 100_000;

    fn model(seed: u64) -> CsmLoadModel {
        CsmLoadModel::builder("learner").seed(seed).build().unwrap()
    }

    fn frequency<T: Eq + std::hash::Hash>(samples: impl Iterator<Item = T>) -> HashMap<T, f64> {
        let mut counts = HashMap::new();
        let mut total = 0;
        for sample in samples {
            *counts.entry(sample).or_insert(0usize) += 1;
            total += 1;
        }
        counts
            .into_iter()
            .map(|(k, count)| (k, count as f64 / total as f64))
            .collect()
    }

    #[test]
    fn field_count_distribution() {
        let mut model = model(1);
        let freq = frequency((0..SAMPLES).map(|_| model.gen_field_count()));

        let expected = [(1, 0.45, 0.01), (2, 0.45, 0.01), (3, 0.09, 0.005)];
        for (count, p, tolerance) in expected {
            let actual = freq[&count];
            assert!((actual - p).abs() < tolerance, "{count}: {actual} vs {p}");
        }
        let actual = freq.get(&4).copied().unwrap_or_default();
        assert!((actual - 0.009).abs() < 0.002, "4: {actual}");
        let actual = freq.get(&5).copied().unwrap_or_default();
        assert!((actual - 0.001).abs() < 0.0007, "5: {actual}");

        assert!(freq.keys().all(|count| (1..=5).contains(count)));
    }

    #[test]
    fn block_types_are_uniform() {
        let mut model = model(2);
        let freq = frequency((0..40_000).map(|_| model.gen_block_type()));

        assert_eq!(freq.len(), 4);
        for ty in BlockType::ALL {
            assert!((freq[&ty] - 0.25).abs() < 0.01, "{ty}: {}", freq[&ty]);
        }
    }

    #[test]
    fn block_data_matches_target_size() {
        let mut model = model(3);
        for _ in 0..10_000 {
            let target_size = model.gen_target_size();
            let data = model.block_data_for_size(target_size);

            if target_size == EMPTY_SIZE {
                assert!(data.is_empty());
                continue;
            }

            let num_fields = data.len();
            assert!((1..=5).contains(&num_fields));

            let expected_keys: Vec<_> = (0..num_fields).map(|i| i.to_string()).collect();
            assert!(data.keys().eq(expected_keys.iter()));

            let per_field = (target_size / num_fields as u64).saturating_sub(FIELD_OVERHEAD);
            assert!(data.values().all(|v| v.len() as u64 == per_field));
        }
    }

    #[test]
    fn small_target_yields_empty_values() {
        let mut model = model(4);
        let data = model.block_data_for_size(7);

        assert!(!data.is_empty());
        assert!(data.values().all(String::is_empty));
    }

    #[test]
    fn empty_target_yields_empty_block() {
        let mut model = model(5);
        assert!(model.block_data_for_size(EMPTY_SIZE).is_empty());
    }

    #[test]
    fn values_tile_the_character_pool() {
        let value = random_characters(2500);
        assert_eq!(value.len(), 2500);
        assert_eq!(&value[..POOL_SIZE], RANDOM_CHARACTERS.as_str());
        assert_eq!(&value[POOL_SIZE..2 * POOL_SIZE], RANDOM_CHARACTERS.as_str());
        assert_eq!(&value[2 * POOL_SIZE..], &RANDOM_CHARACTERS[..500]);
        assert!(value.bytes().all(|b| PRINTABLE.contains(&b)));
    }

    #[test]
    fn rejects_oversized_blocks() {
        let result = CsmLoadModel::builder("learner")
            .max_block_size(u64::MAX)
            .build();
        assert!(result.is_err());

        let model = CsmLoadModel::builder("learner")
            .max_block_size(MAX_BLOCK_SIZE_LIMIT)
            .build()
            .unwrap();
        assert_eq!(model.max_block_size, MAX_BLOCK_SIZE_LIMIT);
    }

    #[test]
    fn target_size_is_clamped() {
        let mut model = CsmLoadModel::builder("learner")
            .seed(6)
            .max_block_size(64)
            .build()
            .unwrap();

        let sizes: Vec<_> = (0..10_000).map(|_| model.gen_target_size()).collect();
        assert!(sizes.iter().all(|size| (EMPTY_SIZE..=64).contains(size)));
        // Pareto with shape 0.262 exceeds 62 in roughly a third of all samples.
        assert!(sizes.contains(&64));
        assert!(sizes.contains(&EMPTY_SIZE));
    }

    #[test]
    fn block_count_is_at_least_one() {
        let mut model = model(7);
        let counts: Vec<_> = (0..10_000).map(|_| model.gen_num_blocks()).collect();

        assert!(counts.iter().all(|&count| count >= 1));
        let ones = counts.iter().filter(|&&count| count == 1).count() as f64 / 10_000.0;
        // P(Pareto(2.21) < 2) = 1 - 2^-2.21
        assert!((ones - 0.784).abs() < 0.02, "{ones}");
    }

    #[test]
    fn usage_keys_are_in_range() {
        let mut model = model(8);
        for _ in 0..10_000 {
            let key = model.gen_usage_key();
            let id: u32 = key.block_id().parse().unwrap();
            assert!(id < MAX_BLOCK_ID);
            assert_eq!(key.block_id(), id.to_string());
            assert!(BlockType::ALL.contains(&key.block_type()));
            assert_eq!(key.course(), &CourseKey::default());
        }
    }

    #[test]
    fn tasks_follow_weights() {
        let mut model = model(9);
        let freq = frequency((0..30_000).map(|_| model.next_task()));
        assert!((freq[&Task::GetMany] - 2.0 / 3.0).abs() < 0.02);

        let mut writes_only = CsmLoadModel::builder("learner")
            .task_weights(0, 1)
            .build()
            .unwrap();
        assert!((0..100).all(|_| writes_only.next_task() == Task::SetMany));
    }

    #[test]
    fn zero_weights_are_rejected() {
        let result = CsmLoadModel::builder("learner").task_weights(0, 0).build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn write_records_usage() {
        let client = InMemoryClient::recording();
        let mut model = model(10);

        let outcome = model.set_many(&client).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Write { fallback: false, .. }));

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        let Call::SetMany { username, blocks } = &calls[0] else {
            panic!("expected set_many");
        };
        assert_eq!(username, "learner");
        assert_eq!(blocks.len(), 1);

        let key = blocks.keys().next().unwrap();
        assert!(model.seen_usages().contains(key));
    }

    #[tokio::test]
    async fn read_without_data_falls_back_to_write() {
        csm_test::tracing::init();
        let client = InMemoryClient::recording();
        let mut model = model(11);

        let outcome = model.get_many(&client).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Write { fallback: true, .. }));
        assert_eq!(model.seen_usages().len(), 1);

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], Call::SetMany { .. }));
    }

    #[tokio::test]
    async fn reads_distinct_written_blocks() {
        let client = InMemoryClient::recording();
        let mut model = model(12);

        while model.seen_usages().len() < 10 {
            model.set_many(&client).await.unwrap();
        }
        let written = client.calls().len();

        let outcome = model.read_blocks(&client, 5).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Read { block_count: 5 });

        let calls = client.calls();
        assert_eq!(calls.len(), written + 1);
        let Call::GetMany { username, keys } = &calls[written] else {
            panic!("expected get_many");
        };
        assert_eq!(username, "learner");
        assert_eq!(keys.len(), 5);
        assert!(keys.is_subset(model.seen_usages()));

        // everything read was written before
        for key in keys {
            assert!(client.get_stored("learner", key).is_some());
        }
    }

    #[tokio::test]
    async fn read_of_too_many_blocks_writes_instead() {
        let client = InMemoryClient::recording();
        let mut model = model(13);

        while model.seen_usages().len() < 10 {
            model.set_many(&client).await.unwrap();
        }
        let written = client.calls().len();

        let outcome = model.read_blocks(&client, 11).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Write { fallback: true, .. }));

        let calls = client.calls();
        assert_eq!(calls.len(), written + 1);
        assert!(matches!(calls[written], Call::SetMany { .. }));
    }

    #[tokio::test]
    async fn read_of_all_written_blocks() {
        let client = InMemoryClient::recording();
        let mut model = model(14);

        while model.seen_usages().len() < 3 {
            model.set_many(&client).await.unwrap();
        }

        model.read_blocks(&client, 3).await.unwrap();
        let Some(Call::GetMany { keys, .. }) = client.calls().pop() else {
            panic!("expected get_many");
        };
        assert_eq!(&keys, model.seen_usages());
    }

    #[tokio::test]
    async fn failed_write_is_propagated() {
        let client = FailingClient::new("database is down");
        let mut model = model(15);

        let err = model.set_many(&client).await.unwrap_err();
        assert_eq!(err.to_string(), "storage error: database is down");
        assert!(model.seen_usages().is_empty());

        let err = model.get_many(&client).await.unwrap_err();
        assert_eq!(err.to_string(), "storage error: database is down");
    }

    #[test]
    fn wait_time_is_in_range() {
        let mut model = model(17);
        let (min, max) = (Duration::from_millis(10), Duration::from_millis(50));

        for _ in 0..1000 {
            let wait = model.wait_time(min, max);
            assert!(wait >= min && wait <= max);
        }
        assert_eq!(model.wait_time(max, max), max);
    }

    #[test]
    fn seeded_models_are_reproducible() {
        let mut a = model(16);
        let mut b = model(16);

        for _ in 0..100 {
            assert_eq!(a.gen_usage_key(), b.gen_usage_key());
            assert_eq!(a.gen_block_data(), b.gen_block_data());
            assert_eq!(a.next_task(), b.next_task());
        }
    }
}
