use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::map::{self, Direction, KeyKind, KeySchema, MapOptions, SortBy};
use crate::percpu;
use crate::stat::{HistogramKind, HistogramSpec, StatField};

/// Top-level configuration for a probe-maps run.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Number of shards. Default: available parallelism.
    #[serde(default)]
    pub shards: Option<usize>,

    /// How shards are protected while the workload runs. Default: sharded.
    #[serde(default)]
    pub locking: LockingMode,

    /// Maps to create.
    #[serde(default)]
    pub maps: Vec<MapConfig>,

    /// Synthetic update generator configuration.
    #[serde(default)]
    pub workload: WorkloadConfig,

    /// Aggregation and output configuration.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Shard access discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockingMode {
    /// Each shard is written by exactly one thread, without locks.
    #[default]
    Sharded,
    /// Every shard access takes the shard lock; readers may poll live data.
    Locked,
}

/// Definition of one per-CPU map.
#[derive(Debug, Clone, Deserialize)]
pub struct MapConfig {
    /// Name printed in the report.
    pub name: String,

    /// Entries per shard; 0 means unbounded. Default: 2048.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Evict the oldest entry when a shard is full. Default: false.
    #[serde(default)]
    pub wrap: bool,

    /// Hash table size as a power of two. Default: 8.
    #[serde(default = "default_hash_bits")]
    pub hash_bits: u32,

    /// Key parts, at most 5. Default: a single int64.
    #[serde(default = "default_keys")]
    pub keys: Vec<KeyConfig>,

    /// Value type.
    pub value: ValueConfig,

    /// Ordering applied before printing.
    #[serde(default)]
    pub sort: Option<SortConfig>,
}

/// Type of one key part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyConfig {
    Int64,
    String {
        /// Buffer size in bytes. Default: 256.
        #[serde(default = "default_string_len")]
        max_len: usize,
    },
}

/// Value type of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueConfig {
    Int64,
    String {
        /// Buffer size in bytes. Default: 256.
        #[serde(default = "default_string_len")]
        max_len: usize,
    },
    Stat {
        #[serde(default)]
        histogram: HistogramConfig,
    },
}

/// Histogram attached to stat values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistogramConfig {
    #[default]
    None,
    Log,
    Linear { start: i64, stop: i64, interval: i64 },
}

/// What a map is sorted by before printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Value,
    Key,
    Count,
    Sum,
    Min,
    Max,
    #[serde(alias = "avg")]
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

/// Sorting applied to the aggregated map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SortConfig {
    pub by: SortField,

    /// Key part used with `by: key`, counted from 0. Default: 0.
    #[serde(default)]
    pub key: usize,

    /// Default: descending.
    #[serde(default)]
    pub direction: SortDirection,

    /// Only order and print the best `top` entries; 0 sorts everything.
    #[serde(default)]
    pub top: usize,
}

/// Synthetic update generator.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadConfig {
    /// Updates per shard and map. Default: 100000.
    #[serde(default = "default_iterations")]
    pub iterations: u64,

    /// Distinct values per key part. Default: 64.
    #[serde(default = "default_key_space")]
    pub key_space: u64,

    /// Samples are drawn from `[-max_value, max_value]` for stats and
    /// `[0, max_value]` for int64 maps. Default: 1000000.
    #[serde(default = "default_max_value")]
    pub max_value: i64,

    /// Update with accumulate (add) rather than overwrite. Default: true.
    #[serde(default = "default_true")]
    pub accumulate: bool,

    /// Random seed. Default: fixed.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// Aggregation and output configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// How often live data is aggregated while a locked workload runs.
    /// Default: 1s.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Clear shards while aggregating for the final report. Default: false.
    #[serde(default)]
    pub clear: bool,

    /// Maximum entries printed per map, when not limited by `sort.top`.
    #[serde(default)]
    pub limit: Option<usize>,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_capacity() -> usize {
    map::DEFAULT_CAPACITY
}

fn default_hash_bits() -> u32 {
    map::DEFAULT_HASH_BITS
}

fn default_keys() -> Vec<KeyConfig> {
    vec![KeyConfig::Int64]
}

fn default_string_len() -> usize {
    256
}

fn default_iterations() -> u64 {
    100_000
}

fn default_key_space() -> u64 {
    64
}

fn default_max_value() -> i64 {
    1_000_000
}

fn default_true() -> bool {
    true
}

fn default_seed() -> u64 {
    0x2545_F491_4F6C_DD1D
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            shards: None,
            locking: LockingMode::default(),
            maps: Vec::new(),
            workload: WorkloadConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            key_space: default_key_space(),
            max_value: default_max_value(),
            accumulate: true,
            seed: default_seed(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            clear: false,
            limit: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.shards == Some(0) {
            bail!("shards must be positive");
        }

        if self.maps.is_empty() {
            bail!("at least one map must be configured");
        }

        let mut names = HashSet::new();
        for map in &self.maps {
            if map.name.is_empty() {
                bail!("map name is required");
            }
            if !names.insert(map.name.as_str()) {
                bail!("duplicate map name {:?}", map.name);
            }
            map.validate()
                .with_context(|| format!("invalid map {:?}", map.name))?;
        }

        if self.workload.key_space == 0 {
            bail!("workload.key_space must be positive");
        }
        if self.workload.max_value <= 0 {
            bail!("workload.max_value must be positive");
        }

        if self.locking == LockingMode::Locked && self.report.poll_interval.is_zero() {
            bail!("report.poll_interval must be positive in locked mode");
        }

        Ok(())
    }

    /// Effective shard count.
    pub fn shard_count(&self) -> usize {
        self.shards.unwrap_or_else(percpu::default_shards)
    }
}

impl MapConfig {
    /// Validate options, key schema, value parameters and sort request.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 && self.wrap {
            bail!("wrap requires a positive capacity");
        }
        if !(map::MIN_HASH_BITS..=map::MAX_HASH_BITS).contains(&self.hash_bits) {
            bail!(
                "hash_bits must be between {} and {}, got {}",
                map::MIN_HASH_BITS,
                map::MAX_HASH_BITS,
                self.hash_bits
            );
        }

        self.schema()?;

        match self.value {
            ValueConfig::String { max_len } if max_len < 2 => {
                bail!("string value max_len must be at least 2, got {max_len}");
            }
            ValueConfig::Stat { .. } => {
                self.histogram()?;
            }
            _ => {}
        }

        if let Some(sort) = &self.sort {
            let is_stat = matches!(self.value, ValueConfig::Stat { .. });
            match sort.by {
                SortField::Value if is_stat => {
                    bail!("stat maps sort by count, sum, min, max or average, not value");
                }
                SortField::Key if sort.key >= self.keys.len() => {
                    bail!(
                        "sort key {} out of range for {} key parts",
                        sort.key,
                        self.keys.len()
                    );
                }
                SortField::Count
                | SortField::Sum
                | SortField::Min
                | SortField::Max
                | SortField::Average
                    if !is_stat =>
                {
                    bail!("sorting by a stat field needs a stat value");
                }
                _ => {}
            }
        }

        Ok(())
    }

    pub fn options(&self) -> MapOptions {
        MapOptions::with_capacity(self.capacity)
            .wrap(self.wrap)
            .hash_bits(self.hash_bits)
    }

    pub fn schema(&self) -> Result<KeySchema> {
        let kinds = self
            .keys
            .iter()
            .map(|k| match *k {
                KeyConfig::Int64 => KeyKind::Int64,
                KeyConfig::String { max_len } => KeyKind::Str { max_len },
            })
            .collect();
        KeySchema::new(kinds).context("invalid key schema")
    }

    /// Histogram spec of a stat map; `none` for other value types.
    pub fn histogram(&self) -> Result<HistogramSpec> {
        let kind = match self.value {
            ValueConfig::Stat {
                histogram: HistogramConfig::Log,
            } => HistogramKind::Log,
            ValueConfig::Stat {
                histogram:
                    HistogramConfig::Linear {
                        start,
                        stop,
                        interval,
                    },
            } => HistogramKind::Linear {
                start,
                stop,
                interval,
            },
            _ => HistogramKind::None,
        };
        HistogramSpec::from_kind(kind).context("invalid histogram")
    }
}

impl SortConfig {
    pub fn sort_by(&self) -> SortBy {
        match self.by {
            SortField::Value => SortBy::Value,
            SortField::Key => SortBy::Key(self.key),
            SortField::Count => SortBy::Stat(StatField::Count),
            SortField::Sum => SortBy::Stat(StatField::Sum),
            SortField::Min => SortBy::Stat(StatField::Min),
            SortField::Max => SortBy::Stat(StatField::Max),
            SortField::Average => SortBy::Stat(StatField::Average),
        }
    }

    pub fn direction(&self) -> Direction {
        match self.direction {
            SortDirection::Ascending => Direction::Ascending,
            SortDirection::Descending => Direction::Descending,
        }
    }
}
