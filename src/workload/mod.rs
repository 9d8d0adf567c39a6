use std::fmt::Write;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::config::{Config, LockingMode, MapConfig, ReportConfig, ValueConfig, WorkloadConfig};
use crate::map::{BoundedString, KeyKind, KeyPart, Map, MapError, MapValue, MAX_KEY_ARITY};
use crate::percpu::ShardWriter;
use crate::pmap::PMap;
use crate::report::{self, RenderValue};
use crate::stat::StatData;

/// Words used for string keys and string values.
const WORDS: [&str; 8] = [
    "read",
    "write",
    "openat",
    "close",
    "futex",
    "mmap",
    "epoll_wait",
    "sendto",
];

/// Upper bound on distinct prebuilt string keys.
const MAX_STRING_KEYS: u64 = 4096;

/// A per-CPU map of any supported value type.
pub enum AnyPMap {
    Int(PMap<i64>),
    Str(PMap<BoundedString>),
    Stat(PMap<StatData>),
}

impl AnyPMap {
    pub fn from_config(shards: usize, cfg: &MapConfig) -> Result<Self> {
        let options = cfg.options();
        let schema = cfg.schema()?;
        let pmap = match cfg.value {
            ValueConfig::Int64 => AnyPMap::Int(PMap::new(shards, options, schema, ())?),
            ValueConfig::String { max_len } => {
                AnyPMap::Str(PMap::new(shards, options, schema, max_len)?)
            }
            ValueConfig::Stat { .. } => {
                AnyPMap::Stat(PMap::new(shards, options, schema, cfg.histogram()?)?)
            }
        };
        Ok(pmap)
    }

    fn aggregate_locked_len(&self) -> usize {
        match self {
            AnyPMap::Int(p) => p.aggregate_locked(false).len(),
            AnyPMap::Str(p) => p.aggregate_locked(false).len(),
            AnyPMap::Stat(p) => p.aggregate_locked(false).len(),
        }
    }
}

struct NamedPMap {
    config: MapConfig,
    pmap: AnyPMap,
}

enum AnyWriter<'a> {
    Int(ShardWriter<'a, Map<i64>>),
    Str(ShardWriter<'a, Map<BoundedString>>),
    Stat(ShardWriter<'a, Map<StatData>>),
}

/// Totals of one workload run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Updates stored.
    pub updates: u64,
    /// Updates rejected because a shard was full.
    pub exhausted: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    fn record(&mut self, accepted: bool) {
        if accepted {
            self.updates += 1;
        } else {
            self.exhausted += 1;
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.updates += other.updates;
        self.exhausted += other.exhausted;
    }
}

/// Drives synthetic updates into the configured maps and reports them.
pub struct Workload {
    shards: usize,
    locking: LockingMode,
    workload: WorkloadConfig,
    report: ReportConfig,
    maps: Vec<NamedPMap>,
    names: Vec<String>,
}

impl Workload {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let shards = cfg.shard_count();
        let maps = cfg
            .maps
            .iter()
            .map(|m| {
                let pmap = AnyPMap::from_config(shards, m)
                    .with_context(|| format!("creating map {:?}", m.name))?;
                Ok(NamedPMap {
                    config: m.clone(),
                    pmap,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let names = (0..cfg.workload.key_space.min(MAX_STRING_KEYS))
            .map(|i| format!("{}-{}", WORDS[(i % WORDS.len() as u64) as usize], i))
            .collect();

        Ok(Self {
            shards,
            locking: cfg.locking,
            workload: cfg.workload.clone(),
            report: cfg.report.clone(),
            maps,
            names,
        })
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    /// Runs one worker thread per shard until every worker has issued
    /// `iterations` updates to every map.
    pub fn run(&mut self) -> Result<RunSummary> {
        info!(
            shards = self.shards,
            maps = self.maps.len(),
            locking = ?self.locking,
            iterations = self.workload.iterations,
            "starting workload",
        );

        let started = Instant::now();
        let mut summary = match self.locking {
            LockingMode::Sharded => self.run_sharded()?,
            LockingMode::Locked => self.run_locked()?,
        };
        summary.elapsed = started.elapsed();

        if summary.exhausted > 0 {
            warn!(
                exhausted = summary.exhausted,
                "updates rejected by full maps"
            );
        }
        info!(
            updates = summary.updates,
            elapsed = ?summary.elapsed,
            "workload finished",
        );

        Ok(summary)
    }

    /// Aggregates, sorts and renders every map.
    pub fn report(&mut self) -> Result<String> {
        let mut out = String::new();
        for entry in &mut self.maps {
            match &mut entry.pmap {
                AnyPMap::Int(p) => write_report(&mut out, &entry.config, p, &self.report)?,
                AnyPMap::Str(p) => write_report(&mut out, &entry.config, p, &self.report)?,
                AnyPMap::Stat(p) => write_report(&mut out, &entry.config, p, &self.report)?,
            }
        }
        Ok(out)
    }

    fn run_sharded(&mut self) -> Result<RunSummary> {
        let mut per_shard: Vec<Vec<AnyWriter<'_>>> = (0..self.shards).map(|_| Vec::new()).collect();
        for entry in self.maps.iter_mut() {
            match &mut entry.pmap {
                AnyPMap::Int(p) => distribute(&mut per_shard, p.writers(), AnyWriter::Int),
                AnyPMap::Str(p) => distribute(&mut per_shard, p.writers(), AnyWriter::Str),
                AnyPMap::Stat(p) => distribute(&mut per_shard, p.writers(), AnyWriter::Stat),
            }
        }

        let names = &self.names;
        let cfg = &self.workload;
        thread::scope(|s| {
            let handles: Vec<_> = per_shard
                .into_iter()
                .enumerate()
                .map(|(shard, mut writers)| {
                    s.spawn(move || drive_writers(shard, &mut writers, names, cfg))
                })
                .collect();

            let mut total = RunSummary::default();
            for (shard, handle) in handles.into_iter().enumerate() {
                let summary = handle
                    .join()
                    .map_err(|_| anyhow!("shard {shard} worker panicked"))??;
                total.merge(summary);
            }
            Ok(total)
        })
    }

    fn run_locked(&mut self) -> Result<RunSummary> {
        let maps = &self.maps;
        let names = &self.names;
        let cfg = &self.workload;
        let poll_interval = self.report.poll_interval;
        let shards = self.shards;
        let main = thread::current();

        thread::scope(|s| {
            let handles: Vec<_> = (0..shards)
                .map(|shard| {
                    let main = main.clone();
                    s.spawn(move || {
                        let res = drive_locked(shard, maps, names, cfg);
                        main.unpark();
                        res
                    })
                })
                .collect();

            while handles.iter().any(|h| !h.is_finished()) {
                thread::park_timeout(poll_interval);
                for entry in maps {
                    debug!(
                        map = %entry.config.name,
                        entries = entry.pmap.aggregate_locked_len(),
                        "live aggregate",
                    );
                }
            }

            let mut total = RunSummary::default();
            for (shard, handle) in handles.into_iter().enumerate() {
                let summary = handle
                    .join()
                    .map_err(|_| anyhow!("shard {shard} worker panicked"))??;
                total.merge(summary);
            }
            Ok(total)
        })
    }
}

fn distribute<'a, V: MapValue>(
    per_shard: &mut [Vec<AnyWriter<'a>>],
    writers: Vec<ShardWriter<'a, Map<V>>>,
    wrap: fn(ShardWriter<'a, Map<V>>) -> AnyWriter<'a>,
) {
    for (shard, writer) in writers.into_iter().enumerate() {
        if let Some(slot) = per_shard.get_mut(shard) {
            slot.push(wrap(writer));
        }
    }
}

fn drive_writers(
    shard: usize,
    writers: &mut [AnyWriter<'_>],
    names: &[String],
    cfg: &WorkloadConfig,
) -> Result<RunSummary, MapError> {
    let mut rng = Generator::new(cfg, shard);
    let mut summary = RunSummary::default();
    for _ in 0..cfg.iterations {
        for writer in writers.iter_mut() {
            let accepted = match writer {
                AnyWriter::Int(m) => step(&mut **m, &mut rng, names, cfg.accumulate)?,
                AnyWriter::Str(m) => step(&mut **m, &mut rng, names, cfg.accumulate)?,
                AnyWriter::Stat(m) => step(&mut **m, &mut rng, names, cfg.accumulate)?,
            };
            summary.record(accepted);
        }
    }
    debug!(shard, updates = summary.updates, "shard worker finished");
    Ok(summary)
}

fn drive_locked(
    shard: usize,
    maps: &[NamedPMap],
    names: &[String],
    cfg: &WorkloadConfig,
) -> Result<RunSummary, MapError> {
    let mut rng = Generator::new(cfg, shard);
    let mut summary = RunSummary::default();
    for _ in 0..cfg.iterations {
        for entry in maps {
            let accepted = match &entry.pmap {
                AnyPMap::Int(p) => step_locked(p, &mut rng, names, cfg.accumulate)?,
                AnyPMap::Str(p) => step_locked(p, &mut rng, names, cfg.accumulate)?,
                AnyPMap::Stat(p) => step_locked(p, &mut rng, names, cfg.accumulate)?,
            };
            summary.record(accepted);
        }
    }
    debug!(shard, updates = summary.updates, "shard worker finished");
    Ok(summary)
}

fn step<V: Synthetic>(
    map: &mut Map<V>,
    rng: &mut Generator,
    names: &[String],
    accumulate: bool,
) -> Result<bool, MapError> {
    let mut parts = [KeyPart::Int(0); MAX_KEY_ARITY];
    let arity = rng.fill_key(map.schema().kinds(), names, &mut parts);
    let input = V::input(rng);
    accepted(map.upsert(&parts[..arity], input, accumulate))
}

fn step_locked<V: Synthetic>(
    pmap: &PMap<V>,
    rng: &mut Generator,
    names: &[String],
    accumulate: bool,
) -> Result<bool, MapError> {
    let mut parts = [KeyPart::Int(0); MAX_KEY_ARITY];
    let arity = rng.fill_key(pmap.schema().kinds(), names, &mut parts);
    let input = V::input(rng);
    accepted(pmap.upsert_locked(&parts[..arity], input, accumulate))
}

/// A full map is an expected outcome, not a failure of the run.
fn accepted(res: Result<(), MapError>) -> Result<bool, MapError> {
    match res {
        Ok(()) => Ok(true),
        Err(MapError::CapacityExhausted { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

fn write_report<V: RenderValue>(
    out: &mut String,
    cfg: &MapConfig,
    pmap: &mut PMap<V>,
    report: &ReportConfig,
) -> Result<()> {
    let mut limit = report.limit;
    let map = pmap.aggregate(report.clear);

    if let Some(sort) = &cfg.sort {
        if sort.top > 0 {
            map.sort_top_n(sort.top, sort.sort_by(), sort.direction())?;
            limit = Some(limit.map_or(sort.top, |l| l.min(sort.top)));
        } else {
            map.sort(sort.sort_by(), sort.direction())?;
        }
    }

    writeln!(out, "{} ({} entries)", cfg.name, map.len())?;
    report::write_map(out, &cfg.name, map, limit)?;
    writeln!(out)?;

    let dropped = pmap.last_dropped();
    if dropped > 0 {
        warn!(map = %cfg.name, dropped, "aggregation map full, entries dropped");
    }
    Ok(())
}

/// Deterministic per-shard xorshift source of keys and values.
struct Generator {
    state: u64,
    key_space: u64,
    max_value: i64,
}

impl Generator {
    fn new(cfg: &WorkloadConfig, shard: usize) -> Self {
        let state = cfg.seed ^ (shard as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self {
            state: if state == 0 { 1 } else { state },
            key_space: cfg.key_space.max(1),
            max_value: cfg.max_value.max(1),
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n.max(1)
    }

    fn fill_key<'a>(
        &mut self,
        kinds: &[KeyKind],
        names: &'a [String],
        parts: &mut [KeyPart<'a>; MAX_KEY_ARITY],
    ) -> usize {
        for (slot, kind) in parts.iter_mut().zip(kinds) {
            let key_space = self.key_space;
            let n = self.below(key_space);
            *slot = match kind {
                KeyKind::Int64 => KeyPart::Int(n as i64),
                KeyKind::Str { .. } => {
                    let name = names
                        .get((n % names.len().max(1) as u64) as usize)
                        .map_or("", String::as_str);
                    KeyPart::Str(name)
                }
            };
        }
        kinds.len().min(MAX_KEY_ARITY)
    }
}

/// How the generator produces an update for each value type.
trait Synthetic: MapValue {
    fn input(rng: &mut Generator) -> Self::Input<'static>;
}

impl Synthetic for i64 {
    fn input(rng: &mut Generator) -> i64 {
        let bound = rng.max_value as u64 + 1;
        rng.below(bound) as i64
    }
}

impl Synthetic for BoundedString {
    fn input(rng: &mut Generator) -> &'static str {
        WORDS[rng.below(WORDS.len() as u64) as usize]
    }
}

impl Synthetic for StatData {
    fn input(rng: &mut Generator) -> i64 {
        let max = rng.max_value;
        let span = (max as u64).saturating_mul(2).saturating_add(1);
        (i128::from(rng.below(span)) - i128::from(max)) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistogramConfig, KeyConfig, SortConfig, SortDirection, SortField};

    fn map_config(name: &str, value: ValueConfig) -> MapConfig {
        MapConfig {
            name: name.to_string(),
            capacity: 256,
            wrap: false,
            hash_bits: 6,
            keys: vec![KeyConfig::Int64],
            value,
            sort: None,
        }
    }

    fn config(locking: LockingMode, maps: Vec<MapConfig>) -> Config {
        Config {
            shards: Some(3),
            locking,
            maps,
            workload: WorkloadConfig {
                iterations: 200,
                key_space: 16,
                ..Default::default()
            },
            report: ReportConfig {
                poll_interval: Duration::from_millis(5),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn total_count(workload: &mut Workload) -> i64 {
        match &mut workload.maps[0].pmap {
            AnyPMap::Stat(p) => p.aggregate(false).iter().map(|(_, v)| v.count()).sum(),
            AnyPMap::Int(p) => p.aggregate(false).len() as i64,
            AnyPMap::Str(p) => p.aggregate(false).len() as i64,
        }
    }

    #[test]
    fn test_sharded_run_counts_every_update() {
        let cfg = config(
            LockingMode::Sharded,
            vec![map_config(
                "lat",
                ValueConfig::Stat {
                    histogram: HistogramConfig::Log,
                },
            )],
        );
        cfg.validate().expect("valid config");

        let mut workload = Workload::from_config(&cfg).expect("workload");
        let summary = workload.run().expect("run");
        assert_eq!(summary.updates, 3 * 200);
        assert_eq!(summary.exhausted, 0);
        assert_eq!(total_count(&mut workload), 600);
    }

    #[test]
    fn test_locked_run_counts_every_update() {
        let cfg = config(
            LockingMode::Locked,
            vec![map_config(
                "lat",
                ValueConfig::Stat {
                    histogram: HistogramConfig::None,
                },
            )],
        );
        let mut workload = Workload::from_config(&cfg).expect("workload");
        let summary = workload.run().expect("run");
        assert_eq!(summary.updates, 600);
        assert_eq!(total_count(&mut workload), 600);
    }

    #[test]
    fn test_full_maps_are_counted_not_fatal() {
        let mut small = map_config("small", ValueConfig::Int64);
        small.capacity = 4;
        let cfg = config(LockingMode::Sharded, vec![small]);

        let mut workload = Workload::from_config(&cfg).expect("workload");
        let summary = workload.run().expect("run");
        assert!(summary.exhausted > 0);
        assert_eq!(summary.updates + summary.exhausted, 600);
    }

    #[test]
    fn test_report_sorts_and_limits() {
        let mut counts = map_config("counts", ValueConfig::Int64);
        counts.keys = vec![KeyConfig::String { max_len: 32 }, KeyConfig::Int64];
        counts.sort = Some(SortConfig {
            by: SortField::Value,
            key: 0,
            direction: SortDirection::Descending,
            top: 3,
        });
        let words = map_config("words", ValueConfig::String { max_len: 16 });
        let cfg = config(LockingMode::Sharded, vec![counts, words]);

        let mut workload = Workload::from_config(&cfg).expect("workload");
        workload.run().expect("run");
        let text = workload.report().expect("report");

        let count_lines: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with("counts["))
            .collect();
        assert_eq!(count_lines.len(), 3);

        let values: Vec<i64> = count_lines
            .iter()
            .filter_map(|l| l.rsplit(" = ").next())
            .filter_map(|v| v.parse().ok())
            .collect();
        assert!(values.windows(2).all(|w| w[0] >= w[1]));

        assert!(text.lines().any(|l| l.starts_with("words[")));
        assert!(text.contains("counts ("));
    }

    #[test]
    fn test_generator_is_deterministic_per_shard() {
        let cfg = WorkloadConfig::default();
        let mut a = Generator::new(&cfg, 0);
        let mut b = Generator::new(&cfg, 0);
        let mut c = Generator::new(&cfg, 1);
        let xs: Vec<u64> = (0..8).map(|_| a.next()).collect();
        let ys: Vec<u64> = (0..8).map(|_| b.next()).collect();
        let zs: Vec<u64> = (0..8).map(|_| c.next()).collect();
        assert_eq!(xs, ys);
        assert_ne!(xs, zs);
    }

    #[test]
    fn test_stat_samples_stay_in_range() {
        let cfg = WorkloadConfig {
            max_value: 10,
            ..Default::default()
        };
        let mut rng = Generator::new(&cfg, 0);
        for _ in 0..1000 {
            let v = StatData::input(&mut rng);
            assert!((-10..=10).contains(&v));
        }
    }
}
