//! The counter name registry.
//!
//! Maps human-readable counter names ("cycles", "L1-dcache-load-misses",
//! ...) to [`CounterConfig`] descriptors. A fixed default table covers the
//! generalized hardware, software and cache events every perf-capable
//! kernel exposes; machine-specific raw events are merged on top from an
//! optional overlay source.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

use perf_event_open_sys::bindings as b;

use crate::config::CounterConfig;
use crate::Error;

/// A derived metric: the ratio of two collected counter values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedMetric {
    /// Name the metric is reported under
    pub name: String,
    /// Counter name supplying the numerator
    pub numerator: String,
    /// Counter name supplying the denominator
    pub denominator: String,
}

/// Built-in derived metrics: (name, numerator, denominator).
const DERIVED_METRICS: &[(&str, &str, &str)] = &[
    ("instructions-per-cycle", "instructions", "cycles"),
    ("ipc", "instructions", "cycles"),
    ("cycles-per-instruction", "cycles", "instructions"),
    ("cache-miss-rate", "cache-misses", "cache-references"),
    ("l1-data-miss-rate", "L1-dcache-load-misses", "L1-dcache-loads"),
    ("dtlb-miss-rate", "dTLB-load-misses", "dTLB-loads"),
    ("branch-miss-rate", "branch-misses", "branches"),
];

fn hardware(event: u32) -> CounterConfig {
    CounterConfig::new(b::PERF_TYPE_HARDWARE, event as u64)
}

fn software(event: u32) -> CounterConfig {
    CounterConfig::new(b::PERF_TYPE_SOFTWARE, event as u64)
}

fn cache(cache_id: u32, op_id: u32, result_id: u32) -> CounterConfig {
    // perf_event_open(2): config = id | (op << 8) | (result << 16)
    let config = (cache_id as u64) | ((op_id as u64) << 8) | ((result_id as u64) << 16);
    CounterConfig::new(b::PERF_TYPE_HW_CACHE, config)
}

/// The default name table, built once per process and never mutated.
/// Each `CounterDefinition` seeds its own map from this.
fn default_counters() -> &'static HashMap<String, CounterConfig> {
    static DEFAULTS: OnceLock<HashMap<String, CounterConfig>> = OnceLock::new();
    DEFAULTS.get_or_init(|| {
        let mut map = HashMap::new();

        let hw: &[(&str, u32)] = &[
            ("cycles", b::PERF_COUNT_HW_CPU_CYCLES),
            ("cpu-cycles", b::PERF_COUNT_HW_CPU_CYCLES),
            ("instructions", b::PERF_COUNT_HW_INSTRUCTIONS),
            ("cache-references", b::PERF_COUNT_HW_CACHE_REFERENCES),
            ("cache-misses", b::PERF_COUNT_HW_CACHE_MISSES),
            ("branches", b::PERF_COUNT_HW_BRANCH_INSTRUCTIONS),
            ("branch-instructions", b::PERF_COUNT_HW_BRANCH_INSTRUCTIONS),
            ("branch-misses", b::PERF_COUNT_HW_BRANCH_MISSES),
            ("bus-cycles", b::PERF_COUNT_HW_BUS_CYCLES),
            ("stalled-cycles-frontend", b::PERF_COUNT_HW_STALLED_CYCLES_FRONTEND),
            ("idle-cycles-frontend", b::PERF_COUNT_HW_STALLED_CYCLES_FRONTEND),
            ("stalled-cycles-backend", b::PERF_COUNT_HW_STALLED_CYCLES_BACKEND),
            ("idle-cycles-backend", b::PERF_COUNT_HW_STALLED_CYCLES_BACKEND),
            ("ref-cycles", b::PERF_COUNT_HW_REF_CPU_CYCLES),
        ];
        for (name, event) in hw {
            map.insert(name.to_string(), hardware(*event));
        }

        let sw: &[(&str, u32)] = &[
            ("cpu-clock", b::PERF_COUNT_SW_CPU_CLOCK),
            ("task-clock", b::PERF_COUNT_SW_TASK_CLOCK),
            ("page-faults", b::PERF_COUNT_SW_PAGE_FAULTS),
            ("faults", b::PERF_COUNT_SW_PAGE_FAULTS),
            ("context-switches", b::PERF_COUNT_SW_CONTEXT_SWITCHES),
            ("cs", b::PERF_COUNT_SW_CONTEXT_SWITCHES),
            ("cpu-migrations", b::PERF_COUNT_SW_CPU_MIGRATIONS),
            ("migrations", b::PERF_COUNT_SW_CPU_MIGRATIONS),
            ("minor-faults", b::PERF_COUNT_SW_PAGE_FAULTS_MIN),
            ("major-faults", b::PERF_COUNT_SW_PAGE_FAULTS_MAJ),
            ("alignment-faults", b::PERF_COUNT_SW_ALIGNMENT_FAULTS),
            ("emulation-faults", b::PERF_COUNT_SW_EMULATION_FAULTS),
        ];
        for (name, event) in sw {
            map.insert(name.to_string(), software(*event));
        }

        let caches: &[(&str, u32)] = &[
            ("L1-dcache", b::PERF_COUNT_HW_CACHE_L1D),
            ("L1-icache", b::PERF_COUNT_HW_CACHE_L1I),
            ("LLC", b::PERF_COUNT_HW_CACHE_LL),
            ("dTLB", b::PERF_COUNT_HW_CACHE_DTLB),
            ("iTLB", b::PERF_COUNT_HW_CACHE_ITLB),
            ("branch", b::PERF_COUNT_HW_CACHE_BPU),
            ("node", b::PERF_COUNT_HW_CACHE_NODE),
        ];
        let ops: &[(&str, &str, u32)] = &[
            ("loads", "load-misses", b::PERF_COUNT_HW_CACHE_OP_READ),
            ("stores", "store-misses", b::PERF_COUNT_HW_CACHE_OP_WRITE),
            ("prefetches", "prefetch-misses", b::PERF_COUNT_HW_CACHE_OP_PREFETCH),
        ];
        for (prefix, cache_id) in caches {
            for (access, miss, op_id) in ops {
                map.insert(
                    format!("{prefix}-{access}"),
                    cache(*cache_id, *op_id, b::PERF_COUNT_HW_CACHE_RESULT_ACCESS),
                );
                map.insert(
                    format!("{prefix}-{miss}"),
                    cache(*cache_id, *op_id, b::PERF_COUNT_HW_CACHE_RESULT_MISS),
                );
            }
        }

        map
    })
}

/// A name-to-config registry with an optional overlay.
///
/// Construction seeds a fresh map from the process-wide default table;
/// overlay rows are merged on top, last write per name wins. The shared
/// default table itself is never mutated.
pub struct CounterDefinition {
    counters: HashMap<String, CounterConfig>,
    metrics: HashMap<String, DerivedMetric>,
}

impl CounterDefinition {
    /// Creates a registry holding the default counter and metric tables.
    pub fn new() -> Self {
        let metrics = DERIVED_METRICS
            .iter()
            .map(|(name, numerator, denominator)| {
                (
                    name.to_string(),
                    DerivedMetric {
                        name: name.to_string(),
                        numerator: numerator.to_string(),
                        denominator: denominator.to_string(),
                    },
                )
            })
            .collect();

        Self {
            counters: default_counters().clone(),
            metrics,
        }
    }

    /// Creates a registry with an overlay file merged on top of the
    /// defaults.
    pub fn with_overlay(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut definition = Self::new();
        definition.load_overlay(BufReader::new(File::open(path)?))?;
        Ok(definition)
    }

    /// Merges overlay rows of the form `name,type,event_id[,ext1,ext2]`
    /// into the registry.
    ///
    /// Numbers may be decimal or `0x`-prefixed hex; blank lines and `#`
    /// comments are skipped. A single malformed row fails the whole load
    /// with [`Error::MalformedDefinition`] and leaves the registry
    /// untouched.
    pub fn load_overlay<R: BufRead>(&mut self, source: R) -> Result<(), Error> {
        // Parse everything before merging anything, so a bad row cannot
        // leave a partially merged registry behind.
        let mut rows = Vec::new();
        for (index, line) in source.lines().enumerate() {
            let line = line?;
            let row = line.trim();
            if row.is_empty() || row.starts_with('#') {
                continue;
            }
            rows.push(parse_row(index + 1, row)?);
        }

        for (name, config) in rows {
            self.add(name, config);
        }
        Ok(())
    }

    /// Registers a single counter config; replaces an existing entry with
    /// the same name.
    pub fn add(&mut self, name: impl Into<String>, config: CounterConfig) {
        self.counters.insert(name.into(), config);
    }

    /// Resolves a counter name.
    pub fn lookup(&self, name: &str) -> Result<CounterConfig, Error> {
        self.counters
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownCounterName(name.to_string()))
    }

    /// Resolves a derived metric name, if one is registered under it.
    pub fn lookup_metric(&self, name: &str) -> Option<DerivedMetric> {
        self.metrics.get(name).cloned()
    }

    /// Number of registered counter names (aliases included).
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the registry holds no counter names.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Default for CounterDefinition {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_row(line: usize, row: &str) -> Result<(String, CounterConfig), Error> {
    let malformed = || Error::MalformedDefinition {
        line,
        row: row.to_string(),
    };

    let fields: Vec<&str> = row.split(',').map(str::trim).collect();
    if !(3..=5).contains(&fields.len()) || fields[0].is_empty() {
        return Err(malformed());
    }

    let ty = parse_number(fields[1]).ok_or_else(malformed)?;
    let ty = u32::try_from(ty).map_err(|_| malformed())?;
    let event_id = parse_number(fields[2]).ok_or_else(malformed)?;
    let ext1 = match fields.get(3) {
        Some(field) => parse_number(field).ok_or_else(malformed)?,
        None => 0,
    };
    let ext2 = match fields.get(4) {
        Some(field) => parse_number(field).ok_or_else(malformed)?,
        None => 0,
    };

    let config = CounterConfig::new(ty, event_id).with_extension(ext1, ext2);
    Ok((fields[0].to_string(), config))
}

fn parse_number(field: &str) -> Option<u64> {
    if let Some(hex) = field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        field.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perf_event_open_sys::bindings as b;
    use rstest::rstest;
    use std::io::Cursor;

    #[test]
    fn test_default_table_lookup() {
        let definition = CounterDefinition::new();

        let cycles = definition.lookup("cycles").unwrap();
        assert_eq!(cycles.ty(), b::PERF_TYPE_HARDWARE);
        assert_eq!(cycles.event_id(), b::PERF_COUNT_HW_CPU_CYCLES as u64);

        // Aliases resolve to the same config
        assert_eq!(definition.lookup("cpu-cycles").unwrap(), cycles);

        let loads = definition.lookup("L1-dcache-load-misses").unwrap();
        assert_eq!(loads.ty(), b::PERF_TYPE_HW_CACHE);
        assert_eq!(
            loads.event_id(),
            b::PERF_COUNT_HW_CACHE_L1D as u64
                | (b::PERF_COUNT_HW_CACHE_OP_READ as u64) << 8
                | (b::PERF_COUNT_HW_CACHE_RESULT_MISS as u64) << 16
        );
    }

    #[test]
    fn test_unknown_name_is_reported() {
        let definition = CounterDefinition::new();
        match definition.lookup("__not_a_real_counter__") {
            Err(Error::UnknownCounterName(name)) => {
                assert_eq!(name, "__not_a_real_counter__")
            }
            other => panic!("expected UnknownCounterName, got {:?}", other),
        }
    }

    #[test]
    fn test_overlay_adds_and_overrides() {
        let mut definition = CounterDefinition::new();
        let overlay = "\
# machine-specific events
custom_event,4,331

cycles,4,0x3c
";
        definition.load_overlay(Cursor::new(overlay)).unwrap();

        let custom = definition.lookup("custom_event").unwrap();
        assert_eq!(custom.ty(), 4);
        assert_eq!(custom.event_id(), 331);

        // Overlay rows replace defaults with the same name
        let cycles = definition.lookup("cycles").unwrap();
        assert_eq!(cycles.ty(), 4);
        assert_eq!(cycles.event_id(), 0x3c);
    }

    #[test]
    fn test_overlay_extensions() {
        let mut definition = CounterDefinition::new();
        definition
            .load_overlay(Cursor::new("wide_event,4,0x01b7,0x12,0x34\n"))
            .unwrap();
        let config = definition.lookup("wide_event").unwrap();
        assert_eq!(config.event_id_extension(), [0x12, 0x34]);
    }

    #[rstest]
    #[case("just_a_name")]
    #[case("missing_id,4")]
    #[case("bad_type,not_a_number,331")]
    #[case("bad_id,4,zzz")]
    #[case("too_many,4,331,0,0,0")]
    #[case(",4,331")]
    fn test_malformed_row_fails_whole_load(#[case] row: &str) {
        let mut definition = CounterDefinition::new();
        let overlay = format!("good_event,4,330\n{row}\n");
        match definition.load_overlay(Cursor::new(overlay)) {
            Err(Error::MalformedDefinition { line, row: bad }) => {
                assert_eq!(line, 2);
                assert_eq!(bad, row);
            }
            other => panic!("expected MalformedDefinition, got {:?}", other.err()),
        }
        // No partial merge: the good row was not applied either
        assert!(definition.lookup("good_event").is_err());
    }

    #[test]
    fn test_metric_lookup() {
        let definition = CounterDefinition::new();
        let ipc = definition.lookup_metric("instructions-per-cycle").unwrap();
        assert_eq!(ipc.numerator, "instructions");
        assert_eq!(ipc.denominator, "cycles");
        assert!(definition.lookup_metric("cycles").is_none());
    }

    #[test]
    fn test_fresh_instances_do_not_share_overlay_state() {
        let mut first = CounterDefinition::new();
        first
            .load_overlay(Cursor::new("custom_event,4,331\n"))
            .unwrap();

        // The overlay went into the instance, not the shared defaults.
        let second = CounterDefinition::new();
        assert!(second.lookup("custom_event").is_err());
    }
}
