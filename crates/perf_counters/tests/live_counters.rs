//! Integration tests that open real perf counters.
//!
//! Opening counters needs a permissive `/proc/sys/kernel/perf_event_paranoid`
//! (or CAP_PERFMON); when the kernel refuses, the tests report the reason
//! and return instead of failing the suite.

use perf_counters::{CounterDefinition, Error, EventCounter};

/// Returns true when the error means perf is unavailable in this
/// environment rather than the library misbehaving.
fn perf_unavailable(err: &Error) -> bool {
    matches!(
        err,
        Error::PermissionDenied { .. } | Error::CounterOpenFailed { .. }
    )
}

/// Something for the counters to count.
fn workload() -> u64 {
    let mut acc = 0u64;
    for i in 0..200_000u64 {
        acc = acc.wrapping_mul(6364136223846793005).wrapping_add(i);
    }
    acc
}

#[test]
fn default_counters_measure_a_workload() {
    let definitions = CounterDefinition::new();
    let mut events = EventCounter::new(&definitions);
    events.add(["instructions", "cycles"]).unwrap();

    match events.start() {
        Ok(()) => {}
        Err(err) if perf_unavailable(&err) => {
            eprintln!("skipping live counter test: {err}");
            return;
        }
        Err(err) => panic!("start failed: {err}"),
    }

    let acc = workload();
    events.stop().unwrap();

    let result = events.result().unwrap();
    assert!(acc != 1, "workload optimized away");
    for name in ["instructions", "cycles"] {
        let value = result
            .get(name)
            .unwrap_or_else(|| panic!("{name} missing from result"));
        assert!(value >= 0.0, "{name} negative: {value}");
    }
    // The loop retires at least one instruction per iteration
    assert!(result.get("instructions").unwrap() > 0.0);
}

#[test]
fn counts_accumulate_across_start_stop_cycles() {
    let definitions = CounterDefinition::new();
    let mut events = EventCounter::new(&definitions);
    events.add(["instructions"]).unwrap();

    match events.start() {
        Ok(()) => {}
        Err(err) if perf_unavailable(&err) => {
            eprintln!("skipping live counter test: {err}");
            return;
        }
        Err(err) => panic!("start failed: {err}"),
    }
    workload();
    events.stop().unwrap();
    let first = events.result().unwrap().get("instructions").unwrap();

    // Second cycle on the same open descriptors: no reset in between, so
    // the counts keep growing.
    events.start().unwrap();
    workload();
    events.stop().unwrap();
    let second = events.result().unwrap().get("instructions").unwrap();

    assert!(
        second >= first,
        "counts went backward: {first} -> {second}"
    );
}

#[test]
fn failed_open_rolls_back_the_whole_group() {
    let mut definitions = CounterDefinition::new();
    // A raw event id no PMU implements
    definitions.add(
        "bogus_event",
        perf_counters::CounterConfig::new(4, 0xdead_beef_dead_beef),
    );

    let mut events = EventCounter::new(&definitions);
    events.add(["instructions", "bogus_event"]).unwrap();

    let err = match events.start() {
        Err(err) => err,
        Ok(()) => {
            // Some kernels accept unknown raw configs; nothing to verify.
            events.stop().unwrap();
            return;
        }
    };
    eprintln!("group open failed as expected: {err}");

    // Atomic group semantics: nothing is left open, and the group is
    // retryable after fixing the environment.
    assert!(matches!(events.stop(), Err(Error::NotStarted)));
}

#[test]
fn live_result_while_started() {
    let definitions = CounterDefinition::new();
    let mut events = EventCounter::new(&definitions);
    events.add(["instructions"]).unwrap();

    match events.start() {
        Ok(()) => {}
        Err(err) if perf_unavailable(&err) => {
            eprintln!("skipping live counter test: {err}");
            return;
        }
        Err(err) => panic!("start failed: {err}"),
    }
    workload();

    // Reading a running group is allowed at the caller's discretion.
    let live = events.result().unwrap();
    assert!(live.get("instructions").is_some());

    events.stop().unwrap();
}

#[test]
fn reset_zeroes_accumulated_counts() {
    let definitions = CounterDefinition::new();
    let mut events = EventCounter::new(&definitions);
    events.add(["instructions"]).unwrap();

    match events.start() {
        Ok(()) => {}
        Err(err) if perf_unavailable(&err) => {
            eprintln!("skipping live counter test: {err}");
            return;
        }
        Err(err) => panic!("start failed: {err}"),
    }
    workload();
    events.stop().unwrap();
    let before = events.result().unwrap().get("instructions").unwrap();
    assert!(before > 0.0);

    events.reset().unwrap();
    let after = events.result().unwrap().get("instructions").unwrap();
    assert!(
        after < before,
        "reset did not shrink the count: {before} -> {after}"
    );
}
