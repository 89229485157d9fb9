//! Group lifecycle orchestration.
//!
//! An [`EventCounter`] resolves requested names against a
//! [`CounterDefinition`], opens the resolved counters atomically as one
//! kernel group (first counter is the group leader, the rest attach to
//! it), starts and stops them in lockstep through group-wide ioctls on the
//! leader, and assembles a [`CounterResult`] with multiplexing correction
//! applied.

use std::io;
use std::os::fd::RawFd;

use log::{debug, warn};
use perf_event_open_sys as sys;

use crate::config::CounterConfig;
use crate::counter::Counter;
use crate::definition::{CounterDefinition, DerivedMetric};
use crate::result::CounterResult;
use crate::Error;

/// Upper bound on counters opened as one kernel group. Groups are
/// scheduled onto the PMU as a unit, so the cap has to stay within what
/// the kernel will still multiplex as a whole.
pub const MAX_GROUP_SIZE: usize = 16;

/// Lifecycle of a counter group.
///
/// `Started ⇄ Stopped` cycles repeat on the same open descriptors:
/// counts accumulate across cycles until an explicit [`EventCounter::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Configured,
    Started,
    Stopped,
}

/// One measurement context: a group of counters started and stopped in
/// lockstep around a workload.
///
/// The context is bound to the calling thread; it performs no internal
/// locking and is synchronous throughout. Dropping it closes every open
/// descriptor.
pub struct EventCounter<'a> {
    definitions: &'a CounterDefinition,
    counters: Vec<Counter>,
    metrics: Vec<DerivedMetric>,
    state: State,
}

impl<'a> EventCounter<'a> {
    /// Creates an empty measurement context over a registry.
    pub fn new(definitions: &'a CounterDefinition) -> Self {
        Self {
            definitions,
            counters: Vec::new(),
            metrics: Vec::new(),
            state: State::Created,
        }
    }

    /// Registers counters (and derived metrics) by name, in request order.
    ///
    /// Names are resolved one at a time; the first failure aborts the call
    /// but everything registered before it stays registered, so a caller
    /// may log the error and proceed with the reduced set. A metric name
    /// registers the metric and pulls in its input counters.
    pub fn add<I, S>(&mut self, names: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.add_name(name.as_ref())?;
        }
        Ok(())
    }

    fn add_name(&mut self, name: &str) -> Result<(), Error> {
        if self.state == State::Started {
            return Err(Error::AlreadyStarted);
        }

        match self.definitions.lookup(name) {
            Ok(config) => self.register_counter(name, config)?,
            Err(unknown) => match self.definitions.lookup_metric(name) {
                Some(metric) => {
                    // Metrics are ratios of collected values, so their
                    // inputs have to be in the group too.
                    for input in [&metric.numerator, &metric.denominator] {
                        let config = self.definitions.lookup(input)?;
                        self.register_counter(input, config)?;
                    }
                    if !self.metrics.iter().any(|m| m.name == metric.name) {
                        self.metrics.push(metric);
                    }
                }
                None => return Err(unknown),
            },
        }

        if self.state == State::Created && !self.counters.is_empty() {
            self.state = State::Configured;
        }
        Ok(())
    }

    fn register_counter(&mut self, name: &str, config: CounterConfig) -> Result<(), Error> {
        if self.counters.iter().any(|c| c.name() == name) {
            return Ok(());
        }
        if self.counters.len() >= MAX_GROUP_SIZE {
            return Err(Error::TooManyCounters {
                limit: MAX_GROUP_SIZE,
            });
        }
        self.counters.push(Counter::new(name, config));
        Ok(())
    }

    /// Names of the registered counters, in request order.
    pub fn counter_names(&self) -> Vec<&str> {
        self.counters.iter().map(|c| c.name()).collect()
    }

    /// Opens every registered-but-unopened counter as one group and
    /// enables counting.
    ///
    /// The open is all-or-nothing: if any member fails to open, everything
    /// already open is closed, the group returns to the configured state
    /// and the failure is reported. A stopped group restarts on its open
    /// descriptors and keeps accumulating.
    pub fn start(&mut self) -> Result<(), Error> {
        match self.state {
            State::Started => return Err(Error::AlreadyStarted),
            State::Created => return Err(Error::NoCountersConfigured),
            State::Configured | State::Stopped => {}
        }

        // Phase one: open everything, leader first. Phase two on failure:
        // unwind every open descriptor so no partially-open group is left
        // behind.
        let mut leader_fd: Option<RawFd> = self
            .counters
            .iter()
            .find(|c| c.is_open())
            .map(|c| c.raw_fd());
        for index in 0..self.counters.len() {
            if let Err(err) = self.counters[index].open(leader_fd) {
                warn!("unwinding counter group: {err}");
                self.close_all();
                return Err(err);
            }
            leader_fd.get_or_insert(self.counters[index].raw_fd());
        }

        let Some(leader_fd) = leader_fd else {
            return Err(Error::NoCountersConfigured);
        };
        if unsafe { sys::ioctls::ENABLE(leader_fd, sys::bindings::PERF_IOC_FLAG_GROUP) } < 0 {
            let source = io::Error::last_os_error();
            self.close_all();
            return Err(Error::GroupControlFailed {
                op: "enable",
                source,
            });
        }

        debug!("started counter group of {}", self.counters.len());
        self.state = State::Started;
        Ok(())
    }

    /// Disables counting for the whole group. Descriptors stay open so a
    /// subsequent [`start`](Self::start) resumes accumulation.
    pub fn stop(&mut self) -> Result<(), Error> {
        if self.state != State::Started {
            return Err(Error::NotStarted);
        }

        let leader_fd = self.leader_fd().ok_or(Error::NotStarted)?;
        if unsafe { sys::ioctls::DISABLE(leader_fd, sys::bindings::PERF_IOC_FLAG_GROUP) } < 0 {
            return Err(Error::GroupControlFailed {
                op: "disable",
                source: io::Error::last_os_error(),
            });
        }

        debug!("stopped counter group");
        self.state = State::Stopped;
        Ok(())
    }

    /// Zeroes every counter in the group.
    ///
    /// Counts otherwise accumulate across start/stop cycles; callers that
    /// want per-iteration deltas reset between cycles (or snapshot
    /// [`result`](Self::result) and subtract).
    pub fn reset(&mut self) -> Result<(), Error> {
        let leader_fd = self.leader_fd().ok_or(Error::NotStarted)?;
        if unsafe { sys::ioctls::RESET(leader_fd, sys::bindings::PERF_IOC_FLAG_GROUP) } < 0 {
            return Err(Error::GroupControlFailed {
                op: "reset",
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Reads every open counter and assembles the result.
    ///
    /// Valid from the stopped state, or from the started state for a live
    /// reading. Raw counts are corrected for multiplexing; counters that
    /// failed to open are omitted rather than reported as zero; auxiliary
    /// counters are read but not reported. Derived metrics follow the
    /// counters in registration order and are skipped when an input is
    /// missing or the denominator is zero.
    pub fn result(&self) -> Result<CounterResult, Error> {
        match self.state {
            State::Started | State::Stopped => {}
            State::Created | State::Configured => return Err(Error::NotStarted),
        }

        let mut entries: Vec<(String, f64)> =
            Vec::with_capacity(self.counters.len() + self.metrics.len());
        for counter in &self.counters {
            if !counter.is_open() {
                continue;
            }
            let reading = counter.read()?;
            let value = scaled_count(reading.value, reading.time_enabled, reading.time_running);
            if counter.is_auxiliary() {
                continue;
            }
            entries.push((counter.name().to_string(), value));
        }

        for metric in &self.metrics {
            let lookup = |name: &str| {
                entries
                    .iter()
                    .find(|(entry, _)| entry == name)
                    .map(|(_, value)| *value)
            };
            match (lookup(&metric.numerator), lookup(&metric.denominator)) {
                (Some(numerator), Some(denominator)) if denominator != 0.0 => {
                    entries.push((metric.name.clone(), numerator / denominator));
                }
                _ => debug!("skipping metric {}: inputs unavailable", metric.name),
            }
        }

        Ok(CounterResult::from(entries))
    }

    fn leader_fd(&self) -> Option<RawFd> {
        self.counters.iter().find(|c| c.is_open()).map(|c| c.raw_fd())
    }

    fn close_all(&mut self) {
        for counter in &mut self.counters {
            counter.close();
        }
        if self.state != State::Created {
            self.state = State::Configured;
        }
    }
}

/// Corrects a raw count for multiplexing.
///
/// When the kernel had to time-slice the counter (`time_running <
/// time_enabled`), the count is scaled by `time_enabled / time_running`.
/// A fully scheduled counter passes through exactly, with no floating
/// error introduced by the branch.
fn scaled_count(raw: u64, time_enabled: u64, time_running: u64) -> f64 {
    if time_running < time_enabled && time_running > 0 {
        raw as f64 * (time_enabled as f64 / time_running as f64)
    } else {
        raw as f64
    }
}
