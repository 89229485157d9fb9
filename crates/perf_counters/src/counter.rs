use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use log::debug;
use perf_event_open_sys as sys;

use crate::config::CounterConfig;
use crate::Error;

/// One read of an open counter.
///
/// Matches the kernel `read_format` layout for
/// `PERF_FORMAT_TOTAL_TIME_ENABLED | PERF_FORMAT_TOTAL_TIME_RUNNING |
/// PERF_FORMAT_ID`:
///
/// ```text
/// struct read_format {
///     u64 value;
///     u64 time_enabled;
///     u64 time_running;
///     u64 id;
/// };
/// ```
///
/// `time_enabled` and `time_running` diverge when the kernel time-slices
/// more counters onto the hardware than there are physical slots; their
/// ratio is what multiplexing correction scales the raw value by.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterReading {
    /// Raw event count
    pub value: u64,
    /// Nanoseconds the counter was scheduled to run
    pub time_enabled: u64,
    /// Nanoseconds the counter actually ran
    pub time_running: u64,
    /// Kernel-assigned counter id
    pub id: u64,
}

/// A runtime instance of one hardware counter.
///
/// Holds the kernel attribute block derived from its [`CounterConfig`],
/// the kernel-assigned id (valid once open), and the open file descriptor.
/// The descriptor is a scarce resource: it is held as an [`OwnedFd`] so
/// every exit path, including drop, releases it.
pub struct Counter {
    name: String,
    config: CounterConfig,
    attr: sys::bindings::perf_event_attr,
    id: u64,
    fd: Option<OwnedFd>,
}

impl Counter {
    /// Creates a closed counter for the given config.
    pub fn new(name: impl Into<String>, config: CounterConfig) -> Self {
        let mut attr = sys::bindings::perf_event_attr::default();
        attr.size = mem::size_of::<sys::bindings::perf_event_attr>() as u32;
        attr.type_ = config.ty();
        attr.config = config.event_id();
        attr.__bindgen_anon_3.config1 = config.event_id_extension()[0];
        attr.__bindgen_anon_4.config2 = config.event_id_extension()[1];
        attr.read_format = (sys::bindings::PERF_FORMAT_TOTAL_TIME_ENABLED
            | sys::bindings::PERF_FORMAT_TOTAL_TIME_RUNNING
            | sys::bindings::PERF_FORMAT_ID) as u64;
        attr.set_precise_ip(config.precise_ip() as u64);

        Self {
            name: name.into(),
            config,
            attr,
            id: 0,
            fd: None,
        }
    }

    /// The name this counter was requested under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The config this counter was built from.
    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// The kernel-assigned counter id, valid only while open.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the counter currently holds an open descriptor.
    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// The raw descriptor, or `-1` when closed.
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_ref().map_or(-1, |fd| fd.as_raw_fd())
    }

    /// Whether this counter is auxiliary (scale bookkeeping only).
    pub fn is_auxiliary(&self) -> bool {
        self.config.is_auxiliary()
    }

    /// Opens the counter, counting the calling process on any CPU.
    ///
    /// With `group_fd = None` the counter is opened as a group leader and
    /// starts disabled, waiting for a group-wide enable. With
    /// `Some(leader_fd)` it attaches to an existing leader and follows the
    /// leader's enable state. On failure the counter stays closed.
    pub(crate) fn open(&mut self, group_fd: Option<RawFd>) -> Result<(), Error> {
        if self.fd.is_some() {
            return Ok(());
        }

        // Only the leader carries the disabled bit; followers inherit the
        // group's enable state from the leader.
        self.attr.set_disabled(group_fd.is_none() as u64);

        let fd = unsafe {
            sys::perf_event_open(
                &mut self.attr,
                0,  // pid: calling process
                -1, // cpu: any
                group_fd.unwrap_or(-1),
                sys::bindings::PERF_FLAG_FD_CLOEXEC as u64,
            )
        };
        if fd < 0 {
            let source = io::Error::last_os_error();
            return Err(match source.raw_os_error() {
                Some(libc::EACCES) | Some(libc::EPERM) => Error::PermissionDenied {
                    name: self.name.clone(),
                    source,
                },
                _ => Error::CounterOpenFailed {
                    name: self.name.clone(),
                    source,
                },
            });
        }
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };

        let mut id = 0u64;
        if unsafe { sys::ioctls::ID(fd, &mut id) } < 0 {
            // `owned` drops here and closes the descriptor.
            return Err(Error::CounterOpenFailed {
                name: self.name.clone(),
                source: io::Error::last_os_error(),
            });
        }

        debug!("opened counter {} (id {}, fd {})", self.name, id, fd);
        self.id = id;
        self.fd = Some(owned);
        Ok(())
    }

    /// Reads the raw count and scheduling times accumulated since the
    /// counter was last reset.
    pub fn read(&self) -> Result<CounterReading, Error> {
        let fd = self.fd.as_ref().ok_or_else(|| Error::CounterReadFailed {
            name: self.name.clone(),
            source: io::Error::from_raw_os_error(libc::EBADF),
        })?;

        let mut reading = CounterReading::default();
        let size = mem::size_of::<CounterReading>();
        let n = unsafe {
            libc::read(
                fd.as_raw_fd(),
                &mut reading as *mut CounterReading as *mut libc::c_void,
                size,
            )
        };
        if n != size as isize {
            let source = if n < 0 {
                io::Error::last_os_error()
            } else {
                io::Error::new(io::ErrorKind::UnexpectedEof, "short counter read")
            };
            return Err(Error::CounterReadFailed {
                name: self.name.clone(),
                source,
            });
        }

        Ok(reading)
    }

    /// Releases the descriptor. Safe to call repeatedly; closing a closed
    /// counter is a no-op.
    pub fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            debug!("closing counter {} (fd {})", self.name, fd.as_raw_fd());
            self.id = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_counter_is_closed() {
        let counter = Counter::new("cycles", CounterConfig::new(0, 0));
        assert!(!counter.is_open());
        assert_eq!(counter.raw_fd(), -1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut counter = Counter::new("cycles", CounterConfig::new(0, 0));
        counter.close();
        counter.close();
        assert!(!counter.is_open());
    }

    #[test]
    fn test_read_on_closed_counter_fails() {
        let counter = Counter::new("cycles", CounterConfig::new(0, 0));
        match counter.read() {
            Err(Error::CounterReadFailed { name, .. }) => assert_eq!(name, "cycles"),
            other => panic!("expected CounterReadFailed, got {:?}", other.map(|_| ())),
        }
    }
}
