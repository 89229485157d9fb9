/// Event id reserved for auxiliary counters. Auxiliary counters take part
/// in multiplexing-scale bookkeeping but are never reported to the user.
pub const AUXILIARY_EVENT_ID: u64 = 0x8203;

/// Immutable descriptor of one low-level hardware counter.
///
/// A config pairs a counter class (`PERF_TYPE_HARDWARE`,
/// `PERF_TYPE_SOFTWARE`, `PERF_TYPE_HW_CACHE`, `PERF_TYPE_RAW`, ...) with
/// an event id and up to two event id extensions for events that need
/// extra qualifiers. Everything except the precise-IP request is fixed at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterConfig {
    ty: u32,
    event_id: u64,
    event_id_extension: [u64; 2],
    precise_ip: u8,
}

impl CounterConfig {
    /// Creates a config for the given counter class and event id.
    pub fn new(ty: u32, event_id: u64) -> Self {
        Self {
            ty,
            event_id,
            event_id_extension: [0, 0],
            precise_ip: 0,
        }
    }

    /// Sets the two event id extensions (`config1` / `config2` in the
    /// kernel attribute block).
    pub fn with_extension(mut self, extension_1: u64, extension_2: u64) -> Self {
        self.event_id_extension = [extension_1, extension_2];
        self
    }

    /// Requests hardware-assisted precise instruction-pointer attribution.
    /// `0` leaves the precision unconstrained.
    pub fn set_precise_ip(&mut self, precise_ip: u8) {
        self.precise_ip = precise_ip;
    }

    /// The counter class.
    pub fn ty(&self) -> u32 {
        self.ty
    }

    /// The event id within the counter class.
    pub fn event_id(&self) -> u64 {
        self.event_id
    }

    /// The two event id extensions, `0` when unused.
    pub fn event_id_extension(&self) -> [u64; 2] {
        self.event_id_extension
    }

    /// The requested precise-IP level.
    pub fn precise_ip(&self) -> u8 {
        self.precise_ip
    }

    /// Whether this config describes an auxiliary counter.
    pub fn is_auxiliary(&self) -> bool {
        self.event_id == AUXILIARY_EVENT_ID
    }
}
