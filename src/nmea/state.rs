// src/nmea/state.rs
//! Cross-sentence sequencing
//!
//! Receivers interleave GGA, RMC, GLL, GSA, GSV and VTG in their own order.
//! `NmeaState` tracks one update cycle so the parser publishes at most one
//! coherent fix per cycle and prefers GGA over RMC over GLL.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleMode {
    #[default]
    Start,
    Receive,
    Complete,
}

#[derive(Debug, Clone, Default)]
pub struct NmeaState {
    timestamp: i64,
    fixed: bool,
    mode: CycleMode,
    notified: bool,
    seen_gga: bool,
    seen_rmc: bool,
    seen_gll: bool,
}

impl NmeaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn mode(&self) -> CycleMode {
        self.mode
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn can_notify(&self) -> bool {
        self.mode == CycleMode::Complete && !self.notified
    }

    pub fn can_fix_notify(&self) -> bool {
        self.fixed && self.can_notify()
    }

    pub fn notified(&mut self) {
        self.notified = true;
    }

    /// RMC is authoritative only on cycles without a GGA.
    pub fn should_use_rmc(&self) -> bool {
        !self.seen_gga
    }

    /// GLL is authoritative only when neither GGA nor RMC has been seen.
    pub fn should_use_gll(&self) -> bool {
        !self.seen_gga && !self.seen_rmc
    }

    /// Returns true when this GGA opens a new cycle, after a VTG or after
    /// the previous cycle completed.
    pub fn recv_gga(&mut self, fixed: bool, time: i64) -> bool {
        let opens = self.mode != CycleMode::Receive;
        if opens {
            self.clear_seen();
        }
        self.fixed = fixed;
        self.timestamp = time;
        self.mode = CycleMode::Receive;
        self.notified = false;
        self.seen_gga = true;
        opens
    }

    /// Returns false when the RMC time disagrees with the cycle, which
    /// resets the cycle. On a cycle without GGA the RMC opens it itself.
    pub fn recv_rmc(&mut self, fixed: bool, time: i64) -> bool {
        if !self.seen_gga {
            if self.mode == CycleMode::Start {
                self.clear_seen();
            }
            self.fixed = fixed;
            self.timestamp = time;
            self.mode = CycleMode::Receive;
            self.notified = false;
        }
        self.seen_rmc = true;
        if self.mode == CycleMode::Start || self.timestamp != time {
            self.mode = CycleMode::Start;
            return false;
        }
        self.mode = CycleMode::Complete;
        true
    }

    /// End of an update burst.
    pub fn recv_vtg(&mut self) {
        self.mode = CycleMode::Start;
        self.clear_seen();
    }

    pub fn recv_gll(&mut self, time: i64) -> bool {
        self.seen_gll = true;
        self.timestamp == time && self.mode == CycleMode::Receive
    }

    pub fn recv_gns(&mut self, time: i64) -> bool {
        self.timestamp == time && self.mode == CycleMode::Receive
    }

    pub fn recv_gsa(&self) -> bool {
        self.mode == CycleMode::Receive
    }

    pub fn recv_gsv(&self) -> bool {
        self.mode == CycleMode::Receive
    }

    pub fn seen_gll(&self) -> bool {
        self.seen_gll
    }

    fn clear_seen(&mut self) {
        self.seen_gga = false;
        self.seen_rmc = false;
        self.seen_gll = false;
    }
}
