// src/nmea/parser.rs
//! NMEA sentence parsing into the session aggregate

use super::codec;
use super::sentence::{Frame, Gga, Gll, Gns, Gsa, Gsv, Rmc, Sentence, Talker};
use super::state::NmeaState;
use crate::error::{GnssError, Result};
use crate::gnss::{resolve, GnssStatus, Satellite};
use crate::link::listener::GnssEvent;
use crate::link::sink::{LocationSink, ProviderStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingChange {
    None,
    Fixed,
    Notify,
}

/// Turns raw receiver lines into aggregate updates, fixes and status changes.
pub struct NmeaParser {
    status: GnssStatus,
    state: NmeaState,
    sink: Arc<dyn LocationSink>,
    strict_checksum: bool,
    pending: PendingChange,
    fix_notified: bool,
}

impl NmeaParser {
    pub fn new(precision: f32, sink: Arc<dyn LocationSink>) -> Self {
        Self {
            status: GnssStatus::new(precision),
            state: NmeaState::new(),
            sink,
            strict_checksum: false,
            pending: PendingChange::None,
            fix_notified: false,
        }
    }

    /// Reject sentences whose checksum does not match instead of only logging them.
    pub fn with_strict_checksum(mut self, strict: bool) -> Self {
        self.strict_checksum = strict;
        self
    }

    pub fn status(&self) -> &GnssStatus {
        &self.status
    }

    pub fn state(&self) -> &NmeaState {
        &self.state
    }

    /// Forget everything learned so far; `now_ms` anchors time to first fix.
    pub fn reset(&mut self, now_ms: i64) {
        self.status.start(now_ms);
        self.state = NmeaState::new();
        self.pending = PendingChange::None;
        self.fix_notified = false;
    }

    pub fn parse_sentence(&mut self, line: &str) -> Result<Option<String>> {
        self.parse_sentence_at(line, Utc::now())
    }

    /// Parse one line, resolving sentence times against `now`.
    ///
    /// Returns the accepted sentence (without its line terminator), or `None`
    /// when the line is not a well-formed sentence. Field errors abandon the
    /// sentence but it is still returned; the only error is a sink rejection.
    pub fn parse_sentence_at(&mut self, line: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let line = format!("{}\r\n", line.trim_end_matches(['\r', '\n']));
        let Some(frame) = Frame::parse(&line) else {
            debug!(line = %line.trim_end(), "Mismatched data");
            return Ok(None);
        };

        trace!(
            sentence = frame.body,
            checksum = ?frame.checksum,
            control = %codec::format_checksum(frame.computed_checksum()),
            "data"
        );
        if let Err(e) = frame.verify_checksum() {
            if self.strict_checksum {
                warn!(sentence = frame.sentence, error = %e, "Rejected sentence");
                return Ok(None);
            }
            warn!(sentence = frame.sentence, error = %e, "Accepted sentence despite checksum");
        }

        let accepted = frame.sentence.to_string();
        match Sentence::decode(&frame, now) {
            Ok(sentence) => self.apply(sentence, &accepted)?,
            Err(e) => debug!(sentence = %accepted, error = %e, "Abandoned sentence"),
        }
        Ok(Some(accepted))
    }

    /// The status change caused by the lines parsed since the last call, if any.
    pub fn take_status_change(&mut self) -> Option<GnssEvent> {
        self.state.notified();
        match self.pending {
            PendingChange::Notify => {
                self.pending = PendingChange::None;
                Some(GnssEvent::SatelliteStatus)
            }
            PendingChange::Fixed if !self.fix_notified => {
                self.pending = PendingChange::None;
                self.fix_notified = true;
                Some(GnssEvent::FirstFix)
            }
            _ => None,
        }
    }

    fn apply(&mut self, sentence: Sentence, text: &str) -> Result<()> {
        match sentence {
            Sentence::Gga(gga) => self.apply_gga(gga)?,
            Sentence::Rmc(rmc) => self.apply_rmc(rmc)?,
            Sentence::Gsa(talker, gsa) => self.apply_gsa(talker, gsa),
            Sentence::Gsv(talker, gsv) => self.apply_gsv(talker, gsv),
            Sentence::Gll(gll) => self.apply_gll(gll),
            Sentence::Gns(gns) => self.apply_gns(gns),
            Sentence::Vtg => {
                self.state.recv_vtg();
                self.status.tracked_mut().begin_cycle();
                self.pending = PendingChange::Notify;
            }
            Sentence::Grs => info!(sentence = text, "Range residuals message"),
            Sentence::Llq => info!(sentence = text, "Leica local position and quality message"),
            Sentence::Unknown(command) => debug!(%command, sentence = text, "Unknown NMEA data"),
        }
        Ok(())
    }

    fn apply_gga(&mut self, gga: Gga) -> Result<()> {
        if gga.quality == 0 {
            self.status.set_timestamp(gga.time);
            self.status.quality = 0;
            self.begin_gga_cycle(false, gga.time);
            self.mark_unavailable(gga.time);
            return Ok(());
        }

        self.begin_gga_cycle(true, gga.time);
        let status = &mut self.status;
        status.set_fix_timestamp(gga.time);
        status.quality = gga.quality;
        if let Some(latitude) = gga.latitude {
            status.latitude = latitude;
        }
        if let Some(longitude) = gga.longitude {
            status.longitude = longitude;
        }
        if let Some(satellites) = gga.satellites {
            status.num_used_in_fix = satellites;
        }
        status.hdop = gga.hdop;
        status.altitude = gga.altitude;
        status.geoid_height = gga.geoid_height;

        self.mark_available(gga.time);
        self.publish_fix()
    }

    /// Every GGA starts a new cycle for the tracked list, with or without a
    /// VTG closing the previous one.
    fn begin_gga_cycle(&mut self, fixed: bool, time: i64) {
        if !self.state.recv_gga(fixed, time) {
            trace!(time, "GGA within an open cycle");
        }
        self.status.tracked_mut().begin_cycle();
    }

    fn apply_rmc(&mut self, rmc: Rmc) -> Result<()> {
        let Some(active) = rmc.active else {
            debug!("RMC without a status flag");
            return Ok(());
        };
        let authoritative = self.state.should_use_rmc();
        if !self.state.recv_rmc(active, rmc.time) {
            debug!(
                rmc_time = rmc.time,
                cycle_time = self.state.timestamp(),
                "RMC out of sync with GGA, discarded"
            );
            return Ok(());
        }

        if !active {
            if authoritative {
                self.status.set_timestamp(rmc.time);
                self.mark_unavailable(rmc.time);
            }
            self.pending = PendingChange::Notify;
            return Ok(());
        }

        let status = &mut self.status;
        if rmc.speed.is_some() {
            status.speed = rmc.speed;
        }
        if rmc.bearing.is_some() {
            status.bearing = rmc.bearing;
        }
        if rmc.mode.is_some() {
            status.mode = rmc.mode;
        }
        if !authoritative {
            return Ok(());
        }

        status.set_fix_timestamp(rmc.time);
        if let Some(latitude) = rmc.latitude {
            status.latitude = latitude;
        }
        if let Some(longitude) = rmc.longitude {
            status.longitude = longitude;
        }
        self.mark_available(rmc.time);
        self.publish_fix()
    }

    fn apply_gsa(&mut self, talker: Talker, gsa: Gsa) {
        self.status.fix_mode = gsa.fix_type;
        self.status.selection_mode = gsa.selection_mode;
        if gsa.fix_type > 1 {
            let tracked = self.status.tracked_mut();
            if talker == Talker::GP {
                tracked.replace(&gsa.prns);
            } else {
                tracked.append(&gsa.prns);
            }
            if gsa.pdop.is_some() {
                self.status.pdop = gsa.pdop;
            }
            if gsa.hdop.is_some() {
                self.status.hdop = gsa.hdop;
            }
            if gsa.vdop.is_some() {
                self.status.vdop = gsa.vdop;
            }
        }
        if !self.state.recv_gsa() {
            trace!(%talker, "GSA outside of an update cycle");
        }
    }

    fn apply_gsv(&mut self, talker: Talker, gsv: Gsv) {
        if gsv.is_first() {
            self.status.satellites_mut().begin_burst(talker);
            if talker == Talker::GP {
                self.status.num_in_view = gsv.in_view;
            } else {
                self.status.num_in_view += gsv.in_view;
            }
        }

        let table = self.status.satellites_mut();
        for record in &gsv.records {
            let satellite = Satellite::new(resolve(talker, record.prn)).with_status(
                record.elevation,
                record.azimuth,
                record.snr,
            );
            table.upsert(talker, satellite);
        }

        if gsv.is_last() {
            let evicted = table.evict_unseen(talker);
            trace!(%talker, evicted, in_view = table.len(), "GSV burst complete");
        }
        if !self.state.recv_gsv() {
            trace!(%talker, "GSV outside of an update cycle");
        }
    }

    fn apply_gll(&mut self, gll: Gll) {
        let authoritative = self.state.should_use_gll();
        if !self.state.recv_gll(gll.time) {
            trace!(time = gll.time, "GLL does not match the current cycle");
        }
        if !authoritative || gll.active != Some(true) {
            return;
        }
        self.status.set_timestamp(gll.time);
        if let Some(latitude) = gll.latitude {
            self.status.latitude = latitude;
        }
        if let Some(longitude) = gll.longitude {
            self.status.longitude = longitude;
        }
    }

    fn apply_gns(&mut self, gns: Gns) {
        let authoritative = self.state.should_use_gll();
        if !self.state.recv_gns(gns.time) {
            trace!(time = gns.time, "GNS does not match the current cycle");
        }
        if !authoritative {
            return;
        }
        self.status.set_timestamp(gns.time);
        if let Some(latitude) = gns.latitude {
            self.status.latitude = latitude;
        }
        if let Some(longitude) = gns.longitude {
            self.status.longitude = longitude;
        }
        if let Some(satellites) = gns.satellites {
            self.status.num_used_in_fix = satellites;
        }
    }

    fn mark_available(&mut self, timestamp: i64) {
        if !self.sink.is_status(ProviderStatus::Available) {
            self.sink
                .notify_status_changed(ProviderStatus::Available, timestamp);
            if !self.fix_notified {
                self.pending = PendingChange::Fixed;
            }
        }
    }

    fn mark_unavailable(&self, timestamp: i64) {
        if !self.sink.is_status(ProviderStatus::TemporarilyUnavailable) {
            self.sink
                .notify_status_changed(ProviderStatus::TemporarilyUnavailable, timestamp);
        }
    }

    fn publish_fix(&self) -> Result<()> {
        let fix = self.status.synthesize_fix();
        if !fix.is_publishable() {
            error!(
                accuracy = ?fix.accuracy,
                altitude = ?fix.altitude,
                "Fix lacks accuracy or altitude, not notified"
            );
            return Ok(());
        }
        match self.sink.notify_fix(&fix) {
            Err(e @ GnssError::SinkRejected(_)) => Err(e),
            Err(e) => {
                error!(error = %e, "Location sink failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}
