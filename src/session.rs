// src/session.rs
//! Session: the hosting context that owns the link and everything around it

use crate::config::GnssConfig;
use crate::error::{GnssError, Result};
use crate::gnss::GnssStatus;
use crate::host::HostContext;
use crate::link::{
    DisableReason, LinkManager, LinkState, LocationSink, NmeaListener, SerialTransport,
    StatusListener, Transport,
};
use crate::nmea::NmeaParser;
use crate::recorder::NmeaRecorder;
use crate::sirf::SirfSettings;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Control surface for one receiver: start/stop the link, record raw
/// sentences, push receiver configuration and read the current status.
pub struct Session<T: Transport = SerialTransport> {
    config: GnssConfig,
    host: Arc<HostContext>,
    parser: Arc<Mutex<NmeaParser>>,
    sink: Arc<dyn LocationSink>,
    link: LinkManager<T>,
    recorder: Mutex<Option<Arc<NmeaRecorder>>>,
}

impl Session<SerialTransport> {
    /// Session over the configured serial/RFCOMM device.
    pub fn from_config(config: GnssConfig, sink: Arc<dyn LocationSink>) -> Result<Self> {
        config.validate()?;
        let device = config
            .device
            .clone()
            .ok_or_else(|| GnssError::Config("No device configured".to_string()))?;
        let transport = SerialTransport::new(config.baud_rate);
        Ok(Self::with_transport(transport, device, config, sink))
    }
}

impl<T: Transport> Session<T> {
    pub fn with_transport(
        transport: T,
        address: impl Into<String>,
        config: GnssConfig,
        sink: Arc<dyn LocationSink>,
    ) -> Self {
        let host = Arc::new(HostContext::new());
        let parser = Arc::new(Mutex::new(
            NmeaParser::new(config.precision, Arc::clone(&sink))
                .with_strict_checksum(config.strict_checksum),
        ));
        let link = LinkManager::new(
            transport,
            address,
            Arc::clone(&parser),
            Arc::clone(&sink),
            Arc::clone(&host),
            config.link_timing(),
            config.max_connection_retries,
        );
        Self {
            config,
            host,
            parser,
            sink,
            link,
            recorder: Mutex::new(None),
        }
    }

    /// Enable the link. Configured SiRF settings are queued and go out once
    /// the receiver is streaming.
    ///
    /// A recording that outlived an earlier disable (which clears the link's
    /// listeners) is attached again.
    pub fn start_link(&self) -> Result<()> {
        self.link.enable()?;
        if let Some(recorder) = self.lock_recorder().as_ref() {
            if self.link.add_nmea_listener(recorder.clone()) {
                debug!(path = %recorder.path().display(), "Recording resumed");
            }
        }
        if let Some(settings) = self.config.sirf {
            self.push_sirf_config(&settings)?;
        }
        Ok(())
    }

    pub fn stop_link(&self) {
        self.link.disable(DisableReason::UserRequested);
        if let Err(e) = self.end_recording() {
            warn!(error = %e, "Error closing track file");
        }
    }

    /// Start recording raw sentences; returns the track file path.
    pub fn begin_recording(&self) -> Result<PathBuf> {
        let mut recorder = self.lock_recorder();
        if let Some(active) = recorder.as_ref() {
            return Ok(active.path().to_path_buf());
        }
        let started = Arc::new(NmeaRecorder::start(
            &self.config.track_file_dir,
            &self.config.track_file_prefix,
        )?);
        self.link.add_nmea_listener(started.clone());
        let path = started.path().to_path_buf();
        *recorder = Some(started);
        Ok(path)
    }

    /// Stop recording; returns the track file and the number of sentences written.
    pub fn end_recording(&self) -> Result<Option<(PathBuf, u64)>> {
        let Some(recorder) = self.lock_recorder().take() else {
            return Ok(None);
        };
        let listener: Arc<dyn NmeaListener> = recorder.clone();
        self.link.remove_nmea_listener(&listener);
        let lines = recorder.finish()?;
        info!(path = %recorder.path().display(), lines, "Recording stopped");
        Ok(Some((recorder.path().to_path_buf(), lines)))
    }

    pub fn is_recording(&self) -> bool {
        self.lock_recorder().is_some()
    }

    pub fn push_sirf_config(&self, settings: &SirfSettings) -> Result<()> {
        self.link.apply_sirf_settings(settings)
    }

    pub fn status_snapshot(&self) -> GnssStatus {
        self.parser
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .status()
            .clone()
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn disable_reason(&self) -> Option<DisableReason> {
        self.link.disable_reason()
    }

    pub fn add_status_listener(&self, listener: Arc<dyn StatusListener>) -> bool {
        self.link.add_status_listener(listener)
    }

    pub fn add_nmea_listener(&self, listener: Arc<dyn NmeaListener>) -> bool {
        self.link.add_nmea_listener(listener)
    }

    /// Resolves once the link has asked the host to stop.
    pub fn shutdown_requested(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.host.shutdown_token();
        async move { token.cancelled().await }
    }

    pub fn host(&self) -> &Arc<HostContext> {
        &self.host
    }

    pub fn link(&self) -> &LinkManager<T> {
        &self.link
    }

    pub fn sink(&self) -> &Arc<dyn LocationSink> {
        &self.sink
    }

    pub fn config(&self) -> &GnssConfig {
        &self.config
    }

    fn lock_recorder(&self) -> std::sync::MutexGuard<'_, Option<Arc<NmeaRecorder>>> {
        self.recorder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
