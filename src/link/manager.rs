// src/link/manager.rs
//! Link manager: connection lifecycle, read loop and listener fan-out

use super::dispatch::{self, Job, Writer};
use super::listener::{DisableReason, GnssEvent, ListenerSet, NmeaListener, StatusListener};
use super::sink::{LocationSink, ProviderStatus};
use super::transport::Transport;
use crate::config::LinkTiming;
use crate::error::{GnssError, Result};
use crate::host::HostContext;
use crate::nmea::{codec, NmeaParser};
use crate::sirf::{self, SirfCommand, SirfSettings};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Longest accepted line; NMEA allows 82 characters.
const MAX_LINE_LENGTH: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disabled,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LinkState::Disabled => "disabled",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Reconnecting => "reconnecting",
        };
        f.write_str(text)
    }
}

/// Owns the connection to one receiver.
///
/// `enable` starts a supervisor task that connects after an initial delay,
/// runs a read loop while connected and retries on failure until the retry
/// budget is spent. Listener delivery and outbound writes go through the
/// dispatch queue.
pub struct LinkManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for LinkManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: Transport> {
    transport: T,
    address: String,
    timing: LinkTiming,
    max_retries: u32,
    parser: Arc<Mutex<NmeaParser>>,
    sink: Arc<dyn LocationSink>,
    host: Arc<HostContext>,
    nmea_listeners: ListenerSet<dyn NmeaListener>,
    status_listeners: ListenerSet<dyn StatusListener>,
    enabled: AtomicBool,
    retries: AtomicU32,
    state: RwLock<LinkState>,
    disable_reason: RwLock<Option<DisableReason>>,
    run: Mutex<Option<Arc<Run<T::Stream>>>>,
}

/// Resources of one enabled period, dropped on disable.
struct Run<S> {
    cancel: CancellationToken,
    jobs: mpsc::UnboundedSender<Job>,
    ready: watch::Sender<bool>,
    writer: Writer<WriteHalf<S>>,
}

impl<T: Transport> LinkManager<T> {
    pub fn new(
        transport: T,
        address: impl Into<String>,
        parser: Arc<Mutex<NmeaParser>>,
        sink: Arc<dyn LocationSink>,
        host: Arc<HostContext>,
        timing: LinkTiming,
        max_retries: u32,
    ) -> Self {
        let max_retries = max_retries.max(1);
        Self {
            inner: Arc::new(Inner {
                transport,
                address: address.into(),
                timing,
                max_retries,
                parser,
                sink,
                host,
                nmea_listeners: ListenerSet::new(),
                status_listeners: ListenerSet::new(),
                enabled: AtomicBool::new(false),
                retries: AtomicU32::new(max_retries),
                state: RwLock::new(LinkState::Disabled),
                disable_reason: RwLock::new(None),
                run: Mutex::new(None),
            }),
        }
    }

    /// Start connecting in the background. Must be called inside a tokio runtime.
    pub fn enable(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.is_enabled() {
            return Err(GnssError::AlreadyEnabled);
        }
        if !inner.transport.is_available() {
            inner.refuse(DisableReason::TransportUnavailable);
            return Err(GnssError::TransportUnavailable(
                "no transport adapter available".to_string(),
            ));
        }
        if !inner.transport.has_device(&inner.address) {
            inner.refuse(DisableReason::DeviceUnavailable);
            return Err(GnssError::Connection(format!(
                "Device {} not found",
                inner.address
            )));
        }
        if inner.enabled.swap(true, Ordering::SeqCst) {
            return Err(GnssError::AlreadyEnabled);
        }

        *write_lock(&inner.disable_reason) = None;
        inner.retries.store(inner.max_retries, Ordering::SeqCst);
        inner.set_state(LinkState::Connecting);
        lock(&inner.parser).reset(Utc::now().timestamp_millis());
        inner.host.mark_running();
        inner.host.acquire_keep_alive();

        let cancel = CancellationToken::new();
        let (ready, ready_rx) = watch::channel(false);
        let writer: Writer<WriteHalf<T::Stream>> = Arc::new(tokio::sync::Mutex::new(None));
        let jobs = dispatch::spawn(
            Arc::clone(&writer),
            ready_rx,
            cancel.clone(),
            inner.timing.write_poll,
        );
        let run = Arc::new(Run {
            cancel,
            jobs,
            ready,
            writer,
        });
        *lock(&inner.run) = Some(Arc::clone(&run));

        tokio::spawn(supervise(Arc::clone(inner), run));
        info!(address = %inner.address, "Link enabled");
        Ok(())
    }

    /// Stop the link. Safe to call from anywhere and more than once.
    pub fn disable(&self, reason: DisableReason) {
        self.inner.disable(reason);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    pub fn state(&self) -> LinkState {
        *read_lock(&self.inner.state)
    }

    pub fn disable_reason(&self) -> Option<DisableReason> {
        *read_lock(&self.inner.disable_reason)
    }

    pub fn remaining_retries(&self) -> u32 {
        self.inner.retries.load(Ordering::SeqCst)
    }

    pub fn max_retries(&self) -> u32 {
        self.inner.max_retries
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn add_nmea_listener(&self, listener: Arc<dyn NmeaListener>) -> bool {
        self.inner.nmea_listeners.add(listener)
    }

    pub fn remove_nmea_listener(&self, listener: &Arc<dyn NmeaListener>) -> bool {
        self.inner.nmea_listeners.remove(listener)
    }

    pub fn add_status_listener(&self, listener: Arc<dyn StatusListener>) -> bool {
        self.inner.status_listeners.add(listener)
    }

    pub fn remove_status_listener(&self, listener: &Arc<dyn StatusListener>) -> bool {
        self.inner.status_listeners.remove(listener)
    }

    /// Send an NMEA payload (without `$`, `*` and checksum).
    pub fn send_nmea_command(&self, payload: &str) -> Result<()> {
        self.send_packaged_nmea_command(&codec::format_command(payload))
    }

    /// Send a complete NMEA line, terminator included.
    pub fn send_packaged_nmea_command(&self, command: &str) -> Result<()> {
        debug!(command = command.trim_end(), "Sending NMEA sentence");
        self.inner
            .enqueue_write(command.as_bytes().to_vec(), command.trim_end().to_string())
    }

    /// Frame and send a SiRF binary payload given as hex.
    pub fn send_sirf_command(&self, payload_hex: &str) -> Result<()> {
        let frame = sirf::binary_frame(payload_hex)?;
        debug!(payload = payload_hex, "Sending SiRF command");
        self.inner.enqueue_write(frame, payload_hex.to_string())
    }

    /// Send raw bytes as they are.
    pub fn send_binary_command(&self, bytes: Vec<u8>) -> Result<()> {
        let label = bytes.iter().map(|b| format!("{:02X}", b)).collect::<String>();
        self.inner.enqueue_write(bytes, label)
    }

    /// Queue every command needed to apply `settings`.
    pub fn apply_sirf_settings(&self, settings: &SirfSettings) -> Result<()> {
        for command in settings.commands() {
            match command {
                SirfCommand::Nmea(payload) => self.send_nmea_command(&payload)?,
                SirfCommand::Binary(payload) => self.send_sirf_command(&payload)?,
            }
        }
        Ok(())
    }
}

impl<T: Transport> Inner<T> {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Whether `run` is still the live run. A run cancelled by `disable`
    /// stays inactive even after a later `enable`.
    fn is_active(&self, run: &Run<T::Stream>) -> bool {
        self.is_enabled() && !run.cancel.is_cancelled()
    }

    fn set_state(&self, state: LinkState) {
        let mut current = write_lock(&self.state);
        if *current != state {
            debug!(from = %*current, to = %state, "Link state");
            *current = state;
        }
    }

    /// Record why `enable` could not start.
    fn refuse(&self, reason: DisableReason) {
        warn!(address = %self.address, %reason, "Link not enabled");
        *write_lock(&self.disable_reason) = Some(reason);
        self.set_state(LinkState::Disabled);
    }

    fn enqueue_write(&self, bytes: Vec<u8>, label: String) -> Result<()> {
        if !self.is_enabled() {
            return Err(GnssError::Connection("Link is not enabled".to_string()));
        }
        let guard = lock(&self.run);
        let run = guard
            .as_ref()
            .ok_or_else(|| GnssError::Connection("Link is not enabled".to_string()))?;
        run.jobs
            .send(Job::Write { bytes, label })
            .map_err(|_| GnssError::Connection("Dispatch queue closed".to_string()))
    }

    fn deliver_status<F>(&self, run: &Run<T::Stream>, callback: F)
    where
        F: Fn(&dyn StatusListener) + Send + 'static,
    {
        let listeners = self.status_listeners.snapshot();
        if listeners.is_empty() {
            return;
        }
        let _ = run.jobs.send(Job::Deliver(Box::new(move || {
            for listener in &listeners {
                callback(listener.as_ref());
            }
        })));
    }

    fn deliver_sentence(&self, run: &Run<T::Stream>, timestamp: i64, sentence: String) {
        let listeners = self.nmea_listeners.snapshot();
        if listeners.is_empty() {
            return;
        }
        let _ = run.jobs.send(Job::Deliver(Box::new(move || {
            for listener in &listeners {
                listener.on_nmea_received(timestamp, &sentence);
            }
        })));
    }

    fn on_connected(&self, run: &Run<T::Stream>) {
        self.retries.store(self.max_retries, Ordering::SeqCst);
        self.set_state(LinkState::Connected);
        info!(address = %self.address, "Connected to receiver");
        self.deliver_status(run, |listener| listener.on_status_changed(GnssEvent::Started));
    }

    fn connection_failed(&self, run: &Run<T::Stream>) {
        let remaining = self.retries.load(Ordering::SeqCst).saturating_sub(1);
        self.retries.store(remaining, Ordering::SeqCst);
        if remaining > 0 {
            let attempt = self.max_retries - remaining;
            warn!(address = %self.address, attempt, remaining, "Connection problem");
            self.set_state(LinkState::Reconnecting);
            self.deliver_status(run, move |listener| {
                listener.on_connection_problem(attempt, remaining)
            });
        } else {
            error!(address = %self.address, "Too many connection problems");
            self.disable(DisableReason::TooManyConnectionProblems);
        }
    }

    /// Parse one line and fan out the results. Returns false when the link
    /// was disabled because the sink rejected an update.
    fn handle_line(&self, run: &Run<T::Stream>, line: &str) -> bool {
        let timestamp = Utc::now().timestamp_millis();
        let parsed = {
            let mut parser = lock(&self.parser);
            parser
                .parse_sentence(line)
                .map(|accepted| (accepted, parser.take_status_change()))
        };
        match parsed {
            Ok((accepted, change)) => {
                if let Some(sentence) = accepted {
                    self.deliver_sentence(run, timestamp, sentence);
                }
                if let Some(event) = change {
                    self.deliver_status(run, move |listener| listener.on_status_changed(event));
                }
                true
            }
            Err(e) => {
                error!(error = %e, "Location update refused");
                self.disable(DisableReason::LocationSinkRejected);
                false
            }
        }
    }

    fn disable(&self, reason: DisableReason) {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(address = %self.address, %reason, "Disabling link");
        *write_lock(&self.disable_reason) = Some(reason);
        self.set_state(LinkState::Disabled);
        self.host.release_keep_alive();

        let run = lock(&self.run).take();
        if let Some(run) = run {
            run.cancel.cancel();
            run.ready.send_replace(false);
            self.deliver_status(&run, move |listener| listener.on_disconnected(reason));
            let _ = run.jobs.send(Job::Shutdown);
        }

        if !self.sink.is_status(ProviderStatus::OutOfService) {
            self.sink
                .notify_status_changed(ProviderStatus::OutOfService, Utc::now().timestamp_millis());
        }
        self.nmea_listeners.clear();
        self.status_listeners.clear();
        self.host.request_shutdown();
    }
}

/// Connect, read, and retry until disabled or out of retries.
async fn supervise<T: Transport>(inner: Arc<Inner<T>>, run: Arc<Run<T::Stream>>) {
    if !sleep_unless_cancelled(&run.cancel, inner.timing.connect_delay).await {
        return;
    }

    while inner.is_active(&run) {
        debug!(address = %inner.address, "Opening connection");
        let opened = tokio::select! {
            _ = run.cancel.cancelled() => return,
            opened = inner.transport.open(&inner.address) => opened,
        };

        match opened {
            Ok(stream) => {
                inner.on_connected(&run);
                let (reader, writer) = tokio::io::split(stream);
                *run.writer.lock().await = Some(writer);

                let read_task = tokio::spawn(read_loop(Arc::clone(&inner), Arc::clone(&run), reader));
                if let Err(e) = read_task.await {
                    error!(error = %e, "Read task failed");
                }

                run.ready.send_replace(false);
                let writer = run.writer.lock().await.take();
                if let Some(mut writer) = writer {
                    if let Err(e) = writer.shutdown().await {
                        debug!(error = %e, "Error while closing connection");
                    }
                }
                if !inner.is_active(&run) {
                    return;
                }
                if !inner.sink.is_status(ProviderStatus::OutOfService) {
                    inner.sink.notify_status_changed(
                        ProviderStatus::OutOfService,
                        Utc::now().timestamp_millis(),
                    );
                }
                inner.connection_failed(&run);
            }
            Err(e) => {
                error!(address = %inner.address, error = %e, "Error while establishing connection");
                inner.connection_failed(&run);
            }
        }

        if !inner.is_active(&run) {
            return;
        }
        if !sleep_unless_cancelled(&run.cancel, inner.timing.retry_period).await {
            return;
        }
    }
}

/// Read lines until the stream ends, goes quiet, fails or the link is disabled.
async fn read_loop<T: Transport>(
    inner: Arc<Inner<T>>,
    run: Arc<Run<T::Stream>>,
    reader: ReadHalf<T::Stream>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(128);
    let mut discarding = false;
    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_LENGTH);
        let read = tokio::select! {
            _ = run.cancel.cancelled() => break,
            read = tokio::time::timeout(inner.timing.read_timeout, limited.read_until(b'\n', &mut buf)) => read,
        };
        match read {
            Err(_) => {
                warn!(
                    timeout_ms = inner.timing.read_timeout.as_millis() as u64,
                    "No data from receiver, closing connection"
                );
                break;
            }
            Ok(Ok(0)) => {
                info!("Connection closed by receiver");
                break;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Error while reading");
                break;
            }
            Ok(Ok(_)) => {}
        }

        let complete = buf.last() == Some(&b'\n');
        if discarding {
            discarding = !complete;
            continue;
        }
        if !complete && buf.len() as u64 >= MAX_LINE_LENGTH {
            warn!(limit = MAX_LINE_LENGTH, "Line too long, dropped");
            discarding = true;
            continue;
        }

        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }
        trace!(line, "Received");
        run.ready.send_if_modified(|ready| !std::mem::replace(ready, true));
        if !inner.handle_line(&run, line) {
            break;
        }
    }
}

/// Returns false when cancelled before `duration` elapsed.
async fn sleep_unless_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::sink::LoggingSink;
    use std::future::Future;

    #[derive(Clone, Default)]
    struct RefusingTransport {
        attempts: Arc<AtomicU32>,
        adapter_missing: bool,
    }

    impl Transport for RefusingTransport {
        type Stream = tokio::io::DuplexStream;

        fn is_available(&self) -> bool {
            !self.adapter_missing
        }

        fn has_device(&self, address: &str) -> bool {
            address != "missing"
        }

        fn open(&self, _address: &str) -> impl Future<Output = Result<Self::Stream>> + Send {
            let attempts = Arc::clone(&self.attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(GnssError::Connection("refused".to_string()))
            }
        }
    }

    #[derive(Default)]
    struct Events {
        problems: Mutex<Vec<(u32, u32)>>,
        disconnects: Mutex<Vec<DisableReason>>,
    }

    impl StatusListener for Events {
        fn on_status_changed(&self, _event: GnssEvent) {}

        fn on_connection_problem(&self, attempt: u32, remaining: u32) {
            self.problems.lock().unwrap().push((attempt, remaining));
        }

        fn on_disconnected(&self, reason: DisableReason) {
            self.disconnects.lock().unwrap().push(reason);
        }
    }

    fn timing() -> LinkTiming {
        LinkTiming {
            connect_delay: Duration::from_millis(100),
            retry_period: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            write_poll: Duration::from_millis(50),
        }
    }

    fn manager(transport: RefusingTransport, address: &str, retries: u32) -> (LinkManager<RefusingTransport>, Arc<HostContext>) {
        let sink: Arc<dyn LocationSink> = Arc::new(LoggingSink::new());
        let parser = Arc::new(Mutex::new(NmeaParser::new(5.1, Arc::clone(&sink))));
        let host = Arc::new(HostContext::new());
        let link = LinkManager::new(transport, address, parser, sink, Arc::clone(&host), timing(), retries);
        (link, host)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_to_disabled_once() {
        let transport = RefusingTransport::default();
        let attempts = Arc::clone(&transport.attempts);
        let (link, host) = manager(transport, "/dev/rfcomm0", 3);
        let events = Arc::new(Events::default());
        link.add_status_listener(events.clone());

        link.enable().unwrap();
        assert_eq!(link.state(), LinkState::Connecting);
        host.shutdown_token().cancelled().await;

        for _ in 0..10 {
            if !events.disconnects.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*events.problems.lock().unwrap(), vec![(1, 2), (2, 1)]);
        assert_eq!(
            *events.disconnects.lock().unwrap(),
            vec![DisableReason::TooManyConnectionProblems]
        );
        assert_eq!(link.state(), LinkState::Disabled);
        assert_eq!(link.remaining_retries(), 0);
        assert_eq!(link.disable_reason(), Some(DisableReason::TooManyConnectionProblems));
        assert!(!host.holds_keep_alive());

        // Already disabled: nothing more happens
        link.disable(DisableReason::UserRequested);
        assert_eq!(link.disable_reason(), Some(DisableReason::TooManyConnectionProblems));
    }

    #[tokio::test]
    async fn test_enable_twice_is_rejected() {
        let (link, _host) = manager(RefusingTransport::default(), "/dev/rfcomm0", 3);
        link.enable().unwrap();
        assert!(matches!(link.enable(), Err(GnssError::AlreadyEnabled)));
        link.disable(DisableReason::UserRequested);
        assert!(!link.is_enabled());
        assert_eq!(link.disable_reason(), Some(DisableReason::UserRequested));
    }

    #[tokio::test]
    async fn test_enable_preconditions() {
        let transport = RefusingTransport {
            adapter_missing: true,
            ..Default::default()
        };
        let (link, _host) = manager(transport, "/dev/rfcomm0", 3);
        assert!(matches!(link.enable(), Err(GnssError::TransportUnavailable(_))));
        assert_eq!(link.disable_reason(), Some(DisableReason::TransportUnavailable));

        let (link, _host) = manager(RefusingTransport::default(), "missing", 3);
        assert!(link.enable().is_err());
        assert_eq!(link.disable_reason(), Some(DisableReason::DeviceUnavailable));
        assert!(!link.is_enabled());
    }

    #[tokio::test]
    async fn test_send_requires_enabled_link() {
        let (link, _host) = manager(RefusingTransport::default(), "/dev/rfcomm0", 3);
        assert!(link.send_nmea_command("PSRF151,01").is_err());
        link.enable().unwrap();
        assert!(link.send_nmea_command("PSRF151,01").is_ok());
        assert!(link.send_sirf_command("8F0").is_err());
        link.disable(DisableReason::UserRequested);
        assert!(link.send_binary_command(vec![0xA0]).is_err());
    }
}
