// src/recorder.rs
//! Raw sentence recording to `.nmea` track files

use crate::error::{GnssError, Result};
use crate::link::NmeaListener;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info};

struct TrackFile {
    writer: BufWriter<File>,
    lines: u64,
}

/// Writes every accepted sentence, terminated by `\r\n`, to one track file.
pub struct NmeaRecorder {
    path: PathBuf,
    file: Mutex<Option<TrackFile>>,
}

impl NmeaRecorder {
    /// Create `<dir>/<prefix>_YYYY-MM-DD_HH-MM-SS.nmea` and start recording.
    pub fn start(dir: &Path, prefix: &str) -> Result<Self> {
        Self::start_at(dir, prefix, Utc::now())
    }

    pub fn start_at(dir: &Path, prefix: &str, started: DateTime<Utc>) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            GnssError::Other(format!("Failed to create track directory {}: {}", dir.display(), e))
        })?;
        let path = dir.join(track_file_name(prefix, started));
        let file = File::create(&path).map_err(|e| {
            GnssError::Other(format!("Failed to create track file {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "Recording NMEA track");
        Ok(Self {
            path,
            file: Mutex::new(Some(TrackFile {
                writer: BufWriter::new(file),
                lines: 0,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_recording(&self) -> bool {
        self.lock().is_some()
    }

    pub fn lines_written(&self) -> u64 {
        self.lock().as_ref().map_or(0, |file| file.lines)
    }

    /// Flush and close the file. Later sentences are ignored.
    pub fn finish(&self) -> Result<u64> {
        let Some(mut file) = self.lock().take() else {
            return Ok(0);
        };
        file.writer.flush()?;
        info!(path = %self.path.display(), lines = file.lines, "Track file closed");
        Ok(file.lines)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TrackFile>> {
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NmeaListener for NmeaRecorder {
    fn on_nmea_received(&self, _timestamp: i64, sentence: &str) {
        let mut guard = self.lock();
        let Some(file) = guard.as_mut() else {
            return;
        };
        let written = file
            .writer
            .write_all(sentence.as_bytes())
            .and_then(|_| file.writer.write_all(b"\r\n"));
        match written {
            Ok(()) => file.lines += 1,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Error writing track file, recording stopped");
                *guard = None;
            }
        }
    }
}

impl Drop for NmeaRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!(error = %e, "Error closing track file");
        }
    }
}

pub fn track_file_name(prefix: &str, started: DateTime<Utc>) -> String {
    format!("{}_{}.nmea", prefix, started.format("%Y-%m-%d_%H-%M-%S"))
}
