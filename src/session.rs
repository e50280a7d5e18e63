//! Session log lifecycle.
//!
//! A session is one CSV file, open for exactly as long as the logging switch
//! stays on. Numbers are allocated by probing the log directory, so a number
//! that exists on disk is never reused.

use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::Config;
use crate::error::{DaqError, DaqResult};
use crate::sensors::{CoreReadings, ExtendedReadings, Quantity};

pub const TIME_HEADER: &str = "Time (us)";
const ACCEL_HEADERS: [&str; 3] = ["Accelerometer X", "Accelerometer Y", "Accelerometer Z"];

/// Column names for a session; the wide schema is a superset of the narrow one
pub fn header(extended: bool) -> Vec<&'static str> {
    let mut columns = vec![TIME_HEADER];
    columns.extend(ACCEL_HEADERS);
    columns.extend(Quantity::CORE.iter().map(|q| q.header()));
    if extended {
        columns.extend(Quantity::EXTENDED.iter().map(|q| q.header()));
    }
    columns
}

/// File naming for session logs: `<dir>/<prefix>NNNN.<ext>`
#[derive(Debug, Clone)]
pub struct SessionPaths {
    dir: PathBuf,
    prefix: String,
    extension: String,
    max_number: u16,
}

impl SessionPaths {
    pub fn new(dir: impl Into<PathBuf>, max_number: u16) -> Self {
        Self {
            dir: dir.into(),
            prefix: "RECORD_".to_string(),
            extension: "csv".to_string(),
            max_number,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            dir: config.log_dir.clone(),
            prefix: config.file_prefix.clone(),
            extension: config.file_extension.clone(),
            max_number: config.max_file_number,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, number: u16) -> PathBuf {
        self.dir
            .join(format!("{}{:04}.{}", self.prefix, number, self.extension))
    }

    /// Lowest number with no file on disk, or None when 0..=max are all taken
    pub fn next_free(&self) -> Option<(u16, PathBuf)> {
        (0..=self.max_number)
            .map(|n| (n, self.path(n)))
            .find(|(_, path)| !path.exists())
    }
}

/// One open log file
pub struct Session {
    number: u16,
    extended: bool,
    path: PathBuf,
    started: Instant,
    started_at: DateTime<Utc>,
    writer: BufWriter<File>,
    rows: u64,
}

impl Session {
    fn create(number: u16, path: PathBuf, extended: bool) -> DaqResult<Self> {
        Self::create_with(number, path, extended, |path| {
            OpenOptions::new().write(true).create_new(true).open(path)
        })
    }

    fn create_with<F>(number: u16, path: PathBuf, extended: bool, open: F) -> DaqResult<Self>
    where
        F: FnOnce(&Path) -> io::Result<File>,
    {
        let file = open(&path).map_err(|source| DaqError::SessionCreate {
            path: path.clone(),
            source,
        })?;

        let mut writer = BufWriter::new(file);
        let header_written = writeln!(writer, "{}", header(extended).join(","))
            .and_then(|()| writer.flush());
        if let Err(source) = header_written {
            // The file is ours and holds nothing; free the number again
            drop(writer);
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("[SESSION] could not remove {}: {}", path.display(), e);
            }
            return Err(DaqError::SessionCreate { path, source });
        }

        Ok(Self {
            number,
            extended,
            path,
            started: Instant::now(),
            started_at: Utc::now(),
            writer,
            rows: 0,
        })
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    /// Schema choice, frozen at open
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Append one record. Extended columns are written only for extended
    /// sessions; missing extended readings are logged as NaN.
    pub fn write_row(
        &mut self,
        core: &CoreReadings,
        extended: Option<&ExtendedReadings>,
    ) -> io::Result<()> {
        let elapsed_us = self.started.elapsed().as_micros();
        write!(self.writer, "{}", elapsed_us)?;
        for value in core.columns() {
            write!(self.writer, ",{}", value)?;
        }
        if self.extended {
            let extended = extended.copied().unwrap_or_else(ExtendedReadings::invalid);
            for value in extended.0 {
                write!(self.writer, ",{}", value)?;
            }
        }
        writeln!(self.writer)?;
        // Power can drop at any moment
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Point the writer at a device that rejects every write
    #[cfg(test)]
    pub(crate) fn break_writer(&mut self) {
        let full = OpenOptions::new()
            .write(true)
            .open("/dev/full")
            .expect("open /dev/full");
        self.writer = BufWriter::new(full);
    }

    fn finish(mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

/// Transition performed by `SessionManager::maybe_open_or_close`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Opened { number: u16, extended: bool },
    Closed { number: u16, rows: u64 },
    /// Logging requested but every file number is in use
    Exhausted,
}

/// Owns the (at most one) active session
pub struct SessionManager {
    paths: SessionPaths,
    active: Option<Session>,
    exhaustion_reported: bool,
    /// Set when a write ended the session; cleared once logging is switched off
    write_failed: bool,
}

impl SessionManager {
    pub fn new(paths: SessionPaths) -> Self {
        Self {
            paths,
            active: None,
            exhaustion_reported: false,
            write_failed: false,
        }
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut Session> {
        self.active.as_mut()
    }

    /// Bring the session state in line with the logging switch.
    ///
    /// `extended_present` is only consulted when a session is opened. A file
    /// creation failure is returned as an error and leaves no session behind.
    /// After `fail_active` no session opens until logging is switched off.
    pub fn maybe_open_or_close(
        &mut self,
        logging_enabled: bool,
        extended_present: bool,
    ) -> DaqResult<Option<SessionEvent>> {
        match (logging_enabled, self.active.is_some()) {
            (true, false) if self.write_failed => Ok(None),
            (true, false) => self.open(extended_present),
            (false, active) => {
                self.exhaustion_reported = false;
                self.write_failed = false;
                Ok(if active { self.close() } else { None })
            }
            (true, true) => Ok(None),
        }
    }

    fn open(&mut self, extended: bool) -> DaqResult<Option<SessionEvent>> {
        let Some((number, path)) = self.paths.next_free() else {
            if self.exhaustion_reported {
                return Ok(None);
            }
            self.exhaustion_reported = true;
            log::error!(
                "[SESSION] {}; logging disabled until a number frees up",
                DaqError::FileNumbersExhausted {
                    max: self.paths.max_number
                }
            );
            return Ok(Some(SessionEvent::Exhausted));
        };

        let session = Session::create(number, path, extended)?;
        log::info!(
            "[SESSION] opened {} ({} schema, started {})",
            session.path().display(),
            if extended { "extended" } else { "narrow" },
            session.started_at().to_rfc3339()
        );
        self.active = Some(session);
        Ok(Some(SessionEvent::Opened { number, extended }))
    }

    /// Flush and close the active session, if any
    pub fn close(&mut self) -> Option<SessionEvent> {
        let session = self.active.take()?;
        let (number, rows, path) = (session.number(), session.rows(), session.path().to_path_buf());
        match session.finish() {
            Ok(()) => log::info!("[SESSION] closed {} after {} rows", path.display(), rows),
            Err(e) => log::error!("[SESSION] error closing {}: {}", path.display(), e),
        }
        Some(SessionEvent::Closed { number, rows })
    }

    /// End the active session after a write error. Logging stays off for the
    /// rest of the current logging interval.
    pub fn fail_active(&mut self) -> Option<SessionEvent> {
        let event = self.close()?;
        self.write_failed = true;
        Some(event)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close();
    }
}
