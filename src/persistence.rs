//! # Persistence Module
//!
//! Durable logs for everything the link delivers.
//!
//! Two independent files live under the configured logs folder:
//! - a structured CSV log (`Flight_<TEAM_ID>.csv` by default), appended
//!   across sessions, header written only when the file is created
//! - a raw archive (`BlackBox/flight_data.txt`) holding every received line
//!   with a local timestamp, recreated at the start of each session
//!
//! Write failures never stop ingestion: the failing file is dropped and the
//! error is returned so the caller can report it.

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{GroundError, Result};
use crate::telemetry::schema::{TelemetryRecord, FIELD_COUNT};

/// Raw archive filename inside the BlackBox folder
pub const RAW_ARCHIVE_FILENAME: &str = "flight_data.txt";

/// First column of the row written to the structured log on "clear runtime"
pub const CLEAR_MARKER: &str = "#RUNTIME_CLEARED";

fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Append-only CSV log with the fixed telemetry column layout
pub struct StructuredLog {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl std::fmt::Debug for StructuredLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StructuredLog {
    /// Open a CSV log
    ///
    /// The header is written only when the file did not exist before this
    /// call. With `append_if_exists = false` an existing file is truncated
    /// and treated as new.
    pub fn open(path: &Path, header: Option<&[&str]>, append_if_exists: bool) -> Result<Self> {
        let existed = path.exists() && append_if_exists;

        let mut options = OpenOptions::new();
        options.create(true);
        if append_if_exists {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }

        let file = options.open(path).map_err(|e| {
            GroundError::Persistence(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if let (false, Some(header)) = (existed, header) {
            writer.write_record(header)?;
            writer.flush()?;
            debug!("Wrote CSV header to {}", path.display());
        }

        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    /// Append one record in schema column order
    pub fn write_record(&mut self, record: &TelemetryRecord) -> Result<()> {
        self.writer.write_record(record.values())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Append the "clear runtime" sentinel row
    pub fn write_marker(&mut self) -> Result<()> {
        let mut row = vec![String::new(); FIELD_COUNT];
        row[0] = CLEAR_MARKER.to_string();
        row[1] = local_timestamp();
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Plain-text archive of every received line
pub struct RawArchive {
    writer: LineWriter<File>,
}

impl RawArchive {
    /// Create (or truncate) the archive and write the session banner
    pub fn create(path: &Path, description: &str) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            GroundError::Persistence(format!("Failed to create {}: {}", path.display(), e))
        })?;
        let mut archive = Self {
            writer: LineWriter::new(file),
        };
        writeln!(
            archive.writer,
            "[LATEST FLIGHT]: [{}] [CONNECTION: {}]",
            local_timestamp(),
            description
        )?;
        Ok(archive)
    }

    /// Append `[<timestamp>]: <line>`
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "[{}]: {}", local_timestamp(), line)?;
        Ok(())
    }

    /// Append `[EXCEPTION]: <message>`
    pub fn write_exception(&mut self, message: &str) -> Result<()> {
        writeln!(self.writer, "[EXCEPTION]: {}", message)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Owner of both log files
///
/// Not internally synchronized: the pipeline holds it behind a mutex so a
/// recording toggle always lands between two record writes.
pub struct PersistenceSink {
    csv_path: PathBuf,
    include_header: bool,
    raw_path: PathBuf,
    recording: bool,
    session: Option<String>,
    structured: Option<StructuredLog>,
    raw: Option<RawArchive>,
}

impl std::fmt::Debug for PersistenceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSink")
            .field("csv_path", &self.csv_path)
            .field("raw_path", &self.raw_path)
            .field("recording", &self.recording)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl PersistenceSink {
    /// Prepare the logs folder layout
    ///
    /// # Errors
    ///
    /// Returns error if the logs folder or its `BlackBox` subfolder cannot
    /// be created. This is the only startup-fatal persistence failure.
    pub fn new(config: &Config) -> Result<Self> {
        let black_box = config.black_box_dir();
        fs::create_dir_all(&black_box).map_err(|e| {
            GroundError::Persistence(format!(
                "Failed to create logs folder {}: {}",
                black_box.display(),
                e
            ))
        })?;

        Ok(Self {
            csv_path: config.csv_path(),
            include_header: config.telemetry.csv.include_header,
            raw_path: black_box.join(RAW_ARCHIVE_FILENAME),
            recording: config.telemetry.csv.enable,
            session: None,
            structured: None,
            raw: None,
        })
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn raw_path(&self) -> &Path {
        &self.raw_path
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn session_active(&self) -> bool {
        self.session.is_some()
    }

    /// Start a session: fresh raw archive, structured log opened if recording
    ///
    /// Both files are attempted; the first failure is returned after the
    /// other file has been tried.
    pub fn begin_session(&mut self, description: &str) -> Result<()> {
        self.end_session();
        self.session = Some(description.to_string());

        let raw = RawArchive::create(&self.raw_path, description).map(|raw| self.raw = Some(raw));
        let structured = if self.recording {
            self.open_structured()
        } else {
            Ok(())
        };

        info!("Persistence session started ({})", description);
        raw.and(structured)
    }

    /// Flush and close both files
    pub fn end_session(&mut self) {
        if let Some(mut structured) = self.structured.take() {
            if let Err(e) = structured.flush() {
                warn!("Failed to flush {}: {}", structured.path().display(), e);
            }
        }
        if let Some(mut raw) = self.raw.take() {
            if let Err(e) = raw.flush() {
                warn!("Failed to flush raw archive: {}", e);
            }
        }
        if self.session.take().is_some() {
            info!("Persistence session closed");
        }
    }

    fn open_structured(&mut self) -> Result<()> {
        if self.structured.is_some() {
            return Ok(());
        }
        let header: Vec<&str> = TelemetryRecord::header().collect();
        let header = self.include_header.then_some(header.as_slice());
        self.structured = Some(StructuredLog::open(&self.csv_path, header, true)?);
        Ok(())
    }

    /// Append a decoded record to the structured log
    ///
    /// No-op while recording is off or no session is active. On failure the
    /// structured log is dropped until the next toggle or session.
    pub fn write_record(&mut self, record: &TelemetryRecord) -> Result<()> {
        if !self.recording {
            return Ok(());
        }
        let Some(structured) = self.structured.as_mut() else {
            return Ok(());
        };
        if let Err(e) = structured.write_record(record) {
            self.structured = None;
            return Err(GroundError::Persistence(format!(
                "Structured log disabled after write failure: {}",
                e
            )));
        }
        Ok(())
    }

    /// Append a received line to the raw archive (recording toggle does not apply)
    pub fn write_raw(&mut self, line: &str) -> Result<()> {
        let Some(raw) = self.raw.as_mut() else {
            return Ok(());
        };
        if let Err(e) = raw.write_line(line) {
            self.raw = None;
            return Err(GroundError::Persistence(format!(
                "Raw archive disabled after write failure: {}",
                e
            )));
        }
        Ok(())
    }

    /// Note a pipeline fault in the raw archive
    pub fn write_exception(&mut self, message: &str) {
        if let Some(raw) = self.raw.as_mut() {
            if let Err(e) = raw.write_exception(message) {
                warn!("Failed to archive exception: {}", e);
            }
        }
    }

    /// Turn structured recording on or off
    ///
    /// Turning it on during a session opens the log (header only if new);
    /// turning it off flushes the log.
    pub fn set_recording(&mut self, enabled: bool) -> Result<()> {
        self.recording = enabled;
        if enabled {
            info!("Recording: ON ({})", self.csv_path.display());
            if self.session.is_some() {
                self.open_structured()?;
            }
        } else {
            info!("Recording: OFF");
            if let Some(structured) = self.structured.as_mut() {
                structured.flush()?;
            }
        }
        Ok(())
    }

    /// Operator "clear runtime"
    ///
    /// The raw archive is recreated (when a session is active) and the
    /// structured log keeps its history, receiving a sentinel row instead.
    pub fn clear_runtime(&mut self) -> Result<()> {
        if let Some(description) = self.session.clone() {
            if let Some(mut raw) = self.raw.take() {
                raw.flush()?;
            }
            self.raw = Some(RawArchive::create(&self.raw_path, &description)?);
        }

        if !self.recording {
            return Ok(());
        }
        match self.structured.as_mut() {
            Some(structured) => structured.write_marker()?,
            None => {
                let header: Vec<&str> = TelemetryRecord::header().collect();
                let header = self.include_header.then_some(header.as_slice());
                StructuredLog::open(&self.csv_path, header, true)?.write_marker()?;
            }
        }
        info!("Runtime cleared; marker written to {}", self.csv_path.display());
        Ok(())
    }
}

impl Drop for PersistenceSink {
    fn drop(&mut self) {
        self.end_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.application.logs_folder = dir.path().join("saves").to_string_lossy().to_string();
        config
    }

    fn record(packet: i64) -> TelemetryRecord {
        let mut values: Vec<String> = (0..FIELD_COUNT).map(|i| format!("{}", i)).collect();
        values[0] = "1043".to_string();
        values[2] = packet.to_string();
        TelemetryRecord::from_values(values).unwrap()
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_new_creates_folders() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let sink = PersistenceSink::new(&config).unwrap();
        assert!(config.black_box_dir().is_dir());
        assert!(sink.csv_path().ends_with("Flight_1043.csv"));
        assert!(!sink.session_active());
    }

    #[test]
    fn test_new_fails_on_unusable_folder() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let mut config = Config::default();
        config.application.logs_folder = blocker.to_string_lossy().to_string();
        assert!(matches!(
            PersistenceSink::new(&config),
            Err(GroundError::Persistence(_))
        ));
    }

    #[test]
    fn test_round_trip_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let mut sink = PersistenceSink::new(&test_config(&dir)).unwrap();
        sink.begin_session("test").unwrap();
        for packet in 1..=5 {
            sink.write_record(&record(packet)).unwrap();
        }
        sink.end_session();

        let rows = read_rows(sink.csv_path());
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], TelemetryRecord::header().collect::<Vec<_>>());
        for (i, row) in rows[1..].iter().enumerate() {
            assert_eq!(row.len(), FIELD_COUNT);
            assert_eq!(row[2], (i + 1).to_string());
        }
    }

    #[test]
    fn test_header_written_once_across_sessions() {
        let dir = TempDir::new().unwrap();
        let mut sink = PersistenceSink::new(&test_config(&dir)).unwrap();

        sink.begin_session("first").unwrap();
        sink.write_record(&record(1)).unwrap();
        sink.end_session();

        sink.begin_session("second").unwrap();
        sink.write_record(&record(2)).unwrap();
        sink.end_session();

        let rows = read_rows(sink.csv_path());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|r| r[0] == "TEAM_ID").count(), 1);
    }

    #[test]
    fn test_header_disabled() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.telemetry.csv.include_header = false;
        let mut sink = PersistenceSink::new(&config).unwrap();
        sink.begin_session("test").unwrap();
        sink.write_record(&record(1)).unwrap();
        sink.end_session();

        let rows = read_rows(sink.csv_path());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "1043");
    }

    #[test]
    fn test_recording_off_skips_rows_keeps_raw() {
        let dir = TempDir::new().unwrap();
        let mut sink = PersistenceSink::new(&test_config(&dir)).unwrap();
        sink.begin_session("test").unwrap();

        sink.write_record(&record(1)).unwrap();
        sink.set_recording(false).unwrap();
        sink.write_raw("raw-2").unwrap();
        sink.write_record(&record(2)).unwrap();
        sink.set_recording(true).unwrap();
        sink.write_record(&record(3)).unwrap();
        sink.end_session();

        let rows = read_rows(sink.csv_path());
        let packets: Vec<_> = rows[1..].iter().map(|r| r[2].clone()).collect();
        assert_eq!(packets, vec!["1", "3"]);

        let raw = std::fs::read_to_string(sink.raw_path()).unwrap();
        assert!(raw.contains("]: raw-2"));
    }

    #[test]
    fn test_recording_enabled_mid_session_opens_log() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.telemetry.csv.enable = false;
        let mut sink = PersistenceSink::new(&config).unwrap();
        sink.begin_session("test").unwrap();
        sink.write_record(&record(1)).unwrap();
        assert!(!sink.csv_path().exists());

        sink.set_recording(true).unwrap();
        sink.write_record(&record(2)).unwrap();
        sink.end_session();

        let rows = read_rows(sink.csv_path());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][2], "2");
    }

    #[test]
    fn test_raw_archive_recreated_per_session() {
        let dir = TempDir::new().unwrap();
        let mut sink = PersistenceSink::new(&test_config(&dir)).unwrap();

        sink.begin_session("first").unwrap();
        sink.write_raw("old line").unwrap();
        sink.end_session();

        sink.begin_session("second").unwrap();
        sink.write_raw("new line").unwrap();
        sink.end_session();

        let raw = std::fs::read_to_string(sink.raw_path()).unwrap();
        assert!(raw.starts_with("[LATEST FLIGHT]: ["));
        assert!(raw.contains("[CONNECTION: second]"));
        assert!(!raw.contains("old line"));
        assert!(raw.contains("]: new line"));
    }

    #[test]
    fn test_raw_without_session_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut sink = PersistenceSink::new(&test_config(&dir)).unwrap();
        sink.write_raw("nothing").unwrap();
        sink.write_record(&record(1)).unwrap();
        assert!(!sink.raw_path().exists());
        assert!(!sink.csv_path().exists());
    }

    #[test]
    fn test_clear_runtime_keeps_structured_history() {
        let dir = TempDir::new().unwrap();
        let mut sink = PersistenceSink::new(&test_config(&dir)).unwrap();
        sink.begin_session("test").unwrap();
        sink.write_raw("before").unwrap();
        sink.write_record(&record(1)).unwrap();

        sink.clear_runtime().unwrap();
        sink.write_raw("after").unwrap();
        sink.write_record(&record(2)).unwrap();
        sink.end_session();

        let rows = read_rows(sink.csv_path());
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1][2], "1");
        assert_eq!(rows[2][0], CLEAR_MARKER);
        assert_eq!(rows[2].len(), FIELD_COUNT);
        assert_eq!(rows[3][2], "2");

        let raw = std::fs::read_to_string(sink.raw_path()).unwrap();
        assert!(!raw.contains("before"));
        assert!(raw.contains("after"));
    }

    #[test]
    fn test_clear_runtime_without_session_appends_marker() {
        let dir = TempDir::new().unwrap();
        let mut sink = PersistenceSink::new(&test_config(&dir)).unwrap();
        sink.clear_runtime().unwrap();
        let rows = read_rows(sink.csv_path());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], CLEAR_MARKER);
    }

    #[test]
    fn test_exception_written_to_raw_archive() {
        let dir = TempDir::new().unwrap();
        let mut sink = PersistenceSink::new(&test_config(&dir)).unwrap();
        sink.begin_session("test").unwrap();
        sink.write_exception("boom");
        sink.end_session();
        let raw = std::fs::read_to_string(sink.raw_path()).unwrap();
        assert!(raw.contains("[EXCEPTION]: boom"));
    }

    #[test]
    fn test_structured_log_truncate_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "stale\n").unwrap();
        let mut log = StructuredLog::open(&path, Some(&["A", "B"]), false).unwrap();
        log.flush().unwrap();
        drop(log);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A,B\n");
    }
}
