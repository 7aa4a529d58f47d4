//! # Ingestion Pipeline
//!
//! decode → track → persist → dispatch, one line at a time.
//!
//! The pipeline does not know whether its lines come from the serial link
//! or the dummy generator. Exactly one ingestion task feeds it per session,
//! so records are accounted, persisted and dispatched in arrival order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::{Dispatcher, Event};
use crate::error::Result;
use crate::persistence::PersistenceSink;
use crate::telemetry::{DecodeResult, FrameDecoder, SequenceStats, SequenceTracker};

/// What happened to one ingested line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// Blank line, nothing done
    Skipped,
    /// Telemetry frame; stats after accounting for it
    Telemetry(SequenceStats),
    /// Non-telemetry line, echoed only
    Raw,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared ingestion pipeline
pub struct Pipeline {
    decoder: Mutex<FrameDecoder>,
    tracker: Mutex<SequenceTracker>,
    sink: Mutex<PersistenceSink>,
    dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("decoder", &*lock(&self.decoder))
            .field("stats", &self.stats())
            .field("subscribers", &self.dispatcher.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build the pipeline and prepare the logs folder
    ///
    /// # Errors
    ///
    /// Returns `GroundError::Persistence` if the logs folder cannot be
    /// created.
    pub fn new(config: &Config, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        Ok(Self::with_sink(
            FrameDecoder::new(config.filter_character()),
            PersistenceSink::new(config)?,
            dispatcher,
        ))
    }

    pub fn with_sink(decoder: FrameDecoder, sink: PersistenceSink, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            decoder: Mutex::new(decoder),
            tracker: Mutex::new(SequenceTracker::new()),
            sink: Mutex::new(sink),
            dispatcher,
        }
    }

    /// Process one received line to completion
    ///
    /// Persistence failures are logged, noted in the raw archive and
    /// reported as a status event; they never stop ingestion.
    pub fn ingest_line(&self, line: &str) -> Ingested {
        let Some(decoded) = lock(&self.decoder).decode(line) else {
            return Ingested::Skipped;
        };
        let text = line.trim();

        let archived = lock(&self.sink).write_raw(text);
        if let Err(e) = archived {
            self.report_fault(&e.to_string());
        }

        match decoded {
            DecodeResult::Telemetry(record) => {
                let stats = lock(&self.tracker).observe_opt(record.packet_count());

                let written = lock(&self.sink).write_record(&record);
                if let Err(e) = written {
                    self.report_fault(&e.to_string());
                }

                self.dispatcher.publish(&Event::Telemetry(Arc::new(record)));
                self.dispatcher.publish(&Event::Raw(text.to_string()));
                Ingested::Telemetry(stats)
            }
            DecodeResult::NotTelemetry(raw) => {
                debug!("Non-telemetry line: {}", raw);
                self.dispatcher.publish(&Event::Raw(raw));
                Ingested::Raw
            }
        }
    }

    /// Apply a reloaded configuration
    ///
    /// Counters are kept. Must not be called during a session: the sink is
    /// rebuilt for the new logs folder.
    pub fn reconfigure(&self, config: &Config) -> Result<()> {
        let sink = PersistenceSink::new(config)?;
        *lock(&self.sink) = sink;
        *lock(&self.decoder) = FrameDecoder::new(config.filter_character());
        Ok(())
    }

    /// Log a fault, note it in the raw archive and publish it as status
    pub fn report_fault(&self, message: &str) {
        warn!("{}", message);
        lock(&self.sink).write_exception(message);
        self.dispatcher.publish(&Event::Status(message.to_string()));
    }

    /// Log and publish a status line
    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.dispatcher.publish(&Event::Status(message));
    }

    pub fn publish(&self, event: &Event) -> usize {
        self.dispatcher.publish(event)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Snapshot of the loss accounting
    pub fn stats(&self) -> SequenceStats {
        lock(&self.tracker).stats()
    }

    /// Baseline for the dummy generator
    pub fn last_packet_count(&self) -> Option<i64> {
        lock(&self.tracker).last_packet_count()
    }

    /// Operator "clear all"
    ///
    /// Counters go back to zero, the raw archive restarts and the structured
    /// log gets a marker row.
    pub fn clear_runtime(&self) -> Result<()> {
        lock(&self.tracker).clear();
        lock(&self.sink).clear_runtime()
    }

    /// Recording toggle; takes effect between two record writes
    pub fn set_recording(&self, enabled: bool) -> Result<()> {
        lock(&self.sink).set_recording(enabled)
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.sink).is_recording()
    }

    pub fn begin_session(&self, description: &str) -> Result<()> {
        lock(&self.sink).begin_session(description)
    }

    pub fn end_session(&self) {
        lock(&self.sink).end_session()
    }

    pub fn session_active(&self) -> bool {
        lock(&self.sink).session_active()
    }

    pub fn csv_path(&self) -> std::path::PathBuf {
        lock(&self.sink).csv_path().to_path_buf()
    }

    pub fn raw_path(&self) -> std::path::PathBuf {
        lock(&self.sink).raw_path().to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::CLEAR_MARKER;
    use tempfile::TempDir;

    const LINE: &str = "1043,12:00:00,1,F,LAUNCH_PAD,0.0,15.0,101.3,12.3,0,0,0,0,0,0,0,0,0,0,12:00:00,10.0,42.84280,-2.66810,7,CXON";

    fn line_with_packet(packet: &str) -> String {
        LINE.replacen(",1,F,", &format!(",{},F,", packet), 1)
    }

    fn setup() -> (TempDir, Pipeline, Arc<Mutex<Vec<Event>>>) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.application.logs_folder = dir.path().to_string_lossy().to_string();

        let dispatcher = Arc::new(Dispatcher::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        dispatcher.subscribe_fn("recorder", move |event: &Event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });

        let pipeline = Pipeline::new(&config, dispatcher).unwrap();
        (dir, pipeline, events)
    }

    fn csv_rows(pipeline: &Pipeline) -> Vec<csv::StringRecord> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(pipeline.csv_path())
            .map(|mut r| r.records().map(|row| row.unwrap()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_telemetry_line_flows_through() {
        let (_dir, pipeline, events) = setup();
        pipeline.begin_session("test").unwrap();

        let result = pipeline.ingest_line(LINE);
        assert_eq!(
            result,
            Ingested::Telemetry(SequenceStats {
                received: 1,
                lost: 0,
                last_packet_count: Some(1)
            })
        );

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            Event::Telemetry(record) => assert_eq!(record.altitude(), "0.0"),
            other => panic!("Expected telemetry first, got {:?}", other),
        }
        assert_eq!(events[1], Event::Raw(LINE.to_string()));

        let rows = csv_rows(&pipeline);
        assert_eq!(rows.len(), 2); // header + record
        assert_eq!(&rows[0][5], "ALTITUDE");
        assert_eq!(&rows[1][5], "0.0");
    }

    #[test]
    fn test_non_telemetry_is_echoed_only() {
        let (_dir, pipeline, events) = setup();
        pipeline.begin_session("test").unwrap();

        assert_eq!(pipeline.ingest_line("  BOOT OK  "), Ingested::Raw);
        assert_eq!(pipeline.stats(), SequenceStats::default());
        assert_eq!(*events.lock().unwrap(), vec![Event::Raw("BOOT OK".to_string())]);

        let raw = std::fs::read_to_string(pipeline.raw_path()).unwrap();
        assert!(raw.contains("]: BOOT OK"));
    }

    #[test]
    fn test_blank_line_skipped() {
        let (_dir, pipeline, events) = setup();
        pipeline.begin_session("test").unwrap();
        assert_eq!(pipeline.ingest_line("   \r"), Ingested::Skipped);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bad_packet_count_leaves_stats_but_still_dispatches() {
        let (_dir, pipeline, events) = setup();
        pipeline.begin_session("test").unwrap();
        pipeline.ingest_line(LINE);
        pipeline.ingest_line(&line_with_packet("abc"));

        assert_eq!(pipeline.stats().received, 1);
        assert_eq!(events.lock().unwrap().len(), 4);
        assert_eq!(csv_rows(&pipeline).len(), 3);
    }

    #[test]
    fn test_loss_accounting_in_order() {
        let (_dir, pipeline, _events) = setup();
        for packet in ["5", "6", "6", "9", "3"] {
            pipeline.ingest_line(&line_with_packet(packet));
        }
        let stats = pipeline.stats();
        assert_eq!((stats.received, stats.lost), (5, 2));
        assert_eq!(pipeline.last_packet_count(), Some(3));
    }

    #[test]
    fn test_recording_toggle_mid_session() {
        let (_dir, pipeline, _events) = setup();
        pipeline.begin_session("test").unwrap();

        pipeline.ingest_line(&line_with_packet("1"));
        pipeline.set_recording(false).unwrap();
        pipeline.ingest_line(&line_with_packet("2"));
        pipeline.set_recording(true).unwrap();
        pipeline.ingest_line(&line_with_packet("3"));

        let packets: Vec<String> = csv_rows(&pipeline)
            .iter()
            .skip(1)
            .map(|row| row[2].to_string())
            .collect();
        assert_eq!(packets, vec!["1", "3"]);
        assert_eq!(pipeline.stats().received, 3);
    }

    #[test]
    fn test_clear_runtime() {
        let (_dir, pipeline, _events) = setup();
        pipeline.begin_session("test").unwrap();
        pipeline.ingest_line(&line_with_packet("7"));

        pipeline.clear_runtime().unwrap();
        assert_eq!(pipeline.stats(), SequenceStats::default());

        let rows = csv_rows(&pipeline);
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[2][0], CLEAR_MARKER);

        let raw = std::fs::read_to_string(pipeline.raw_path()).unwrap();
        assert!(!raw.contains("LAUNCH_PAD"));
    }

    #[test]
    fn test_failing_subscriber_does_not_stop_ingestion() {
        let (_dir, pipeline, events) = setup();
        pipeline
            .dispatcher()
            .subscribe_fn("broken", |_event: &Event| anyhow::bail!("display gone"));

        pipeline.ingest_line(&line_with_packet("1"));
        pipeline.ingest_line(&line_with_packet("2"));
        assert_eq!(pipeline.stats().received, 2);
        assert_eq!(events.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_reconfigure_keeps_counters() {
        let (_dir, pipeline, _events) = setup();
        pipeline.ingest_line(&line_with_packet("4"));

        let other = TempDir::new().unwrap();
        let mut config = Config::default();
        config.application.logs_folder = other.path().to_string_lossy().to_string();
        config.telemetry.csv.filename_pattern = "Run_${TEAM_ID}.csv".to_string();
        pipeline.reconfigure(&config).unwrap();

        assert_eq!(pipeline.last_packet_count(), Some(4));
        assert!(pipeline.csv_path().starts_with(other.path()));
        assert!(pipeline.csv_path().ends_with("Run_1043.csv"));
    }

    #[test]
    fn test_filter_character_stripped() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.application.logs_folder = dir.path().to_string_lossy().to_string();
        config.connection.filter_character = "$".to_string();
        let pipeline = Pipeline::new(&config, Arc::new(Dispatcher::new())).unwrap();

        assert!(matches!(
            pipeline.ingest_line(&format!("${}", LINE)),
            Ingested::Telemetry(_)
        ));
    }
}
