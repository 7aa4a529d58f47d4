//! End-to-end tests through the public API: line in, event/CSV/stats out.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ddl_ground::config::Config;
use ddl_ground::dispatch::{ChannelSubscriber, Dispatcher, Event};
use ddl_ground::error::Result;
use ddl_ground::link::{ConnectionController, LinkState};
use ddl_ground::pipeline::{Ingested, Pipeline};
use ddl_ground::serial::{PortOpener, Transport};
use ddl_ground::telemetry::{Field, TelemetryRecord};
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, DuplexStream};

const LINE: &str = "1043,12:00:00,1,F,LAUNCH_PAD,0.0,15.0,101.3,12.3,0,0,0,0,0,0,0,0,0,0,12:00:00,10.0,42.84280,-2.66810,7,CXON";

fn frame(packet: i64) -> String {
    format!("{}\n", LINE.replacen(",1,F,", &format!(",{},F,", packet), 1))
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.application.logs_folder = dir.path().to_string_lossy().to_string();
    config.connection.alarm = false;
    config.connection.reconnect_interval_ms = 10;
    config.simulation.dummy_interval_s = 0.01;
    config
}

/// Opener handing the device side of each link to the test
struct DuplexOpener {
    devices: Mutex<Vec<DuplexStream>>,
}

impl PortOpener for DuplexOpener {
    fn open(&self, port: &str, baud: u32) -> Result<Transport> {
        let (device, host) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(host);
        self.devices.lock().unwrap().push(device);
        Ok(Transport {
            reader: Box::new(reader),
            writer: Box::new(writer),
            description: format!("{} @ {} (duplex)", port, baud),
        })
    }
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(3), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {}", what);
}

#[test]
fn test_single_frame_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let dispatcher = Arc::new(Dispatcher::new());
    let (display, mut rx) = ChannelSubscriber::new("display", 8);
    dispatcher.subscribe(Arc::new(display));

    let pipeline = Pipeline::new(&config, dispatcher).unwrap();
    assert!(pipeline.is_recording());
    pipeline.begin_session("end-to-end").unwrap();

    let result = pipeline.ingest_line(LINE);
    let Ingested::Telemetry(stats) = result else {
        panic!("expected telemetry, got {:?}", result);
    };
    assert_eq!((stats.received, stats.lost), (1, 0));

    let mut telemetry = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Event::Telemetry(record) = event {
            telemetry.push(record);
        }
    }
    assert_eq!(telemetry.len(), 1);
    assert_eq!(telemetry[0].get(Field::CmdEcho), "CXON");

    pipeline.end_session();

    let mut reader = csv::Reader::from_path(config.csv_path()).unwrap();
    let header: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
    assert_eq!(header, TelemetryRecord::header().collect::<Vec<_>>());

    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 1);
    let altitude = header.iter().position(|h| h == "ALTITUDE").unwrap();
    assert_eq!(&rows[0][altitude], "0.0");

    let raw = std::fs::read_to_string(config.black_box_dir().join("flight_data.txt")).unwrap();
    assert!(raw.starts_with("[LATEST FLIGHT]:"));
    assert!(raw.contains(LINE));
}

#[test]
fn test_reopened_log_appends_without_second_header() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    for packet in [1, 2] {
        let pipeline = Pipeline::new(&config, Arc::new(Dispatcher::new())).unwrap();
        pipeline.begin_session("run").unwrap();
        pipeline.ingest_line(frame(packet).trim_end());
        pipeline.end_session();
    }

    let mut reader = csv::Reader::from_path(config.csv_path()).unwrap();
    let packets: Vec<String> = reader
        .records()
        .map(|r| r.unwrap()[2].to_string())
        .collect();
    assert_eq!(packets, vec!["1", "2"]);
}

#[tokio::test]
async fn test_live_to_dummy_to_live_keeps_sequence() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(test_config(&dir));

    let dispatcher = Arc::new(Dispatcher::new());
    let pipeline = Arc::new(Pipeline::new(&config, dispatcher).unwrap());
    let opener = Arc::new(DuplexOpener {
        devices: Mutex::new(Vec::new()),
    });
    let controller = ConnectionController::new(
        Arc::clone(&config),
        Arc::clone(&opener) as Arc<dyn PortOpener>,
        Arc::clone(&pipeline),
    );

    // Live
    controller.connect("COM3", 115200).await.unwrap();
    assert_eq!(controller.link_state(), LinkState::Connected);
    let mut device = opener.devices.lock().unwrap().pop().unwrap();
    device.write_all(frame(100).as_bytes()).await.unwrap();
    let p = Arc::clone(&pipeline);
    wait_until("live frame", || p.stats().received == 1).await;
    controller.disconnect().await.unwrap();

    // Dummy continues from 100
    controller.enable_dummy().await.unwrap();
    let p = Arc::clone(&pipeline);
    wait_until("dummy frames", || p.stats().received >= 3).await;
    controller.disable_dummy().await.unwrap();
    let after_dummy = pipeline.stats();
    assert_eq!(after_dummy.lost, 0);
    let last = after_dummy.last_packet_count.unwrap();
    assert!(last > 100);

    // Live again, one packet skipped
    controller.connect("COM3", 115200).await.unwrap();
    let mut device = opener.devices.lock().unwrap().pop().unwrap();
    device.write_all(frame(last + 2).as_bytes()).await.unwrap();
    let p = Arc::clone(&pipeline);
    let expected = after_dummy.received + 1;
    wait_until("second live frame", || p.stats().received == expected).await;
    controller.disconnect().await.unwrap();

    assert_eq!(pipeline.stats().lost, 1);
}
