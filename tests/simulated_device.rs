//! Full capture against the simulated data logger

use loggerlink_core::core::logger::{CsvFileSink, MemorySink};
use loggerlink_core::core::protocol::{classify, LineKind};
use loggerlink_core::core::session::{CaptureEngine, CaptureTiming, EndOutcome, StepOutcome, StopReason};
use loggerlink_core::core::simulator::{SimulatedLogger, SimulatorConfig};
use loggerlink_core::core::state_machine::CaptureState;
use std::time::Duration;

fn timing() -> CaptureTiming {
    CaptureTiming {
        settle: Duration::ZERO,
        drain_wait: Duration::from_millis(5),
        handshake_attempts: 10,
        handshake_interval: Duration::from_millis(5),
        read_timeout: Duration::from_millis(5),
    }
}

fn simulator(auto_stop_after: Option<u64>) -> SimulatedLogger {
    SimulatedLogger::new(SimulatorConfig {
        sample_interval: Duration::from_millis(1),
        auto_stop_after,
        noise: 0.05,
        seed: Some(42),
    })
}

#[tokio::test]
async fn device_initiated_stop_counts_match() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = CaptureEngine::with_timing(
        simulator(Some(25)),
        Box::new(CsvFileSink::new(dir.path())),
        timing(),
    );

    let responses = engine.connect().await.unwrap();
    assert_eq!(responses, vec!["DATA_LOGGER:READY"]);

    let started = engine.begin_capture("fall").await.unwrap();
    assert!(started.acknowledged);

    let summary = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match engine.stream_step().await.unwrap() {
                StepOutcome::SessionEnded(summary) => return summary,
                StepOutcome::Idle => tokio::time::sleep(Duration::from_millis(1)).await,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(summary.reason, StopReason::Device);
    assert_eq!(summary.samples, 25);
    assert_eq!(summary.device_samples, Some(25));
    assert_eq!(engine.state(), CaptureState::Idle);

    let content = std::fs::read_to_string(&started.destination).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 26);
    assert_eq!(classify(lines[0]).kind, LineKind::HeaderLine);
    assert!(lines[1..]
        .iter()
        .all(|l| classify(l).kind == LineKind::DataLine && l.ends_with(",fall")));

    engine.disconnect().await.unwrap();
}

#[tokio::test]
async fn operator_stop_reports_device_count() {
    let sink = MemorySink::new();
    let mut engine = CaptureEngine::with_timing(simulator(None), Box::new(sink.clone()), timing());

    engine.connect().await.unwrap();
    engine.begin_capture("walk").await.unwrap();

    let mut collected = 0;
    while collected < 10 {
        match engine.stream_step().await.unwrap() {
            StepOutcome::Sample { count } => collected = count,
            StepOutcome::Idle => tokio::time::sleep(Duration::from_millis(1)).await,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    let EndOutcome::Ended(summary) = engine.end_capture().await.unwrap() else {
        panic!("capture should have been active");
    };
    assert_eq!(summary.reason, StopReason::Operator);
    // Rows still in flight when STOP was sent are not part of the capture
    assert!(summary.device_samples.unwrap() >= summary.samples);

    let status = engine.probe_status().await.unwrap();
    assert_eq!(status, vec!["DATA_LOGGER:READY"]);
    assert!(sink.captures()[0].closed);
}
