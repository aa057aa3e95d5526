//! End-to-end capture scenarios against a scripted device

use loggerlink_core::core::logger::{CsvFileSink, MemorySink, SinkError};
use loggerlink_core::core::session::{
    CaptureEngine, CaptureTiming, EndOutcome, SessionError, StepOutcome, StopReason,
};
use loggerlink_core::core::state_machine::CaptureState;
use loggerlink_core::core::transport::{ScriptedHandle, ScriptedTransport, TransportError};
use std::time::Duration;

fn timing() -> CaptureTiming {
    CaptureTiming {
        settle: Duration::ZERO,
        drain_wait: Duration::from_millis(2),
        handshake_attempts: 5,
        handshake_interval: Duration::from_millis(2),
        read_timeout: Duration::from_millis(2),
    }
}

fn device() -> (ScriptedTransport, ScriptedHandle) {
    let transport = ScriptedTransport::new();
    let handle = transport.handle();
    handle.on_command("STATUS", ["DATA_LOGGER:READY"]);
    handle.on_command(
        "START:normal",
        [
            "DATA_LOGGER:START:normal",
            "timestamp_ms,ax,ay,az,gx,gy,gz,pitch,roll,label",
        ],
    );
    handle.on_command("STOP", ["DATA_LOGGER:STOP:Samples=3"]);
    (transport, handle)
}

async fn drain_steps(engine: &mut CaptureEngine<ScriptedTransport>) -> Vec<StepOutcome> {
    let mut outcomes = Vec::new();
    loop {
        let outcome = engine.stream_step().await.unwrap();
        match outcome {
            StepOutcome::Idle => return outcomes,
            StepOutcome::SessionEnded(_) => {
                outcomes.push(outcome);
                return outcomes;
            }
            other => outcomes.push(other),
        }
    }
}

#[tokio::test]
async fn normal_capture_persists_header_and_rows() {
    let (transport, handle) = device();
    let sink = MemorySink::new();
    let mut engine = CaptureEngine::with_timing(transport, Box::new(sink.clone()), timing());

    let responses = engine.connect().await.unwrap();
    assert_eq!(responses, vec!["DATA_LOGGER:READY"]);

    let started = engine.begin_capture("normal").await.unwrap();
    assert!(started.acknowledged);

    handle.push_lines([
        "20,0.01,0.02,0.98,0.1,0.2,0.3,1.0,2.0,normal",
        "40,0.01,0.02,0.98,0.1,0.2,0.3,1.0,2.0,normal",
        "60,0.01,0.02,0.98,0.1,0.2,0.3,1.0,2.0,normal",
    ]);
    let outcomes = drain_steps(&mut engine).await;
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[2], StepOutcome::Sample { count: 3 }));

    let EndOutcome::Ended(summary) = engine.end_capture().await.unwrap() else {
        panic!("capture should have been active");
    };
    assert_eq!(summary.samples, 3);
    assert_eq!(summary.device_samples, Some(3));
    assert_eq!(summary.reason, StopReason::Operator);

    assert_eq!(
        engine.state_path(),
        vec![
            CaptureState::Idle,
            CaptureState::AwaitingHeader,
            CaptureState::Collecting,
            CaptureState::Stopping,
            CaptureState::Idle,
        ]
    );
    assert_eq!(handle.written(), vec!["STATUS", "START:normal", "STOP"]);

    let capture = &sink.captures()[0];
    assert_eq!(capture.lines.len(), 4);
    assert_eq!(capture.lines[0], "timestamp_ms,ax,ay,az,gx,gy,gz,pitch,roll,label");
    assert!(capture.closed);
}

#[tokio::test]
async fn silent_device_times_out_without_a_file() {
    let transport = ScriptedTransport::new();
    let handle = transport.handle();
    let dir = tempfile::tempdir().unwrap();
    let mut engine = CaptureEngine::with_timing(
        transport,
        Box::new(CsvFileSink::new(dir.path())),
        timing(),
    );

    engine.connect().await.unwrap();
    let err = engine.begin_capture("x").await.unwrap_err();

    assert!(matches!(err, SessionError::HandshakeTimeout { attempts: 5, .. }));
    assert_eq!(engine.state(), CaptureState::Idle);
    assert!(!dir.path().join("x").exists());
    assert_eq!(handle.written(), vec!["STATUS", "START:x"]);
}

#[tokio::test]
async fn csv_file_matches_stream() {
    let (transport, handle) = device();
    let dir = tempfile::tempdir().unwrap();
    let mut engine = CaptureEngine::with_timing(
        transport,
        Box::new(CsvFileSink::new(dir.path())),
        timing(),
    );

    engine.connect().await.unwrap();
    let started = engine.begin_capture("normal").await.unwrap();
    handle.push_lines(["20,1,2,3\r", "DATA_LOGGER:READY", "40,4,5,6"]);
    drain_steps(&mut engine).await;
    engine.end_capture().await.unwrap();

    let path = std::path::PathBuf::from(&started.destination);
    assert!(path.starts_with(dir.path().join("normal")));
    let content = std::fs::read_to_string(path).unwrap();
    assert_eq!(
        content,
        "timestamp_ms,ax,ay,az,gx,gy,gz,pitch,roll,label\n20,1,2,3\n40,4,5,6\n"
    );
}

#[tokio::test]
async fn stop_marker_ends_session_without_stop_command() {
    let (transport, handle) = device();
    let sink = MemorySink::new();
    let mut engine = CaptureEngine::with_timing(transport, Box::new(sink.clone()), timing());

    engine.connect().await.unwrap();
    engine.begin_capture("normal").await.unwrap();
    handle.push_lines(["20,1", "DATA_LOGGER:STOP:Samples=1"]);

    let outcomes = drain_steps(&mut engine).await;
    let Some(StepOutcome::SessionEnded(summary)) = outcomes.last() else {
        panic!("expected the device to end the session");
    };
    assert_eq!(summary.reason, StopReason::Device);
    assert_eq!(engine.state(), CaptureState::Idle);
    assert!(!handle.written().contains(&"STOP".to_string()));

    // A later EndCapture has nothing to do
    assert!(matches!(engine.end_capture().await.unwrap(), EndOutcome::NotCollecting));
}

#[tokio::test]
async fn second_begin_is_rejected() {
    let (transport, handle) = device();
    let mut engine = CaptureEngine::with_timing(transport, Box::new(MemorySink::new()), timing());

    engine.connect().await.unwrap();
    engine.begin_capture("normal").await.unwrap();

    let err = engine.begin_capture("normal").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));
    assert_eq!(engine.state(), CaptureState::Collecting);
    assert_eq!(
        handle.written().iter().filter(|c| c.starts_with("START")).count(),
        1
    );
}

#[tokio::test]
async fn pulled_cable_discards_session() {
    let (transport, handle) = device();
    let sink = MemorySink::new();
    let mut engine = CaptureEngine::with_timing(transport, Box::new(sink.clone()), timing());

    engine.connect().await.unwrap();
    engine.begin_capture("normal").await.unwrap();
    handle.push_lines(["20,1", "40,2"]);
    engine.stream_step().await.unwrap();
    handle.fail_next_read();

    let err = engine.stream_step().await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(TransportError::Disconnected)));
    assert_eq!(engine.state(), CaptureState::Idle);
    assert!(engine.session().is_none());
    assert!(sink.captures()[0].closed);
    assert_eq!(sink.captures()[0].lines.len(), 2);
}

#[tokio::test]
async fn sink_failure_stops_device() {
    let (transport, handle) = device();
    let sink = MemorySink::new();
    // Header plus one row succeed
    sink.fail_appends_after(2);
    let mut engine = CaptureEngine::with_timing(transport, Box::new(sink.clone()), timing());

    engine.connect().await.unwrap();
    engine.begin_capture("normal").await.unwrap();
    handle.push_lines(["20,1", "40,2", "60,3"]);

    assert!(matches!(
        engine.stream_step().await.unwrap(),
        StepOutcome::Sample { count: 1 }
    ));
    let err = engine.stream_step().await.unwrap_err();
    let SessionError::SinkWrite { summary, .. } = err else {
        panic!("expected a sink failure");
    };
    assert_eq!(summary.samples, 1);
    assert_eq!(summary.reason, StopReason::SinkFailure);
    assert_eq!(engine.state(), CaptureState::Idle);
    assert_eq!(handle.written().last().map(String::as_str), Some("STOP"));
}

#[tokio::test]
async fn disconnect_mid_capture_stops_and_closes() {
    let (transport, handle) = device();
    let sink = MemorySink::new();
    let mut engine = CaptureEngine::with_timing(transport, Box::new(sink.clone()), timing());

    engine.connect().await.unwrap();
    engine.begin_capture("normal").await.unwrap();

    let summary = engine.disconnect().await.unwrap().unwrap();
    assert_eq!(summary.reason, StopReason::Shutdown);
    assert_eq!(handle.written().last().map(String::as_str), Some("STOP"));
    assert!(sink.captures()[0].closed);
    assert!(!handle.is_open());
    assert!(!engine.is_connected());
}

#[tokio::test]
async fn label_cannot_escape_output_directory() {
    let transport = ScriptedTransport::new();
    let handle = transport.handle();
    handle.on_command(
        "START:../escape",
        ["DATA_LOGGER:START:../escape", "timestamp_ms,ax,ay,az"],
    );
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("captures");
    let mut engine = CaptureEngine::with_timing(transport, Box::new(CsvFileSink::new(&root)), timing());

    engine.connect().await.unwrap();
    let err = engine.begin_capture("../escape").await.unwrap_err();

    assert!(matches!(err, SessionError::SinkOpen(SinkError::UnsafeLabel(_))));
    assert_eq!(engine.state(), CaptureState::Idle);
    assert_eq!(handle.written().last().map(String::as_str), Some("STOP"));
    assert!(!dir.path().join("escape").exists());
}
