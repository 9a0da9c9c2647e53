//! Tests for the session monitor driving a live log.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;

use steamspeed::classifier::classify;
use steamspeed::monitor::{Monitor, MonitorError, MonitorSettings};
use steamspeed::session::{fold_events, Phase, SessionState};
use steamspeed::summary::summarize;
use steamspeed::tailer::LogTailer;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn settings(idle_timeout: Duration) -> MonitorSettings {
    MonitorSettings {
        poll_interval: Duration::from_millis(10),
        idle_timeout: Some(idle_timeout),
        echo_lines: true,
    }
}

fn setup() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("content_log.txt");
    std::fs::write(&path, "[2018-03-11 11:00:00] previous session Failed\n").expect("seed");
    (dir, path)
}

/// Descriptors in this process that are open on `path`.
#[cfg(target_os = "linux")]
fn handles_on(path: &Path) -> usize {
    let target = std::fs::canonicalize(path).expect("canonicalize");
    std::fs::read_dir("/proc/self/fd")
        .expect("list descriptors")
        .filter_map(Result::ok)
        .filter_map(|entry| std::fs::read_link(entry.path()).ok())
        .filter(|link| *link == target)
        .count()
}

fn assert_released(path: &Path) {
    #[cfg(target_os = "linux")]
    assert_eq!(handles_on(path), 0, "log handle still open");
    #[cfg(not(target_os = "linux"))]
    let _ = path;
}

/// Append lines one at a time with a short pause, like steamcmd does.
fn produce(path: &Path, lines: &'static [&'static str]) -> tokio::task::JoinHandle<()> {
    let path = path.to_path_buf();
    tokio::spawn(async move {
        for line in lines {
            tokio::time::sleep(Duration::from_millis(15)).await;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .expect("open append");
            writeln!(f, "{line}").expect("append");
        }
    })
}

const SUCCESS: &[&str] = &[
    "[2018-03-11 11:59:58] AppID 232370 state changed : Update Required,Fully Installed,Files Missing,Uninstalling,",
    "[2018-03-11 12:00:00] AppID 232370 update started : download 0/104857600",
    "[2018-03-11 12:00:00] Log line nobody cares about",
    "[2018-03-11 12:00:01] Got 5 download sources and 2 caching proxies",
    "[2018-03-11 12:00:02] Created download interface (3) to host cache1.example (10.0.0.1)",
    "[2018-03-11 12:00:02] Created download interface (4) to host cache2.example (10.0.0.2)",
    "[2018-03-11 12:01:40] AppID 232370 update changed : Running,Committing,",
    "[2018-03-11 12:01:45] AppID 232370 update canceled : Failed after the fact",
];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn runs_to_finished_and_summarizes() {
    let (_dir, path) = setup();
    let tailer = LogTailer::open(&path).expect("open");
    let producer = produce(&path, SUCCESS);

    let state = Monitor::new(tailer, settings(Duration::from_secs(5)))
        .run()
        .await
        .expect("session finishes");
    producer.await.expect("producer");

    assert_eq!(state.phase(), Phase::Finished);
    assert_eq!(state.size_bytes(), Some(104_857_600));
    assert_eq!(state.start_time(), NaiveTime::from_hms_opt(12, 0, 0));
    assert_eq!(state.end_time(), NaiveTime::from_hms_opt(12, 1, 40));
    assert_eq!(state.added_sources(), ["cache1.example", "cache2.example"]);
    let counts = state.discovered_sources().expect("counts");
    assert_eq!((counts.sources, counts.proxies), (5, 2));

    let summary = summarize(&state).expect("summary");
    assert_eq!(summary.elapsed_seconds, 100);
    assert!((summary.bits_per_second - 8_388_608.0).abs() < 1e-6);

    // The live loop agrees with folding the same lines offline.
    let folded = fold_events(SessionState::new(), SUCCESS.iter().filter_map(|l| classify(l)));
    assert_eq!(state, folded);
    assert_released(&path);
}

#[tokio::test]
async fn failure_line_stops_the_session() {
    const LINES: &[&str] = &[
        "[2018-03-11 12:00:00] AppID 232370 update started : download 0/1024",
        "[2018-03-11 12:00:05] AppID 232370 update canceled : Failed to write file",
        "[2018-03-11 12:01:40] AppID 232370 update changed : Running,Committing,",
    ];

    let (_dir, path) = setup();
    let tailer = LogTailer::open(&path).expect("open");
    let producer = produce(&path, LINES);

    let err = Monitor::new(tailer, settings(Duration::from_secs(5)))
        .run()
        .await
        .expect_err("session fails");
    producer.await.expect("producer");

    match err {
        MonitorError::SessionFailed { log_path, line } => {
            assert_eq!(log_path, path);
            assert_eq!(
                line,
                "[2018-03-11 12:00:05] AppID 232370 update canceled : Failed to write file"
            );
        }
        other => panic!("expected SessionFailed, got {other:?}"),
    }
    assert_released(&path);
}

#[tokio::test]
async fn failure_before_start_is_reported() {
    const LINES: &[&str] = &["[2018-03-11 11:59:00] Login Failed: rate limited"];

    let (_dir, path) = setup();
    let tailer = LogTailer::open(&path).expect("open");
    let producer = produce(&path, LINES);

    let err = Monitor::new(tailer, settings(Duration::from_secs(5)))
        .run()
        .await
        .expect_err("session fails");
    producer.await.expect("producer");

    assert!(err.to_string().starts_with("Failed to download, check log ("));
    assert!(err.to_string().contains("Login Failed: rate limited"));
}

#[tokio::test]
async fn quiet_log_times_out() {
    const LINES: &[&str] = &["[2018-03-11 12:00:00] AppID 232370 update started : download 0/1024"];

    let (_dir, path) = setup();
    let tailer = LogTailer::open(&path).expect("open");
    let producer = produce(&path, LINES);

    let err = Monitor::new(tailer, settings(Duration::from_millis(300)))
        .run()
        .await
        .expect_err("times out");
    producer.await.expect("producer");

    match err {
        MonitorError::TailerTimeout { log_path, after } => {
            assert_eq!(log_path, path);
            assert_eq!(after, Duration::from_millis(300));
        }
        other => panic!("expected TailerTimeout, got {other:?}"),
    }
    assert_released(&path);
}

#[tokio::test]
async fn history_before_open_is_ignored() {
    // The seeded log already contains a "Failed" line; it must not end the session.
    let (_dir, path) = setup();
    let tailer = LogTailer::open(&path).expect("open");

    let err = Monitor::new(tailer, settings(Duration::from_millis(100)))
        .run()
        .await
        .expect_err("nothing new arrives");

    assert!(matches!(err, MonitorError::TailerTimeout { .. }));
}

#[tokio::test]
async fn dropping_the_run_future_cancels() {
    let (_dir, path) = setup();
    let tailer = LogTailer::open(&path).expect("open");
    #[cfg(target_os = "linux")]
    assert_eq!(handles_on(&path), 1);
    let monitor = Monitor::new(
        tailer,
        MonitorSettings {
            idle_timeout: None,
            ..settings(Duration::from_secs(1))
        },
    );

    let outcome = tokio::time::timeout(Duration::from_millis(100), monitor.run()).await;
    assert!(outcome.is_err(), "monitor without timeout keeps waiting");
    assert_released(&path);
}

#[test]
fn default_settings_poll_every_half_second() {
    let defaults = MonitorSettings::default();
    assert_eq!(defaults.poll_interval, Duration::from_millis(500));
    assert_eq!(defaults.idle_timeout, None);
    assert!(!defaults.echo_lines);
}
