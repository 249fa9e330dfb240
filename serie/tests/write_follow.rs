//! `write` and `follow` sessions against each other, then `info`

use serie::follow::{self, FollowOptions};
use serie::info;
use serie::write::{self, WriteOptions};
use serie_common::config::FlushConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

fn flush_config() -> FlushConfig {
    FlushConfig {
        refresh_wait_ms: 500,
        serve_interval_ms: 5,
    }
}

#[test]
fn test_follower_sees_writer_progress() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.serie");

    let options = WriteOptions {
        path: path.clone(),
        series: "samples".to_string(),
        columns: vec!["x".to_string(), "y".to_string()],
        rate_hz: 500.0,
        count: None,
        swmr: true,
        service_name: "test-writer".to_string(),
    };
    let running = Arc::new(AtomicBool::new(true));
    let writer = {
        let running = running.clone();
        thread::spawn(move || write::run(&options, flush_config(), &running))
    };

    // Wait for the writer to create the file and its channel
    let mut started = false;
    for _ in 0..200 {
        if info::collect(&path, flush_config(), false).is_ok_and(|i| i.writer_running) {
            started = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(started, "writer did not start");

    let follow_options = FollowOptions {
        paths: vec![path.clone()],
        links: Vec::new(),
        interval: Duration::from_millis(20),
        cycles: Some(3),
    };
    let follow_running = AtomicBool::new(true);
    let summary = follow::run(&follow_options, flush_config(), &follow_running).unwrap();
    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.refreshes, 3);

    let live = info::collect(&path, flush_config(), true).unwrap();
    assert!(live.writer_running);
    assert!(live.swmr);
    assert!(live.series[0].rows > 0);

    running.store(false, Ordering::SeqCst);
    let written = writer.join().unwrap().unwrap();
    assert!(written.flushes_served >= 1);

    let done = info::collect(&path, flush_config(), false).unwrap();
    assert!(!done.writer_running);
    assert_eq!(done.series.len(), 1);
    assert_eq!(done.series[0].columns, vec!["time", "x", "y"]);
    assert_eq!(done.series[0].rows as u64, written.rows);
    assert_eq!(done.attributes.get("writer").map(String::as_str), Some("test-writer"));

    let text = info::render_text(&done);
    assert!(text.contains("samples [time, x, y]"));
    let json: serde_json::Value = serde_json::from_str(&info::render_json(&done).unwrap()).unwrap();
    assert_eq!(json["series"][0]["name"], "samples");
}

#[test]
fn test_fixed_count_without_readers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("count.serie");
    let options = WriteOptions {
        path: path.clone(),
        series: "s".to_string(),
        columns: vec!["v".to_string()],
        rate_hz: 2000.0,
        count: Some(50),
        swmr: false,
        service_name: "test".to_string(),
    };
    let running = AtomicBool::new(true);
    let summary = write::run(&options, flush_config(), &running).unwrap();
    assert_eq!(summary.rows, 50);
    assert_eq!(summary.flushes_served, 0);

    let done = info::collect(&path, flush_config(), false).unwrap();
    assert!(!done.swmr);
    assert_eq!(done.series[0].rows, 50);
    assert_eq!(done.series[0].last.as_ref().map(|row| row[0]), Some(49.0 / 2000.0));
}
