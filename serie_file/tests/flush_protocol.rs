//! Writer/reader flush protocol, end to end.
//!
//! The writer runs on its own thread with its own handle, the way a writer
//! process would; the shared memory channel is the only link to readers.

use serie_common::config::FlushConfig;
use serie_file::{File, FileAccess, FileError, FileRegistry, FileResult, ObjectKind};
use serie_shared_memory::platform::{PlatformRegion, SharedRegion};
use serie_shared_memory::{CONTROL_BLOCK_SIZE, ControlBlock, channel_name};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

fn config(refresh_wait_ms: u64) -> FlushConfig {
    FlushConfig {
        refresh_wait_ms,
        serve_interval_ms: 2,
    }
}

/// Writer thread: appends `rows` rows, then serves requests until stopped.
/// Further batches of rows arrive over `more`.
struct WriterThread {
    stop: Arc<AtomicBool>,
    more: mpsc::Sender<usize>,
    handle: Option<thread::JoinHandle<FileResult<()>>>,
}

impl WriterThread {
    fn spawn(path: PathBuf, rows: usize, swmr: bool) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (more_tx, more_rx) = mpsc::channel::<usize>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let flag = stop.clone();

        let handle = thread::spawn(move || -> FileResult<()> {
            let file = File::open_with(&path, FileAccess::Write, config(40))?;
            if swmr {
                file.reopen_as_swmr()?;
            }
            let series = file.create_series("samples", &["time", "value"])?;
            let mut written = 0;
            for _ in 0..rows {
                series.append(&[written as f64, 2.0 * written as f64])?;
                written += 1;
            }
            let _ = ready_tx.send(());

            while !flag.load(Ordering::Relaxed) {
                while let Ok(batch) = more_rx.try_recv() {
                    for _ in 0..batch {
                        series.append(&[written as f64, 2.0 * written as f64])?;
                        written += 1;
                    }
                }
                file.flush_if_requested()?;
                thread::sleep(Duration::from_millis(2));
            }
            drop(series);
            file.close()
        });

        ready_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("writer thread did not start");
        Self {
            stop,
            more: more_tx,
            handle: Some(handle),
        }
    }

    fn append(&self, rows: usize) {
        self.more.send(rows).unwrap();
        // Let the writer pick the batch up before the next request
        thread::sleep(Duration::from_millis(30));
    }

    fn finish(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap().unwrap();
        }
    }
}

fn rows_of(file: &File) -> usize {
    file.series("samples").map_or(0, |s| s.len().unwrap())
}

#[test]
fn test_round_trip_observes_exactly_committed_rows() {
    serie_shared_memory::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("round_trip.serie");
    let writer = WriterThread::spawn(path.clone(), 25, true);

    let reader = File::open_with(&path, FileAccess::Read, config(2000)).unwrap();
    assert!(reader.has_writer_channel());
    assert_eq!(rows_of(&reader), 0);

    assert!(reader.refresh_after_writer_flush().unwrap());
    assert_eq!(rows_of(&reader), 25);

    writer.append(10);
    assert!(reader.refresh_after_writer_flush().unwrap());
    let series = reader.series("samples").unwrap();
    let rows = series.rows().unwrap();
    assert_eq!(rows.len(), 35);
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row, &vec![i as f64, 2.0 * i as f64]);
    }
    assert!(reader.is_swmr());
    drop(series);

    writer.finish();
}

#[test]
fn test_round_trip_without_swmr_reopens() {
    serie_shared_memory::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.serie");
    let writer = WriterThread::spawn(path.clone(), 7, false);

    let reader = File::open_with(&path, FileAccess::Read, config(2000)).unwrap();
    assert!(reader.refresh_after_writer_flush().unwrap());
    assert!(!reader.is_swmr());
    assert_eq!(rows_of(&reader), 7);

    writer.append(3);
    assert!(reader.refresh_after_writer_flush().unwrap());
    assert_eq!(rows_of(&reader), 10);

    writer.finish();
}

#[test]
fn test_repeated_request_flushes_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idempotent.serie");
    let writer = File::open_with(&path, FileAccess::Write, config(40)).unwrap();
    let reader = File::open_with(&path, FileAccess::Read, config(40)).unwrap();

    reader.request_writer_flush().unwrap();
    reader.request_writer_flush().unwrap();

    assert!(writer.flush_if_requested().unwrap());
    assert!(!writer.flush_if_requested().unwrap());
    assert!(reader.wait_for_writer_flush().unwrap());
}

#[test]
fn test_unserved_request_times_out_and_leaves_view() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timeout.serie");
    let writer = File::open_with(&path, FileAccess::Write, config(40)).unwrap();
    let series = writer.create_series("samples", &["v"]).unwrap();
    series.append(&[1.0]).unwrap();

    let reader = File::open_with(&path, FileAccess::Read, config(40)).unwrap();
    let before = reader.committed_frames().unwrap();

    let start = Instant::now();
    assert!(!reader.refresh_after_writer_flush().unwrap());
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(35), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(40 + 250), "returned after {elapsed:?}");
    assert_eq!(reader.committed_frames().unwrap(), before);
    assert!(reader.series_names().unwrap().is_empty());
}

/// Writer thread that serves each request `delay` after noticing it.
fn spawn_slow_writer(
    path: PathBuf,
    rows: usize,
    delay: Duration,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<FileResult<u64>> {
    let (ready_tx, ready_rx) = mpsc::channel();
    let handle = thread::spawn(move || -> FileResult<u64> {
        let file = File::open_with(&path, FileAccess::Write, config(40))?;
        file.reopen_as_swmr()?;
        let series = file.create_series("samples", &["time", "value"])?;
        for i in 0..rows {
            series.append(&[i as f64, 2.0 * i as f64])?;
        }
        let _ = ready_tx.send(());

        let mut served = 0;
        while !stop.load(Ordering::Relaxed) {
            if file.is_flush_requested()? {
                thread::sleep(delay);
                if file.flush_if_requested()? {
                    served += 1;
                }
            }
            thread::sleep(Duration::from_millis(1));
        }
        drop(series);
        file.close()?;
        Ok(served)
    });
    ready_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("writer thread did not start");
    handle
}

#[test]
fn test_batched_refresh_takes_one_interval() {
    serie_shared_memory::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let interval = Duration::from_millis(200);
    // Each writer answers late in the interval: one after another, three
    // waits would need 3 * 120 ms, beyond 1.5 intervals
    let delay = interval * 3 / 5;

    let stop = Arc::new(AtomicBool::new(false));
    let paths: Vec<PathBuf> = (0..3)
        .map(|i| dir.path().join(format!("batch{i}.serie")))
        .collect();
    let writers: Vec<_> = paths
        .iter()
        .map(|path| spawn_slow_writer(path.clone(), 5, delay, stop.clone()))
        .collect();

    let registry = FileRegistry::new(config(interval.as_millis() as u64));
    let readers: Vec<File> = paths
        .iter()
        .map(|path| registry.open(path, FileAccess::Read).unwrap())
        .collect();
    let channels: std::collections::BTreeSet<&str> =
        readers.iter().map(File::channel_name).collect();
    assert_eq!(channels.len(), 3);
    let refs: Vec<&File> = readers.iter().collect();

    let start = Instant::now();
    let refreshed = registry.refresh_files_after_writer_flush(&refs).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(refreshed, 3);
    assert!(elapsed >= delay, "writers flushed early: {elapsed:?}");
    assert!(elapsed < interval * 3 / 2, "batch took {elapsed:?}");
    for reader in &readers {
        assert_eq!(rows_of(reader), 5);
    }

    let start = Instant::now();
    assert_eq!(registry.refresh_all_files_after_writer_flush().unwrap(), 3);
    assert!(start.elapsed() < interval * 3 / 2, "batch took {:?}", start.elapsed());

    stop.store(true, Ordering::Relaxed);
    for writer in writers {
        assert_eq!(writer.join().unwrap().unwrap(), 2);
    }
}

#[test]
fn test_close_refused_while_child_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("close.serie");
    let writer = File::open_with(&path, FileAccess::Write, config(40)).unwrap();
    let series = writer.create_series("leaked", &["v"]).unwrap();

    match writer.close() {
        Err(FileError::OpenObjects { objects, .. }) => {
            assert_eq!(objects.len(), 1);
            assert_eq!(objects[0].kind, ObjectKind::Series);
            assert_eq!(objects[0].name, "leaked");
        }
        other => panic!("expected OpenObjects, got {other:?}"),
    }

    drop(series);
    writer.close().unwrap();
    assert!(!writer.is_open());
}

#[test]
fn test_swmr_promotion_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swmr.serie");
    let writer = File::open_with(&path, FileAccess::Write, config(40)).unwrap();
    let series = writer.create_series("samples", &["v"]).unwrap();
    series.append(&[1.0]).unwrap();

    writer.reopen_as_swmr().unwrap();
    let after_first = writer.committed_frames().unwrap();
    writer.reopen_as_swmr().unwrap();

    assert!(writer.is_swmr());
    assert_eq!(writer.committed_frames().unwrap(), after_first);
    assert_eq!(series.len().unwrap(), 1);

    // The series handle survives the reopen
    series.append(&[2.0]).unwrap();
    writer.flush().unwrap();
    let reader = File::open_with(&path, FileAccess::Read, config(40)).unwrap();
    assert!(reader.is_swmr());
    assert_eq!(rows_of(&reader), 2);
}

#[test]
fn test_absent_writer_never_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.serie");
    {
        let writer = File::open_with(&path, FileAccess::Write, config(40)).unwrap();
        writer.create_series("samples", &["v"]).unwrap();
    }

    let reader = File::open_with(&path, FileAccess::Read, config(1000)).unwrap();
    assert!(!reader.has_writer_channel());

    let start = Instant::now();
    reader.request_writer_flush().unwrap();
    assert!(!reader.wait_for_writer_flush().unwrap());
    assert!(!reader.refresh_after_writer_flush().unwrap());
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(reader.series_names().unwrap(), vec!["samples"]);
}

#[test]
fn test_dead_writer_channel_reports_not_confirmed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dead.serie");
    drop(File::open_with(&path, FileAccess::Write, config(40)).unwrap());

    // Segment left behind by a writer process that no longer exists
    let name = channel_name(&path).unwrap();
    let mut region = PlatformRegion::create(&name, CONTROL_BLOCK_SIZE).unwrap();
    // SAFETY: freshly created zeroed region of CONTROL_BLOCK_SIZE bytes
    unsafe { ControlBlock::init_in_place(region.as_mut_ptr(), i32::MAX as u32).unwrap() };

    let reader = File::open_with(&path, FileAccess::Read, config(1000)).unwrap();
    assert!(reader.has_writer_channel());

    let start = Instant::now();
    assert!(!reader.refresh_after_writer_flush().unwrap());
    assert!(start.elapsed() < Duration::from_millis(200));

    drop(reader);
    PlatformRegion::remove(&name).unwrap();
}

fn open_writer(path: &Path) -> File {
    File::open_with(path, FileAccess::Write, config(40)).unwrap()
}

#[test]
fn test_linked_writer_confirms_refresh() {
    serie_shared_memory::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let primary_path = dir.path().join("primary.serie");
    let linked_path = dir.path().join("linked.serie");

    let primary = open_writer(&primary_path);
    let linked = WriterThread::spawn(linked_path.clone(), 1, true);

    let reader = File::open_with(&primary_path, FileAccess::Read, config(40)).unwrap();
    assert!(reader.add_file_to_notify_on_refresh(&linked_path).unwrap());
    assert_eq!(reader.linked_file_count(), 1);

    // The primary writer never serves; the linked one does
    assert!(reader.refresh_after_writer_flush().unwrap());

    linked.finish();
    drop(primary);
}

#[test]
fn test_link_without_writer_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let primary_path = dir.path().join("primary.serie");
    let orphan_path = dir.path().join("orphan.serie");
    let _primary = open_writer(&primary_path);
    drop(open_writer(&orphan_path));

    let reader = File::open_with(&primary_path, FileAccess::Read, config(40)).unwrap();
    assert!(!reader.add_file_to_notify_on_refresh(&orphan_path).unwrap());
    assert!(!reader
        .add_file_to_notify_on_refresh(dir.path().join("missing.serie"))
        .unwrap());
    assert_eq!(reader.linked_file_count(), 0);
}

#[test]
fn test_second_writer_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked.serie");
    let _writer = open_writer(&path);
    assert!(matches!(
        File::open_with(&path, FileAccess::Write, config(40)),
        Err(FileError::Locked { .. })
    ));
}

#[test]
fn test_registry_serves_all_writers() {
    let dir = tempfile::tempdir().unwrap();
    let registry = FileRegistry::new(config(40));
    let paths: Vec<PathBuf> = (0..2)
        .map(|i| dir.path().join(format!("w{i}.serie")))
        .collect();
    let writers: Vec<File> = paths
        .iter()
        .map(|p| registry.open(p, FileAccess::Write).unwrap())
        .collect();
    registry.reopen_all_files_as_swmr().unwrap();
    assert!(writers.iter().all(File::is_swmr));

    let readers: Vec<File> = paths
        .iter()
        .map(|p| File::open_with(p, FileAccess::Read, config(40)).unwrap())
        .collect();
    readers[0].request_writer_flush().unwrap();
    readers[1].request_writer_flush().unwrap();

    assert_eq!(registry.flush_all_files_if_requested().unwrap(), 2);
    assert!(readers.iter().all(|r| r.wait_for_writer_flush().unwrap()));
}

#[test]
fn test_attribute_visible_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attr.serie");
    let writer = open_writer(&path);
    writer.reopen_as_swmr().unwrap();
    let unit = writer.attribute("unit").unwrap();
    unit.write("kelvin").unwrap();
    assert_eq!(unit.read().unwrap().as_deref(), Some("kelvin"));

    let reader = File::open_with(&path, FileAccess::Read, config(40)).unwrap();
    let seen = reader.attribute("unit").unwrap();
    assert_eq!(seen.read().unwrap(), None);

    writer.flush().unwrap();
    reader.refresh().unwrap();
    assert_eq!(seen.read().unwrap().as_deref(), Some("kelvin"));
    assert!(matches!(
        seen.write("celsius"),
        Err(FileError::RoleMismatch { .. })
    ));
}

#[test]
fn test_invalid_wait_override_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("env.serie");
    drop(open_writer(&path));

    // SAFETY: no other test in this binary reads this variable
    unsafe { std::env::set_var("SERIE_REFRESHWAITTIME", "soon") };
    let result = File::open(&path, FileAccess::Read);
    unsafe { std::env::remove_var("SERIE_REFRESHWAITTIME") };

    assert!(matches!(result, Err(FileError::Config(_))));
}
