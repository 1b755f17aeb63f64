mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_options, start_monitor, wait_for_samples, wait_for_unwatched, FakeSource};
use pidstat::error::WatchError;
use pidstat::monitor::{MonitorOptions, MIN_INTERVAL};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_pid_is_rejected_without_registering() {
    let source = FakeSource::with(&[(1, "init"), (100, "worker")]);
    let monitor = start_monitor(source, fast_options()).await;

    let err = monitor.start_watch(4242).await.unwrap_err();
    assert!(matches!(err, WatchError::NotFound(4242)));
    assert_eq!(err.to_string(), "pid '4242' is not in process list");
    assert_eq!(monitor.registry_len().await, 0);

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_start_reports_already_watched() {
    let source = FakeSource::with(&[(100, "worker")]);
    let monitor = start_monitor(source, fast_options()).await;

    monitor.start_watch(100).await.unwrap();
    let err = monitor.start_watch(100).await.unwrap_err();
    assert!(matches!(err, WatchError::AlreadyWatched(100)));
    assert_eq!(monitor.registry_len().await, 1);

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_is_sampled_with_increasing_timestamps() {
    let source = FakeSource::with(&[(1, "init"), (100, "worker")]);
    let monitor = start_monitor(source, fast_options()).await;

    monitor.start_watch(100).await.unwrap();
    assert!(wait_for_samples(&monitor, 100, 3).await);

    let view = monitor.get_stats(100, None).await.unwrap();
    assert_eq!(view.pid, 100);
    assert_eq!(view.name, "worker");
    assert_eq!(view.cmd_line, "worker --id=100");
    assert!(view.watched);
    assert!(view
        .samples
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(view.samples.iter().all(|s| s.threads == 4));

    monitor.stop_watch(100).await.unwrap();
    assert!(!monitor.is_watched(100).await);

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stats_after_stop_report_not_watched() {
    let source = FakeSource::with(&[(100, "worker")]);
    let monitor = start_monitor(source, fast_options()).await;

    monitor.start_watch(100).await.unwrap();
    monitor.stop_watch(100).await.unwrap();

    assert!(matches!(
        monitor.get_stats(100, None).await,
        Err(WatchError::NotWatched(100))
    ));
    assert!(matches!(
        monitor.stop_watch(100).await,
        Err(WatchError::NotWatched(100))
    ));

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_halts_sampling() {
    let source = FakeSource::with(&[(100, "worker")]);
    let monitor = start_monitor(source.clone(), fast_options()).await;

    monitor.start_watch(100).await.unwrap();
    assert!(wait_for_samples(&monitor, 100, 2).await);
    monitor.stop_watch(100).await.unwrap();

    // Allow an in-flight sample to land, then expect silence.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after_stop = source.total_samples();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(source.total_samples(), after_stop);

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offset_returns_tail_of_samples() {
    let source = FakeSource::with(&[(100, "worker")]);
    let options = MonitorOptions {
        sample_interval: Duration::from_secs(3600),
        ..fast_options()
    };
    let monitor = start_monitor(source, options).await;

    // With a long interval only the immediate first tick runs.
    monitor.start_watch(100).await.unwrap();
    assert!(wait_for_samples(&monitor, 100, 1).await);

    let all = monitor.get_stats(100, Some(0)).await.unwrap();
    assert_eq!(all.samples.len(), 1);

    // offset equal to the number of samples yields an empty tail
    let tail = monitor.get_stats(100, Some(1)).await.unwrap();
    assert!(tail.samples.is_empty());

    let err = monitor.get_stats(100, Some(2)).await.unwrap_err();
    assert!(matches!(
        err,
        WatchError::InvalidOffset { offset: 2, len: 1 }
    ));

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offset_tail_matches_full_sequence() {
    let source = FakeSource::with(&[(100, "worker")]);
    let monitor = start_monitor(source, fast_options()).await;

    monitor.start_watch(100).await.unwrap();
    assert!(wait_for_samples(&monitor, 100, 4).await);

    let full = monitor.get_stats(100, None).await.unwrap().samples;
    // sampling continues between the reads, so the tail may be longer
    let tail = monitor.get_stats(100, Some(2)).await.unwrap().samples;
    assert!(tail.starts_with(&full[2..]));

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exited_process_is_removed_automatically() {
    let source = FakeSource::with(&[(100, "worker")]);
    let monitor = start_monitor(source.clone(), fast_options()).await;

    monitor.start_watch(100).await.unwrap();
    assert!(wait_for_samples(&monitor, 100, 1).await);

    source.kill(100);
    assert!(wait_for_unwatched(&monitor, 100).await);

    assert!(matches!(
        monitor.get_stats(100, None).await,
        Err(WatchError::NotWatched(100))
    ));
    assert!(matches!(
        monitor.stop_watch(100).await,
        Err(WatchError::NotWatched(100))
    ));
    let listing = monitor.list_processes().await;
    assert!(listing.iter().all(|p| !p.watched));

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_process_cannot_be_watched() {
    let source = FakeSource::with(&[(100, "worker")]);
    let monitor = start_monitor(source.clone(), fast_options()).await;

    // Still in the cached list, but already gone.
    source.kill(100);
    let err = monitor.start_watch(100).await.unwrap_err();
    assert!(matches!(err, WatchError::ProcessUnavailable { pid: 100, .. }));
    assert!(!err.is_validation());
    assert_eq!(monitor.registry_len().await, 0);

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pid_can_be_watched_again_after_removal() {
    let source = FakeSource::with(&[(100, "worker")]);
    let monitor = start_monitor(source.clone(), fast_options()).await;

    monitor.start_watch(100).await.unwrap();
    monitor.stop_watch(100).await.unwrap();
    monitor.start_watch(100).await.unwrap();
    assert!(wait_for_samples(&monitor, 100, 1).await);

    // Exit and come back under the same pid.
    source.kill(100);
    assert!(wait_for_unwatched(&monitor, 100).await);
    source.reap(100);
    source.spawn(100, "worker");
    monitor.refresh_now().await.unwrap();

    monitor.start_watch(100).await.unwrap();
    assert!(wait_for_samples(&monitor, 100, 1).await);

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listing_flags_watched_processes() {
    let source = FakeSource::with(&[(1, "init"), (100, "worker"), (200, "db")]);
    let monitor = start_monitor(source.clone(), fast_options()).await;

    monitor.start_watch(100).await.unwrap();
    let listing = monitor.list_processes().await;
    assert_eq!(listing.len(), 3);
    for p in &listing {
        assert_eq!(p.watched, p.pid == 100, "pid {}", p.pid);
    }

    // A process that disappears from the list is no longer watchable.
    source.reap(200);
    monitor.refresh_now().await.unwrap();
    assert!(matches!(
        monitor.start_watch(200).await,
        Err(WatchError::NotFound(200))
    ));

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retention_keeps_newest_samples() {
    let source = FakeSource::with(&[(100, "worker")]);
    let options = MonitorOptions {
        max_samples: Some(3),
        ..fast_options()
    };
    let monitor = start_monitor(source, options).await;

    monitor.start_watch(100).await.unwrap();
    // Wait past the cap; the count never exceeds it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let view = monitor.get_stats(100, None).await.unwrap();
    assert_eq!(view.samples.len(), 3);
    // resident memory grows per sample, so the oldest were dropped
    assert!(view.samples[0].resident_memory > 1024 * 1024);

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_all_watches() {
    let source = FakeSource::with(&[(100, "worker"), (200, "db")]);
    let monitor = start_monitor(source.clone(), fast_options()).await;

    monitor.start_watch(100).await.unwrap();
    monitor.start_watch(200).await.unwrap();
    assert!(wait_for_samples(&monitor, 200, 1).await);

    monitor.shutdown().await;
    assert_eq!(monitor.registry_len().await, 0);
    assert!(monitor.watched().await.is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let after = source.total_samples();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.total_samples(), after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_after_shutdown_is_refused() {
    let source = FakeSource::with(&[(100, "worker")]);
    let monitor = start_monitor(source.clone(), fast_options()).await;

    monitor.shutdown().await;
    let err = monitor.start_watch(100).await.unwrap_err();
    assert!(matches!(err, WatchError::ShuttingDown));
    assert_eq!(monitor.registry_len().await, 0);
    assert!(!monitor.is_watched(100).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.total_samples(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_intervals_still_sample() {
    let source = FakeSource::with(&[(100, "worker")]);
    let options = MonitorOptions {
        process_list_interval: Duration::ZERO,
        sample_interval: Duration::ZERO,
        max_samples: Some(0),
    };
    let monitor = start_monitor(source, options).await;
    assert_eq!(monitor.options().sample_interval, MIN_INTERVAL);
    assert_eq!(monitor.options().max_samples, Some(1));

    monitor.start_watch(100).await.unwrap();
    assert!(wait_for_samples(&monitor, 100, 1).await);
    let first = monitor.get_stats(100, None).await.unwrap().samples[0].resident_memory;

    // the single retained sample keeps being replaced
    tokio::time::sleep(Duration::from_millis(50)).await;
    let view = monitor.get_stats(100, None).await.unwrap();
    assert_eq!(view.samples.len(), 1);
    assert!(view.samples[0].resident_memory > first);

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_register_once() {
    let source = FakeSource::with(&[(100, "worker")]);
    let monitor = Arc::new(start_monitor(source, fast_options()).await);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.start_watch(100).await })
        })
        .collect();

    let mut started = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => started += 1,
            Err(e) => assert!(matches!(e, WatchError::AlreadyWatched(100)), "{e}"),
        }
    }
    assert_eq!(started, 1);
    assert_eq!(monitor.registry_len().await, 1);

    monitor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_racing_exit_never_hangs() {
    let source = FakeSource::with(&[(1, "init")]);
    let monitor = start_monitor(source.clone(), fast_options()).await;

    for pid in 1000..1020 {
        source.spawn(pid, "worker");
        monitor.refresh_now().await.unwrap();
        monitor.start_watch(pid).await.unwrap();
        assert!(wait_for_samples(&monitor, pid, 1).await);

        source.kill(pid);
        let result = tokio::time::timeout(Duration::from_secs(1), monitor.stop_watch(pid))
            .await
            .expect("stop_watch timed out");
        assert!(
            matches!(result, Ok(()) | Err(WatchError::NotWatched(_))),
            "pid {pid}: {result:?}"
        );
        assert!(wait_for_unwatched(&monitor, pid).await);
    }

    // a failed entry leaves the map once its sampler has cleaned up
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while monitor.registry_len().await > 0 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(monitor.registry_len().await, 0);

    monitor.shutdown().await;
}
