//! Integration tests for plain job graphs: children, continuations, tags,
//! affinity, backpressure and shutdown

use jobweave::{
    Coro, Function, JobError, JobId, JobState, JobSystem, JobSystemConfig, JobType, Tag, TraceKind,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn create_test_system(workers: usize) -> JobSystem {
    init_tracing();
    let mut system = JobSystem::new(workers);
    system.start().unwrap();
    system
}

#[test]
fn test_continuation_runs_once_after_all_children() {
    let system = create_test_system(4);
    let roots = 64;
    let leaves = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..roots {
        let leaves = leaves.clone();
        let seen = seen.clone();
        system
            .schedule(Function::new(move |ctx| {
                let done = Arc::new(AtomicUsize::new(0));
                for spin in 0..3 {
                    let done = done.clone();
                    let leaves = leaves.clone();
                    ctx.schedule(Function::new(move |_| {
                        for _ in 0..spin * 50 {
                            thread::yield_now();
                        }
                        done.fetch_add(1, Ordering::SeqCst);
                        leaves.fetch_add(1, Ordering::SeqCst);
                    }))
                    .unwrap();
                }
                ctx.continuation(Function::new(move |_| {
                    seen.lock().push(done.load(Ordering::SeqCst));
                }))
                .unwrap();
            }))
            .unwrap();
    }

    let completed = system.wait_all(TIMEOUT);
    assert!(completed, "Not all jobs completed in time");

    assert_eq!(leaves.load(Ordering::SeqCst), roots * 3);
    let seen = seen.lock();
    assert_eq!(seen.len(), roots, "Each continuation should run exactly once");
    assert!(
        seen.iter().all(|&done| done == 3),
        "A continuation ran before its children finished: {:?}",
        *seen
    );

    let stats = system.stats();
    assert_eq!(stats.continuations, roots as u64);
    assert_eq!(stats.jobs_completed, (roots * 5) as u64);
    assert_eq!(stats.invariant_violations, 0);
}

#[test]
fn test_second_continuation_is_rejected() {
    let system = create_test_system(2);
    let result = Arc::new(Mutex::new(None));
    let runs = Arc::new(AtomicUsize::new(0));

    let r = result.clone();
    let c = runs.clone();
    let root = system
        .schedule(Function::new(move |ctx| {
            let first = c.clone();
            ctx.continuation(Function::new(move |_| {
                first.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
            *r.lock() = Some(ctx.continuation(Function::new(|_| {})));
        }))
        .unwrap();

    assert!(system.wait_all(TIMEOUT));
    assert_eq!(
        result.lock().clone(),
        Some(Err(JobError::DuplicateContinuation(root)))
    );
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_rejected_continuation_coro_fails_promise() {
    let system = create_test_system(2);
    let second = Coro::new(|_| async { 5u32 });
    let promise = second.promise();

    let root = system
        .schedule(Function::new(move |ctx| {
            ctx.continuation(Function::new(|_| {})).unwrap();
            assert!(ctx.continuation(second).is_err());
        }))
        .unwrap();

    assert!(system.wait_all(TIMEOUT));
    assert_eq!(
        promise.wait_timeout(TIMEOUT),
        Err(JobError::DuplicateContinuation(root))
    );
}

#[test]
fn test_continuation_chain_keeps_grandparent_open() {
    let system = create_test_system(3);
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = order.clone();
    system
        .schedule(Function::new(move |ctx| {
            let step = o.clone();
            ctx.schedule(Function::new(move |ctx| {
                let inner = step.clone();
                ctx.schedule(Function::new(move |_| inner.lock().push("leaf")))
                    .unwrap();
                let inner = step.clone();
                ctx.continuation(Function::new(move |_| {
                    thread::sleep(Duration::from_millis(20));
                    inner.lock().push("child continuation");
                }))
                .unwrap();
            }))
            .unwrap();
            let last = o.clone();
            ctx.continuation(Function::new(move |_| last.lock().push("root continuation")))
                .unwrap();
        }))
        .unwrap();

    assert!(system.wait_all(TIMEOUT));
    assert_eq!(
        *order.lock(),
        vec!["leaf", "child continuation", "root continuation"]
    );
}

#[test]
fn test_no_lost_work() {
    let system = create_test_system(4);
    let executed = Arc::new(AtomicUsize::new(0));
    let fan_out = 50;
    let roots = 20;

    for _ in 0..roots {
        let executed = executed.clone();
        system
            .schedule(Function::new(move |ctx| {
                for _ in 0..fan_out {
                    let executed = executed.clone();
                    ctx.schedule(Function::new(move |_| {
                        executed.fetch_add(1, Ordering::SeqCst);
                    }))
                    .unwrap();
                }
            }))
            .unwrap();
    }

    let completed = system.wait_all(TIMEOUT);
    assert!(completed, "Not all jobs completed in time");
    assert_eq!(executed.load(Ordering::SeqCst), roots * fan_out);

    let stats = system.stats();
    assert_eq!(stats.jobs_scheduled, (roots * (fan_out + 1)) as u64);
    assert_eq!(stats.jobs_completed, stats.jobs_scheduled);
    assert_eq!(stats.active_jobs, 0);
}

#[test]
fn test_jobs_run_on_requested_thread() {
    let system = create_test_system(3);
    let observed = Arc::new(Mutex::new(Vec::new()));

    for index in 0..3 {
        for _ in 0..4 {
            let observed = observed.clone();
            system
                .schedule_on(
                    Function::new(move |ctx| {
                        observed.lock().push((index, ctx.thread_index()));
                    }),
                    index,
                )
                .unwrap();
        }
    }

    assert!(system.wait_all(TIMEOUT));
    let observed = observed.lock();
    assert_eq!(observed.len(), 12);
    for (wanted, actual) in observed.iter() {
        assert_eq!(Some(*wanted), *actual);
    }
}

#[test]
fn test_child_affinity_from_builder() {
    let system = create_test_system(2);
    let observed = Arc::new(Mutex::new(None));

    let o = observed.clone();
    system
        .schedule(Function::new(move |ctx| {
            ctx.schedule(Function::new(move |ctx| *o.lock() = ctx.thread_index()).on_thread(1))
                .unwrap();
        }))
        .unwrap();

    assert!(system.wait_all(TIMEOUT));
    assert_eq!(*observed.lock(), Some(1));
}

#[test]
fn test_current_job_inside_job() {
    let system = create_test_system(2);
    let observed = Arc::new(Mutex::new(None));

    let o = observed.clone();
    let id = system
        .schedule(Function::new(move |ctx| {
            let current = JobSystem::current_job().map(|job| (job.id(), job.state()));
            *o.lock() = Some((ctx.job_id(), current));
        }))
        .unwrap();

    assert!(system.wait_all(TIMEOUT));
    assert_eq!(
        *observed.lock(),
        Some((id, Some((id, JobState::Running))))
    );
    assert!(JobSystem::current_job().is_none());
}

#[test]
fn test_tag_released_from_job_becomes_children() {
    let system = create_test_system(2);
    let parked = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(None));

    for _ in 0..5 {
        let parked = parked.clone();
        system
            .schedule_tagged(
                Function::new(move |_| {
                    thread::sleep(Duration::from_millis(2));
                    parked.fetch_add(1, Ordering::SeqCst);
                }),
                Tag(9),
            )
            .unwrap();
    }

    let p = parked.clone();
    let s = seen.clone();
    system
        .schedule(Function::new(move |ctx| {
            assert_eq!(ctx.schedule_tag(Tag(9)).unwrap(), 5);
            ctx.continuation(Function::new(move |_| {
                *s.lock() = Some(p.load(Ordering::SeqCst));
            }))
            .unwrap();
        }))
        .unwrap();

    assert!(system.wait_all(TIMEOUT));
    assert_eq!(*seen.lock(), Some(5));
}

#[test]
fn test_children_rejected_when_queues_full() {
    let config = JobSystemConfig::new(1).with_queue_capacity(4);
    let mut system = JobSystem::with_config(config).unwrap();
    system.start().unwrap();

    let executed = Arc::new(AtomicUsize::new(0));
    let results = Arc::new(Mutex::new(Vec::new()));

    let e = executed.clone();
    let r = results.clone();
    system
        .schedule(Function::new(move |ctx| {
            for _ in 0..12 {
                let e = e.clone();
                let result = ctx.schedule(Function::new(move |_| {
                    e.fetch_add(1, Ordering::SeqCst);
                }));
                r.lock().push(result.map(|_| ()));
            }
        }))
        .unwrap();

    assert!(system.wait_all(TIMEOUT));

    // Four fit the worker's deque and four the global queue
    let results = results.lock();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 8);
    assert!(results[8..]
        .iter()
        .all(|r| *r == Err(JobError::QueueFull { capacity: 4 })));
    assert_eq!(executed.load(Ordering::SeqCst), 8);

    let stats = system.stats();
    assert_eq!(stats.rejections, 4);
    assert_eq!(stats.invariant_violations, 0);
    assert_eq!(stats.active_jobs, 0);
}

#[test]
fn test_panicking_child_still_releases_parent() {
    let system = create_test_system(2);
    let continued = Arc::new(AtomicUsize::new(0));

    let c = continued.clone();
    system
        .schedule(Function::new(move |ctx| {
            ctx.schedule(Function::new(|_| panic!("child failed"))).unwrap();
            ctx.continuation(Function::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }))
        .unwrap();

    assert!(system.wait_all(TIMEOUT));
    assert_eq!(continued.load(Ordering::SeqCst), 1);
    assert_eq!(system.stats().panics, 1);
}

#[test]
fn test_shutdown_reports_queued_jobs() {
    // One worker, blocked, so the two queued jobs never start
    let mut system = create_test_system(1);
    let release = Arc::new(AtomicUsize::new(0));
    let ran = Arc::new(AtomicUsize::new(0));

    let gate = release.clone();
    system
        .schedule(Function::new(move |ctx| {
            while gate.load(Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            ctx.terminate();
        }))
        .unwrap();
    thread::sleep(Duration::from_millis(20));

    let mut queued: Vec<JobId> = (0..2)
        .map(|_| {
            let ran = ran.clone();
            system
                .schedule(Function::new(move |_| {
                    ran.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap()
        })
        .collect();
    queued.sort();

    release.store(1, Ordering::SeqCst);
    let report = system.wait_for_termination();

    assert_eq!(report.discarded, queued);
    assert!(report.suspended.is_empty());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(system.stats().discarded, 2);
    assert_eq!(system.stats().active_jobs, 0);
}

#[test]
fn test_shutdown_reports_pending_continuation() {
    let mut system = create_test_system(1);
    let continuation = Coro::new(|_| async { 1u8 });
    let continuation_id = continuation.id();
    let promise = continuation.promise();
    let child = Arc::new(Mutex::new(None));

    let c = child.clone();
    let root = system
        .schedule(Function::new(move |ctx| {
            *c.lock() = Some(ctx.schedule(Function::new(|_| {})).unwrap());
            ctx.continuation(continuation).unwrap();
            ctx.terminate();
        }))
        .unwrap();

    let report = system.wait_for_termination();
    let child = child.lock().expect("child scheduled");

    // The child never ran, so the root is still waiting and its continuation
    // is dropped with it
    let mut expected = vec![child, continuation_id];
    expected.sort();
    assert_eq!(report.discarded, expected);
    assert_eq!(report.suspended, vec![root]);
    assert_eq!(
        promise.get(),
        Some(Err(JobError::Discarded(continuation_id)))
    );
    assert_eq!(system.stats().active_jobs, 0);
}

#[test]
fn test_trace_saved_as_chrome_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.json");

    let config = JobSystemConfig::new(2)
        .with_logging(true)
        .with_trace_path(&path);
    let mut system = JobSystem::with_config(config).unwrap();
    system.set_type_name(JobType(1), "root");
    system.start().unwrap();

    system
        .schedule(
            Function::new(|ctx| {
                ctx.schedule(Function::new(|_| {}).with_type(JobType(2)).with_id(7))
                    .unwrap();
                ctx.continuation(Function::new(|_| {})).unwrap();
            })
            .with_type(JobType(1)),
        )
        .unwrap();

    assert!(system.wait_all(TIMEOUT));
    let events = system.trace().events();
    assert!(events
        .iter()
        .any(|e| e.kind == TraceKind::Continuation));
    assert_eq!(
        events
            .iter()
            .filter(|e| e.kind == TraceKind::Run { finished: true })
            .count(),
        3
    );

    system.shutdown();

    let text = std::fs::read_to_string(&path).unwrap();
    let document: serde_json::Value = serde_json::from_str(&text).unwrap();
    let slices = document["traceEvents"].as_array().unwrap();
    assert!(slices.iter().any(|s| s["name"] == "root"));
    assert!(slices.iter().any(|s| s["name"] == "type 2" && s["args"]["id"] == 7));
    assert!(system.trace().is_empty());
}

#[test]
fn test_clear_logs() {
    let system = create_test_system(2);
    system.enable_logging();
    system.schedule(Function::new(|_| {})).unwrap();
    assert!(system.wait_all(TIMEOUT));
    assert!(!system.trace().is_empty());

    system.clear_logs();
    assert!(system.trace().is_empty());
}
