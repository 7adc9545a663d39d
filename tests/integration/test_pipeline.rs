//! Multi-stage pipeline tests: completion propagation, conservation,
//! cancellation, and failure aggregation under real thread concurrency.

use crate::helpers::{drain_group, init_logging};
use conveyor::{ConveyorError, Pipeline, PipelineStage, QueueGroup, StageConfig, StageState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Two stages: double each integer, then sum into an accumulator.
/// Feed 1, 2, 3; expect 2 + 4 + 6 = 12 once both stages complete.
#[test]
fn test_two_stage_double_then_sum() {
    init_logging();

    let source: Arc<QueueGroup<i64>> = Arc::new(QueueGroup::new(2, 16));
    let doubled: Arc<QueueGroup<i64>> = Arc::new(QueueGroup::new(2, 16));
    let accumulator = Arc::new(AtomicI64::new(0));

    let mut pipeline = Pipeline::new();
    let cancel = pipeline.cancel_token();

    pipeline
        .spawn(PipelineStage::transform(
            "double",
            Arc::clone(&source),
            Arc::clone(&doubled),
            cancel.clone(),
            |n: i64| Ok(vec![n * 2]),
        ))
        .unwrap();

    let sink_accumulator = Arc::clone(&accumulator);
    pipeline
        .spawn(PipelineStage::sink("sum", doubled, cancel.clone(), move |n: i64| {
            sink_accumulator.fetch_add(n, Ordering::Relaxed);
            Ok(())
        }))
        .unwrap();

    for n in [1, 2, 3] {
        source.add_to_any(n, &cancel).unwrap();
    }
    source.complete_all();

    let summary = pipeline.wait().unwrap();
    assert!(summary.all_completed());
    assert_eq!(summary.reports.len(), 2);
    assert_eq!(accumulator.load(Ordering::Relaxed), 12);
}

/// Conservation: with 1:1 transforms and no failures, the multiset of sink
/// outputs matches the multiset of transformed inputs, independent of how
/// items spread across member queues. Producers run concurrently with the
/// pipeline and small capacities force real backpressure.
#[test]
fn test_multiset_conservation_through_three_stages() {
    const PRODUCERS: u64 = 3;
    const PER_PRODUCER: u64 = 400;

    let source: Arc<QueueGroup<u64>> = Arc::new(QueueGroup::new(3, 4));
    let stage_a_out: Arc<QueueGroup<u64>> = Arc::new(QueueGroup::new(3, 4));
    let stage_b_out: Arc<QueueGroup<u64>> = Arc::new(QueueGroup::new(3, 4));
    let outputs = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = Pipeline::new();
    let cancel = pipeline.cancel_token();

    pipeline
        .spawn(PipelineStage::transform(
            "add-offset",
            Arc::clone(&source),
            Arc::clone(&stage_a_out),
            cancel.clone(),
            |n: u64| Ok(vec![n + 1_000_000]),
        ))
        .unwrap();
    pipeline
        .spawn(PipelineStage::transform(
            "triple",
            Arc::clone(&stage_a_out),
            Arc::clone(&stage_b_out),
            cancel.clone(),
            |n: u64| Ok(vec![n * 3]),
        ))
        .unwrap();
    let sink_outputs = Arc::clone(&outputs);
    pipeline
        .spawn(PipelineStage::sink("collect", stage_b_out, cancel.clone(), move |n: u64| {
            sink_outputs.lock().unwrap().push(n);
            Ok(())
        }))
        .unwrap();

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let source = Arc::clone(&source);
        let cancel = cancel.clone();
        producers.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                source.add_to_any(p * PER_PRODUCER + i, &cancel).unwrap();
            }
        }));
    }
    for p in producers {
        p.join().unwrap();
    }
    source.complete_all();

    let summary = pipeline.wait().unwrap();
    assert!(summary.all_completed());
    assert_eq!(summary.total_failures(), 0);

    let outputs = outputs.lock().unwrap();
    assert_eq!(outputs.len() as u64, PRODUCERS * PER_PRODUCER);

    let mut expected: HashMap<u64, usize> = HashMap::new();
    for n in 0..PRODUCERS * PER_PRODUCER {
        *expected.entry((n + 1_000_000) * 3).or_default() += 1;
    }
    let mut actual: HashMap<u64, usize> = HashMap::new();
    for &n in outputs.iter() {
        *actual.entry(n).or_default() += 1;
    }
    assert_eq!(actual, expected, "output multiset does not match transformed inputs");
}

/// Cancellation mid-run stops every stage promptly without draining the
/// source; no stage reports Completed.
#[test]
fn test_cancellation_stops_stages_promptly() {
    let source: Arc<QueueGroup<u64>> = Arc::new(QueueGroup::new(2, 4));
    let downstream: Arc<QueueGroup<u64>> = Arc::new(QueueGroup::new(2, 4));

    let mut pipeline = Pipeline::new();
    let cancel = pipeline.cancel_token();

    pipeline
        .spawn(
            PipelineStage::transform(
                "slow",
                Arc::clone(&source),
                Arc::clone(&downstream),
                cancel.clone(),
                |n: u64| {
                    thread::sleep(Duration::from_millis(5));
                    Ok(vec![n])
                },
            )
            .with_config(StageConfig::default().with_poll_timeout(Duration::from_millis(10))),
        )
        .unwrap();
    pipeline
        .spawn(PipelineStage::sink("sink", downstream, cancel.clone(), |_n: u64| Ok(())))
        .unwrap();

    // Keep the source open and flowing; cancel while the pipeline is busy.
    let feeder = {
        let source = Arc::clone(&source);
        let cancel = cancel.clone();
        thread::spawn(move || {
            let mut n = 0;
            while source.add_to_any(n, &cancel).is_ok() {
                n += 1;
            }
        })
    };

    thread::sleep(Duration::from_millis(50));
    pipeline.cancel();

    let summary = pipeline.wait().unwrap();
    assert!(summary.any_cancelled());
    for report in &summary.reports {
        assert_eq!(report.state, StageState::Cancelled, "stage '{}' not cancelled", report.name);
    }
    feeder.join().unwrap();
}

/// Transform failures are collected per stage while every healthy item flows
/// through; the pipeline still completes.
#[test]
fn test_transform_failures_are_aggregated() {
    let source: Arc<QueueGroup<u32>> = Arc::new(QueueGroup::new(2, 16));
    let downstream: Arc<QueueGroup<u32>> = Arc::new(QueueGroup::new(2, 16));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = Pipeline::new();
    let cancel = pipeline.cancel_token();

    pipeline
        .spawn(PipelineStage::transform(
            "reject-multiples-of-3",
            Arc::clone(&source),
            Arc::clone(&downstream),
            cancel.clone(),
            |n: u32| {
                if n % 3 == 0 {
                    Err(format!("rejected {n}").into())
                } else {
                    Ok(vec![n])
                }
            },
        ))
        .unwrap();
    let sink_seen = Arc::clone(&seen);
    pipeline
        .spawn(PipelineStage::sink("collect", downstream, cancel.clone(), move |n: u32| {
            sink_seen.lock().unwrap().push(n);
            Ok(())
        }))
        .unwrap();

    for n in 1..=9 {
        source.add_to_any(n, &cancel).unwrap();
    }
    source.complete_all();

    let summary = pipeline.wait().unwrap();
    assert!(summary.all_completed());
    assert_eq!(summary.total_failures(), 3); // 3, 6, 9

    let failing_stage = &summary.reports[0];
    assert_eq!(failing_stage.name, "reject-multiples-of-3");
    assert_eq!(failing_stage.failures.len(), 3);
    for failure in &failing_stage.failures {
        assert!(failure.detail.contains("rejected"));
    }

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 4, 5, 7, 8]);
}

/// A fan-out transform (one item to many) still propagates completion after
/// flushing everything it produced.
#[test]
fn test_fan_out_transform_flushes_before_completion() {
    // Source holds all 20 inputs outright; the narrow downstream group is the
    // backpressure point while this thread drains it.
    let source: Arc<QueueGroup<u32>> = Arc::new(QueueGroup::new(2, 16));
    let downstream: Arc<QueueGroup<u32>> = Arc::new(QueueGroup::new(2, 4));

    let mut pipeline = Pipeline::new();
    let cancel = pipeline.cancel_token();
    pipeline
        .spawn(PipelineStage::transform(
            "explode",
            Arc::clone(&source),
            Arc::clone(&downstream),
            cancel.clone(),
            |n: u32| Ok(vec![n; 10]),
        ))
        .unwrap();

    for n in 0..20 {
        source.add_to_any(n, &cancel).unwrap();
    }
    source.complete_all();

    // Drain on this thread while the stage runs, then wait for it.
    let drained = drain_group(&downstream, &cancel);
    let summary = pipeline.wait().unwrap();

    assert!(summary.all_completed());
    assert_eq!(drained.len(), 200);
    assert_eq!(summary.reports[0].emitted, 200);
}

/// A stage whose output group is closed underneath it reports a structural
/// plumbing failure through `Pipeline::wait`.
#[test]
fn test_plumbing_failure_propagates_to_orchestrator() {
    let source: Arc<QueueGroup<u32>> = Arc::new(QueueGroup::new(2, 8));
    let downstream: Arc<QueueGroup<u32>> = Arc::new(QueueGroup::new(2, 8));
    downstream.complete_all(); // sabotage: output closed before the stage runs

    let mut pipeline = Pipeline::new();
    let cancel = pipeline.cancel_token();
    pipeline
        .spawn(PipelineStage::transform(
            "victim",
            Arc::clone(&source),
            downstream,
            cancel.clone(),
            |n: u32| Ok(vec![n]),
        ))
        .unwrap();

    source.add_to_any(1, &cancel).unwrap();
    source.complete_all();

    let err = pipeline.wait().unwrap_err();
    assert!(matches!(err, ConveyorError::Plumbing { .. }), "unexpected error: {err}");
}
