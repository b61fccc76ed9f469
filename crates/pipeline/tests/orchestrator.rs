mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use comfybot_core::command::CommandKind;
use comfybot_core::error::GenerationError;
use comfybot_core::request::{GenerationRequest, RequestInput};
use comfybot_core::settings::{GenerationLimits, ResourceCheckPolicy, DEFAULT_PROMPT_PREFIX};
use comfybot_db::repositories::StatsRepo;
use comfybot_events::JobEventKind;

use common::{drain, harness, png, Behavior, HarnessOptions, GB};

fn request(kind: CommandKind, user_id: u64, text: &str) -> GenerationRequest {
    GenerationRequest::build(
        kind,
        RequestInput {
            user_id,
            username: format!("user-{user_id}"),
            guild_id: 100,
            text: text.to_string(),
            options: None,
            source_image: kind.needs_source_image().then(|| png(64, 64, [0, 0, 0, 255])),
            mask_image: kind.needs_mask().then(|| png(64, 64, [255, 255, 255, 255])),
        },
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn a_cat_end_to_end() {
    let h = harness(HarnessOptions::default()).await;
    let mut rx = h.events.subscribe();

    let outcome = h
        .orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a cat"))
        .await
        .unwrap();

    assert_eq!(outcome.images.len(), 1);
    let image = &outcome.images[0];
    assert_eq!((image.width, image.height), (64, 64));
    assert!(image.path.starts_with(&h.output_dir));
    assert_eq!(tokio::fs::read(&image.path).await.unwrap(), image.bytes);

    let submitted = h.backend.submissions();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        submitted[0]["6"]["inputs"]["text"],
        format!("{DEFAULT_PROMPT_PREFIX} a cat")
    );
    assert_eq!(submitted[0]["4"]["inputs"]["ckpt_name"], "sd_xl_base_1.0.safetensors");

    let stats = StatsRepo::find(&h.pool, 100, 1).await.unwrap().unwrap();
    assert_eq!(stats.images, 1);

    let kinds: Vec<_> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds.len(), 3);
    assert_matches!(kinds[0], JobEventKind::Queued { backend: 0, .. });
    assert_matches!(&kinds[1], JobEventKind::Submitted { prompt_id } if prompt_id == "prompt-1");
    assert_matches!(kinds[2], JobEventKind::Completed { images: 1, .. });
}

#[tokio::test]
async fn explicit_model_becomes_preference() {
    let h = harness(HarnessOptions::default()).await;

    h.orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a cat model:uncanny"))
        .await
        .unwrap();
    h.orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a dog"))
        .await
        .unwrap();
    h.orchestrator
        .generate(request(CommandKind::Text2Img, 2, "a dog"))
        .await
        .unwrap();

    let submitted = h.backend.submissions();
    assert_eq!(submitted[1]["4"]["inputs"]["ckpt_name"], "uncanny.safetensors");
    assert_eq!(submitted[2]["4"]["inputs"]["ckpt_name"], "sd_xl_base_1.0.safetensors");
}

#[tokio::test]
async fn depth_map_counts_separately() {
    let h = harness(HarnessOptions::default()).await;

    h.orchestrator
        .generate(request(CommandKind::Depth, 1, ""))
        .await
        .unwrap();

    assert_eq!(h.backend.uploads.lock().unwrap().len(), 1);
    let stats = StatsRepo::find(&h.pool, 100, 1).await.unwrap().unwrap();
    assert_eq!((stats.images, stats.depth_maps), (0, 1));
}

#[tokio::test]
async fn animation_runs_one_job_per_frame() {
    let h = harness(HarnessOptions::default()).await;
    let mut rx = h.events.subscribe();

    let outcome = h
        .orchestrator
        .generate(request(CommandKind::Animate, 1, "a cat walking frames:3 seed:40"))
        .await
        .unwrap();

    assert_eq!(outcome.images.len(), 1);
    let gif = &outcome.images[0];
    assert_eq!(gif.path.extension().unwrap(), "gif");
    assert_eq!((gif.width, gif.height), (64, 64));
    assert_eq!(outcome.settings.seed, 40);

    let submitted = h.backend.submissions();
    let seeds: Vec<_> = submitted.iter().map(|g| g["3"]["inputs"]["seed"].as_u64().unwrap()).collect();
    assert_eq!(seeds, vec![40, 41, 42]);
    assert!(submitted.iter().all(|g| g["5"]["inputs"]["batch_size"] == 1));

    let stats = StatsRepo::find(&h.pool, 100, 1).await.unwrap().unwrap();
    assert_eq!(stats.images, 1);

    let terminal: Vec<_> = drain(&mut rx).into_iter().filter(|e| e.kind.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert_matches!(terminal[0].kind, JobEventKind::Completed { images: 1, .. });
}

#[tokio::test]
async fn failed_frame_fails_the_animation() {
    let h = harness(HarnessOptions {
        behavior: Behavior::Fail,
        ..Default::default()
    })
    .await;

    let err = h
        .orchestrator
        .generate(request(CommandKind::Animate, 1, "a cat frames:4"))
        .await
        .unwrap_err();

    assert_matches!(err, GenerationError::Failed(_));
    assert_eq!(h.backend.submissions().len(), 1);
    assert!(StatsRepo::find(&h.pool, 100, 1).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_width_is_rejected_before_submission() {
    let h = harness(HarnessOptions::default()).await;
    let mut rx = h.events.subscribe();

    let err = h
        .orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a cat width:5000"))
        .await
        .unwrap_err();

    assert_matches!(err, GenerationError::AdmissionRejected(_));
    assert!(h.backend.submissions().is_empty());
    assert!(StatsRepo::find(&h.pool, 100, 1).await.unwrap().is_none());

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_matches!(&events[0].kind, JobEventKind::Rejected { code, .. } if code == "ADMISSION_REJECTED");
}

#[tokio::test]
async fn busy_gpu_rejects_after_slot_is_acquired() {
    let h = harness(HarnessOptions::default()).await;
    *h.backend.vram_used.lock().unwrap() = Some(22 * GB);

    let err = h
        .orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a cat"))
        .await
        .unwrap_err();

    assert_matches!(err, GenerationError::AdmissionRejected(reason) if reason.contains("VRAM"));
    assert!(h.backend.submissions().is_empty());
}

#[tokio::test]
async fn failed_resource_check_follows_policy() {
    let closed = harness(HarnessOptions::default()).await;
    *closed.backend.stats_error.lock().unwrap() = true;
    let err = closed
        .orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a cat"))
        .await
        .unwrap_err();
    assert_matches!(err, GenerationError::AdmissionRejected(_));

    let open = harness(HarnessOptions {
        limits: GenerationLimits {
            check_policy: ResourceCheckPolicy::FailOpen,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;
    *open.backend.stats_error.lock().unwrap() = true;
    assert!(open
        .orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a cat"))
        .await
        .is_ok());
}

#[tokio::test]
async fn unknown_model_is_a_parameter_error() {
    let h = harness(HarnessOptions::default()).await;
    let err = h
        .orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a cat model:nope"))
        .await
        .unwrap_err();
    assert_matches!(err, GenerationError::Parameter(_));
    assert!(h.backend.submissions().is_empty());
}

#[tokio::test]
async fn missing_template_is_a_template_error() {
    let h = harness(HarnessOptions::default()).await;
    let err = h
        .orchestrator
        .generate(request(CommandKind::Upscale, 1, ""))
        .await
        .unwrap_err();
    assert_matches!(err, GenerationError::Template(_));
}

// ---------------------------------------------------------------------------
// Backend failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stuck_backend_times_out_and_is_cancelled() {
    let h = harness(HarnessOptions {
        behavior: Behavior::Stuck,
        timeout: Duration::from_millis(100),
        ..Default::default()
    })
    .await;
    let mut rx = h.events.subscribe();

    let err = h
        .orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a cat"))
        .await
        .unwrap_err();

    assert_matches!(err, GenerationError::TimedOut { .. });
    assert_eq!(h.backend.interrupts.load(Ordering::SeqCst), 1);
    assert!(StatsRepo::find(&h.pool, 100, 1).await.unwrap().is_none());

    let last = drain(&mut rx).pop().unwrap();
    assert_matches!(last.kind, JobEventKind::TimedOut { .. });
}

#[tokio::test]
async fn execution_error_is_failed_without_stats() {
    let h = harness(HarnessOptions {
        behavior: Behavior::Fail,
        ..Default::default()
    })
    .await;

    let err = h
        .orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a cat"))
        .await
        .unwrap_err();

    assert_matches!(err, GenerationError::Failed(msg) if msg.contains("out of memory"));
    assert!(StatsRepo::find(&h.pool, 100, 1).await.unwrap().is_none());
}

#[tokio::test]
async fn completed_without_outputs_is_artifact_missing() {
    let h = harness(HarnessOptions {
        behavior: Behavior::MissingOutput,
        ..Default::default()
    })
    .await;
    let mut rx = h.events.subscribe();

    let err = h
        .orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a cat"))
        .await
        .unwrap_err();

    assert_matches!(err, GenerationError::ArtifactMissing { .. });
    assert!(StatsRepo::find(&h.pool, 100, 1).await.unwrap().is_none());
    let last = drain(&mut rx).pop().unwrap();
    assert_matches!(&last.kind, JobEventKind::Failed { code, .. } if code == "ARTIFACT_MISSING");
}

#[tokio::test]
async fn unfetchable_output_is_artifact_missing() {
    let h = harness(HarnessOptions {
        behavior: Behavior::FetchFails,
        ..Default::default()
    })
    .await;

    let err = h
        .orchestrator
        .generate(request(CommandKind::Text2Img, 1, "a cat"))
        .await
        .unwrap_err();

    assert_matches!(err, GenerationError::ArtifactMissing { detail, .. } if detail.contains("prompt-1"));
    assert!(StatsRepo::find(&h.pool, 100, 1).await.unwrap().is_none());
}

#[tokio::test]
async fn vram_spike_while_running_stops_the_job() {
    let h = harness(HarnessOptions {
        behavior: Behavior::Stuck,
        ..Default::default()
    })
    .await;
    let mut rx = h.events.subscribe();

    let orchestrator = Arc::clone(&h.orchestrator);
    let job = tokio::spawn(async move {
        orchestrator
            .generate(request(CommandKind::Text2Img, 1, "a cat"))
            .await
    });
    for _ in 0..100 {
        if h.backend.submissions().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    *h.backend.vram_used.lock().unwrap() = Some(22 * GB);

    let err = job.await.unwrap().unwrap_err();
    assert_matches!(err, GenerationError::Failed(msg) if msg.contains("VRAM"));
    assert_eq!(h.backend.interrupts.load(Ordering::SeqCst), 1);
    assert!(StatsRepo::find(&h.pool, 100, 1).await.unwrap().is_none());

    let last = drain(&mut rx).pop().unwrap();
    assert_matches!(last.kind, JobEventKind::Failed { .. });
}

#[tokio::test]
async fn vram_watchdog_can_be_disabled() {
    let h = harness(HarnessOptions {
        behavior: Behavior::Stuck,
        vram_check_interval: None,
        ..Default::default()
    })
    .await;
    let orchestrator = Arc::clone(&h.orchestrator);
    let job = tokio::spawn(async move {
        orchestrator
            .generate(request(CommandKind::Text2Img, 1, "a cat"))
            .await
    });
    for _ in 0..100 {
        if h.backend.submissions().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    *h.backend.vram_used.lock().unwrap() = Some(22 * GB);
    tokio::time::sleep(Duration::from_millis(50)).await;
    *h.backend.behavior.lock().unwrap() = Behavior::Complete;

    assert!(job.await.unwrap().is_ok());
    assert_eq!(h.backend.interrupts.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burst_respects_slot_limit() {
    const SLOTS: usize = 2;
    let h = harness(HarnessOptions {
        slots: SLOTS,
        ..Default::default()
    })
    .await;

    let mut handles = Vec::new();
    for user in 0..(10 * SLOTS) as u64 {
        let orchestrator = Arc::clone(&h.orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator
                .generate(request(CommandKind::Text2Img, user, "a cat"))
                .await
        }));
    }
    for result in futures::future::join_all(handles).await {
        assert!(result.unwrap().is_ok());
    }

    assert!(h.backend.peak.load(Ordering::SeqCst) <= SLOTS);
    assert_eq!(h.backend.submissions().len(), 10 * SLOTS);
    let board = StatsRepo::leaderboard(&h.pool, 100, 100).await.unwrap();
    assert_eq!(board.len(), 10 * SLOTS);
}

#[tokio::test]
async fn queued_job_can_be_withdrawn() {
    let h = harness(HarnessOptions {
        behavior: Behavior::Stuck,
        slots: 1,
        ..Default::default()
    })
    .await;
    let mut rx = h.events.subscribe();

    let first = request(CommandKind::Text2Img, 1, "a cat");
    let second = request(CommandKind::Text2Img, 2, "a dog");
    let second_id = second.job_id;

    let orchestrator = Arc::clone(&h.orchestrator);
    let running = tokio::spawn(async move { orchestrator.generate(first).await });
    let orchestrator = Arc::clone(&h.orchestrator);
    let waiting = tokio::spawn(async move { orchestrator.generate(second).await });

    // Wait until the second job is parked behind the first.
    for _ in 0..100 {
        if h.orchestrator.backend_loads()[0].waiting == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(h.orchestrator.cancel(second_id));
    *h.backend.behavior.lock().unwrap() = Behavior::Complete;

    assert_matches!(waiting.await.unwrap(), Err(GenerationError::Cancelled(id)) if id == second_id);
    assert!(running.await.unwrap().is_ok());
    assert_eq!(h.backend.submissions().len(), 1);

    let cancelled: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.job_id == second_id && e.kind.is_terminal())
        .collect();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].kind, JobEventKind::Cancelled);
}

#[tokio::test]
async fn queue_wait_is_not_generation_time() {
    let h = harness(HarnessOptions {
        behavior: Behavior::Stuck,
        slots: 1,
        ..Default::default()
    })
    .await;

    let orchestrator = Arc::clone(&h.orchestrator);
    let first = tokio::spawn(async move {
        orchestrator
            .generate(request(CommandKind::Text2Img, 1, "a cat"))
            .await
    });
    for _ in 0..100 {
        if h.backend.submissions().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let queued_at = tokio::time::Instant::now();
    let orchestrator = Arc::clone(&h.orchestrator);
    let second = tokio::spawn(async move {
        orchestrator
            .generate(request(CommandKind::Text2Img, 2, "a dog"))
            .await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    *h.backend.behavior.lock().unwrap() = Behavior::Complete;

    assert!(first.await.unwrap().is_ok());
    let second = second.await.unwrap().unwrap();
    let waited = queued_at.elapsed();
    assert!(
        second.duration + Duration::from_millis(150) < waited,
        "{:?} of {waited:?}",
        second.duration
    );
}

#[tokio::test]
async fn per_user_flood_is_rejected() {
    let h = harness(HarnessOptions {
        behavior: Behavior::Stuck,
        slots: 1,
        max_pending_per_user: 1,
        timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .await;

    let orchestrator = Arc::clone(&h.orchestrator);
    let first = tokio::spawn(async move {
        orchestrator
            .generate(request(CommandKind::Text2Img, 1, "a cat"))
            .await
    });
    for _ in 0..100 {
        if h.backend.submissions().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let err = h
        .orchestrator
        .generate(request(CommandKind::Text2Img, 1, "another cat"))
        .await
        .unwrap_err();
    assert_matches!(err, GenerationError::AdmissionRejected(_));
    assert_matches!(first.await.unwrap(), Err(GenerationError::TimedOut { .. }));
}
