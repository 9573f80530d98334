//! Integration tests for errors that only concern one track.
//!
//! A track that cannot be resolved or transcoded is reported and skipped,
//! the session keeps its connection and plays the next track.

mod common;

use common::*;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_unresolvable_track_is_skipped() {
    let harness = TestHarness::new();
    harness.extractor.fail(
        "gone",
        ResolutionError::NotFound {
            reference: "gone".to_string(),
        },
    );
    harness.transcoder.script("b", Script::frames(2, 10));
    let mut subscriber = harness.subscribe();

    harness.play("gone").await.unwrap();
    harness.play("b").await.unwrap();
    let events =
        collect_events_until(&mut subscriber, Duration::from_secs(5), is_queue_exhausted).await;

    assert_event_received!(
        events,
        Event::Playback(_, PlaybackEvent::TrackFailed {
            track,
            error: TrackError::Resolution(ResolutionError::NotFound { .. }),
        }) if track.reference == "gone"
    );
    assert_eq!(started_titles(&events), vec!["Title of b"]);
    assert_event_not_received!(events, Event::Connection(_, ConnectionEvent::TransportFailed { .. }));

    assert_eq!(harness.transport.audio().len(), 10);
    assert_eq!(harness.state().await, ConnectionState::Connected);
    assert_eq!(harness.transport.disconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resolution_timeout() {
    let mut config = test_config();
    config.resolver.timeout_secs = 2;
    let harness = TestHarness::with_config(config);
    harness.extractor.slow("slow", Duration::from_secs(60));
    let mut subscriber = harness.subscribe();

    harness.play("slow").await.unwrap();
    let events =
        collect_events_until(&mut subscriber, Duration::from_secs(5), is_queue_exhausted).await;

    assert_event_received!(
        events,
        Event::Playback(_, PlaybackEvent::TrackFailed {
            error: TrackError::Resolution(ResolutionError::Timeout { secs: 2 }),
            ..
        })
    );
    assert!(harness.transcoder.started().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transcoder_failure_mid_track() {
    let harness = TestHarness::new();
    let failure = TranscodeError::ProcessFailure {
        code: Some(1),
        stderr: "Invalid data found when processing input".to_string(),
    };
    harness.transcoder.script(
        "a",
        Script::frames(1, 20).ending(Ending::Fail(failure.clone())),
    );
    harness.transcoder.script("b", Script::frames(2, 10));
    let mut subscriber = harness.subscribe();

    harness.play("a").await.unwrap();
    harness.play("b").await.unwrap();
    let events =
        collect_events_until(&mut subscriber, Duration::from_secs(5), is_queue_exhausted).await;

    let error = filter_playback_events(&events)
        .into_iter()
        .find_map(|event| match event {
            PlaybackEvent::TrackFailed { error, .. } => Some(error.clone()),
            _ => None,
        })
        .expect("track failure reported");
    assert_eq!(error, TrackError::Transcode(failure));

    // Every frame produced before the failure was delivered
    let audio = harness.transport.audio();
    assert_eq!(audio.iter().filter(|(tag, _)| *tag == 1).count(), 20);
    assert_eq!(audio.iter().filter(|(tag, _)| *tag == 2).count(), 10);
    assert_eq!(harness.transcoder.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transcoder_that_cannot_start() {
    let harness = TestHarness::new();
    harness
        .transcoder
        .script("a", Script::frames(1, 10).refuse_start());
    harness.transcoder.script("b", Script::frames(2, 10));
    let mut subscriber = harness.subscribe();

    harness.play("a").await.unwrap();
    harness.play("b").await.unwrap();
    let events =
        collect_events_until(&mut subscriber, Duration::from_secs(5), is_queue_exhausted).await;

    assert_event_received!(
        events,
        Event::Playback(_, PlaybackEvent::TrackFailed {
            error: TrackError::Transcode(TranscodeError::Spawn { .. }),
            ..
        })
    );
    assert_eq!(started_titles(&events), vec!["Title of b"]);
}

/// A failed track is dropped even when repeating the current track.
#[tokio::test(start_paused = true)]
async fn test_failed_track_is_not_repeated() {
    let harness = TestHarness::new();
    harness.extractor.fail(
        "blocked",
        ResolutionError::Restricted {
            reason: "not available in your country".to_string(),
        },
    );
    let mut subscriber = harness.subscribe();

    let session = harness.session().await;
    session.set_repeat(RepeatMode::Track).await.unwrap();
    harness.play("blocked").await.unwrap();

    let events =
        collect_events_until(&mut subscriber, Duration::from_secs(5), is_queue_exhausted).await;
    let failures = filter_playback_events(&events)
        .into_iter()
        .filter(|event| matches!(event, PlaybackEvent::TrackFailed { .. }))
        .count();
    assert_eq!(failures, 1);

    let status = session.status().await.unwrap();
    assert!(status.current.is_none());
    assert!(status.pending.is_empty());
}
