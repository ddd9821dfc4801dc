use crate::common::mocks::Reply;
use crate::common::{TestContext, eventually};
use async_playbin::player::EngineState;
use async_playbin::{PlaybackState, PlaybinError, PlaybinEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_play_local_file() {
    let ctx = TestContext::new().await;
    let path = ctx.media_file("clip.ogg");

    ctx.playbin
        .play_source(path.to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(ctx.playbin.state(), PlaybackState::Playing);
    let uri = ctx.engine.uri().unwrap();
    assert!(uri.starts_with("file://"));
    assert!(uri.ends_with("/clip.ogg"));
    assert_eq!(ctx.playbin.source(), Some(uri.clone()));

    let calls = ctx.engine.calls();
    let load: Vec<&str> = calls.iter().map(String::as_str).take(3).collect();
    assert_eq!(
        load,
        [
            "set_state(Null)",
            format!("set_uri({uri})").as_str(),
            "set_state(Playing)"
        ]
    );
}

#[tokio::test]
async fn test_play_uri_is_passed_through() {
    let ctx = TestContext::new().await;
    ctx.playbin
        .play_source("https://media.example.com/stream.m3u8")
        .await
        .unwrap();
    assert_eq!(
        ctx.engine.uri().as_deref(),
        Some("https://media.example.com/stream.m3u8")
    );
}

#[tokio::test]
async fn test_play_missing_file_fails_fast() {
    let ctx = TestContext::new().await;
    let missing = ctx.temp_dir.path().join("missing-file.mkv");

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        ctx.playbin.play_source(missing.to_str().unwrap()),
    )
    .await
    .expect("play_source hung");

    assert_eq!(result, Err(PlaybinError::NotFound(missing)));
    assert_eq!(ctx.playbin.state(), PlaybackState::Stopped);
    assert_eq!(ctx.engine.count_calls("set_uri"), 0);
}

#[tokio::test]
async fn test_engine_error_fails_play_and_stops() {
    let ctx = TestContext::new().await;
    ctx.engine
        .fail_next_state_change("resource:NotFound", "File not found");

    let result = ctx.playbin.play_source("file:///nowhere/movie.mkv").await;

    assert_eq!(
        result,
        Err(PlaybinError::Engine {
            code: "resource:NotFound".to_string(),
            message: "File not found".to_string(),
        })
    );
    assert_eq!(ctx.playbin.state(), PlaybackState::Stopped);
    assert_eq!(ctx.engine.engine_state(), EngineState::Null);
    assert_eq!(ctx.playbin.source(), None);
    // The error was delivered to the caller, not recorded as unsolicited
    assert_eq!(ctx.playbin.async_error(), None);
}

#[tokio::test]
async fn test_synchronous_rejection_leaves_stopped() {
    let ctx = TestContext::new().await;
    ctx.engine.reject_state_changes(true);

    let result = ctx.playbin.play_source("file:///movie.mkv").await;

    assert!(matches!(result, Err(PlaybinError::Engine { ref code, .. }) if code == "state-change"));
    assert_eq!(ctx.playbin.state(), PlaybackState::Stopped);
}

#[tokio::test]
async fn test_commands_need_a_source() {
    let ctx = TestContext::new().await;

    assert_eq!(
        ctx.playbin.play().await,
        Err(PlaybinError::NotAvailable("no source loaded"))
    );
    assert_eq!(
        ctx.playbin.pause().await,
        Err(PlaybinError::NotAvailable("no source loaded"))
    );
    assert!(ctx.playbin.position().is_err());
    assert!(ctx.playbin.duration().is_err());
}

#[tokio::test]
async fn test_pause_and_resume() {
    let ctx = TestContext::new().await;
    ctx.playing().await;

    ctx.playbin.pause().await.unwrap();
    assert_eq!(ctx.playbin.state(), PlaybackState::Paused);

    // Already paused: the engine answers synchronously
    ctx.playbin.pause().await.unwrap();
    assert_eq!(ctx.playbin.state(), PlaybackState::Paused);

    ctx.playbin.play().await.unwrap();
    assert_eq!(ctx.playbin.state(), PlaybackState::Playing);
}

#[tokio::test]
async fn test_pause_then_play_resolve_in_order() {
    let ctx = TestContext::new().await;
    ctx.playing().await;

    let (paused, played) = tokio::join!(ctx.playbin.pause(), ctx.playbin.play());
    assert!(paused.is_ok());
    assert!(played.is_ok());

    let calls = ctx.engine.calls();
    let tail: Vec<&str> = calls.iter().rev().take(2).rev().map(String::as_str).collect();
    assert_eq!(tail, ["set_state(Paused)", "set_state(Playing)"]);
    assert_eq!(ctx.playbin.state(), PlaybackState::Playing);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let ctx = TestContext::new().await;

    ctx.playbin.stop().await.unwrap();
    ctx.playbin.stop().await.unwrap();
    assert_eq!(ctx.playbin.state(), PlaybackState::Stopped);

    ctx.playing().await;
    ctx.playbin.stop().await.unwrap();
    assert_eq!(ctx.playbin.state(), PlaybackState::Stopped);

    ctx.playbin.play().await.unwrap();
    ctx.playbin.pause().await.unwrap();
    ctx.playbin.stop().await.unwrap();
    ctx.playbin.stop().await.unwrap();
    assert_eq!(ctx.playbin.state(), PlaybackState::Stopped);
    assert_eq!(ctx.engine.engine_state(), EngineState::Null);
}

#[tokio::test]
async fn test_stop_preempts_pending_play() {
    let ctx = TestContext::new().await;
    ctx.engine.set_state_reply(Reply::Hold);
    let path = ctx.media_file("slow.mkv");

    let finished = Arc::new(AtomicBool::new(false));
    let play = {
        let playbin = ctx.playbin.clone();
        let finished = finished.clone();
        tokio::spawn(async move {
            let result = playbin.play_source(path.to_str().unwrap()).await;
            finished.store(true, Ordering::SeqCst);
            result
        })
    };

    let engine = ctx.engine.clone();
    eventually(|| engine.count_calls("set_state(Playing)") == 1).await;

    ctx.playbin.stop().await.unwrap();
    assert!(finished.load(Ordering::SeqCst), "play resolved after stop");

    assert_eq!(play.await.unwrap(), Err(PlaybinError::Cancelled));
    assert_eq!(ctx.playbin.state(), PlaybackState::Stopped);
    assert_eq!(ctx.engine.engine_state(), EngineState::Null);
}

#[tokio::test]
async fn test_stop_cancels_queued_state_changes() {
    let ctx = TestContext::new().await;
    ctx.playing().await;
    ctx.playbin.pause().await.unwrap();

    ctx.engine.set_state_reply(Reply::Hold);
    ctx.playbin.set_command_timeout(None);

    let play = {
        let playbin = ctx.playbin.clone();
        tokio::spawn(async move { playbin.play().await })
    };
    let engine = ctx.engine.clone();
    eventually(|| engine.count_calls("set_state(Playing)") == 2).await;

    // Waits on the lane behind the held play
    let pause = {
        let playbin = ctx.playbin.clone();
        tokio::spawn(async move { playbin.pause().await })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    tokio::time::timeout(Duration::from_secs(1), ctx.playbin.stop())
        .await
        .expect("stop() waited on a queued state change")
        .unwrap();

    assert_eq!(play.await.unwrap(), Err(PlaybinError::Cancelled));
    assert_eq!(pause.await.unwrap(), Err(PlaybinError::Cancelled));
    // The queued pause never reached the engine
    assert_eq!(ctx.engine.count_calls("set_state(Paused)"), 1);
    assert_eq!(ctx.playbin.state(), PlaybackState::Stopped);
    assert_eq!(ctx.engine.engine_state(), EngineState::Null);
}

#[tokio::test]
async fn test_late_confirmation_after_stop_is_ignored() {
    let ctx = TestContext::new().await;
    ctx.playing().await;
    let mut events = ctx.playbin.subscribe();

    ctx.engine.set_state_reply(Reply::Hold);
    ctx.playbin
        .set_command_timeout(Some(Duration::from_millis(50)));
    assert_eq!(
        ctx.playbin.pause().await,
        Err(PlaybinError::Timeout(Duration::from_millis(50)))
    );

    ctx.playbin.stop().await.unwrap();
    assert_eq!(ctx.playbin.state(), PlaybackState::Stopped);

    ctx.engine.post(async_playbin::player::BusMessage::StateChanged {
        old: EngineState::Playing,
        new: EngineState::Paused,
    });
    // Delivered in order, so once this arrives the late confirmation was handled
    ctx.engine
        .post(async_playbin::player::BusMessage::DurationChanged);
    loop {
        if events.recv().await.unwrap() == PlaybinEvent::DurationChanged {
            break;
        }
    }

    assert_eq!(ctx.playbin.state(), PlaybackState::Stopped);
    assert_eq!(ctx.engine.engine_state(), EngineState::Null);
}

#[tokio::test]
async fn test_command_timeout() {
    let ctx = TestContext::new().await;
    ctx.playing().await;

    ctx.engine.set_state_reply(Reply::Hold);
    ctx.playbin
        .set_command_timeout(Some(Duration::from_millis(50)));

    assert_eq!(
        ctx.playbin.pause().await,
        Err(PlaybinError::Timeout(Duration::from_millis(50)))
    );

    // A late confirmation is not mistaken for the next request's
    ctx.engine.confirm_state();
    ctx.engine.set_state_reply(Reply::Confirm);
    ctx.playbin.play().await.unwrap();
    assert_eq!(ctx.playbin.state(), PlaybackState::Playing);
}

#[tokio::test]
async fn test_dropped_pause_aborts_state_change() {
    let ctx = TestContext::new().await;
    ctx.playing().await;
    ctx.engine.set_state_reply(Reply::Hold);

    let result = tokio::time::timeout(Duration::from_millis(20), ctx.playbin.pause()).await;
    assert!(result.is_err());
    assert_eq!(ctx.engine.count_calls("abort_state"), 1);

    ctx.engine.set_state_reply(Reply::Confirm);
    ctx.playbin.play().await.unwrap();
}

#[tokio::test]
async fn test_seek_then_position() {
    let ctx = TestContext::new().await;
    ctx.playing().await;

    for secs in [0, 30, 119, 120] {
        let target = Duration::from_secs(secs);
        ctx.playbin.seek(target).await.unwrap();
        assert_eq!(ctx.playbin.position().unwrap(), target);
    }
}

#[tokio::test]
async fn test_seek_past_end_is_rejected() {
    let ctx = TestContext::new().await;
    ctx.playing().await;

    assert_eq!(
        ctx.playbin.seek(Duration::from_secs(121)).await,
        Err(PlaybinError::InvalidPosition {
            position: Duration::from_secs(121),
            duration: Duration::from_secs(120),
        })
    );
    assert_eq!(ctx.engine.count_calls("seek"), 0);
}

#[tokio::test]
async fn test_seek_without_duration() {
    let ctx = TestContext::new().await;
    ctx.playing().await;
    ctx.engine.set_duration(None);

    assert_eq!(
        ctx.playbin.seek(Duration::from_secs(1)).await,
        Err(PlaybinError::NotAvailable("duration"))
    );
}

#[tokio::test]
async fn test_cancelled_seek_leaves_no_pending_request() {
    let ctx = TestContext::new().await;
    ctx.playing().await;
    ctx.engine.set_seek_reply(Reply::Hold);

    let result = tokio::time::timeout(
        Duration::from_millis(20),
        ctx.playbin.seek(Duration::from_secs(10)),
    )
    .await;
    assert!(result.is_err());

    ctx.engine.set_seek_reply(Reply::Confirm);
    ctx.playbin.seek(Duration::from_secs(20)).await.unwrap();
    assert_eq!(ctx.playbin.position().unwrap(), Duration::from_secs(20));
}

#[tokio::test]
async fn test_forward_and_rewind_clamp() {
    let ctx = TestContext::new().await;
    ctx.playing().await;

    ctx.playbin.seek(Duration::from_secs(5)).await.unwrap();
    ctx.playbin.rewind(Duration::from_secs(10)).await.unwrap();
    assert_eq!(ctx.playbin.position().unwrap(), Duration::ZERO);

    ctx.playbin.forward(Duration::from_secs(45)).await.unwrap();
    assert_eq!(ctx.playbin.position().unwrap(), Duration::from_secs(45));

    ctx.playbin.forward(Duration::from_secs(500)).await.unwrap();
    assert_eq!(ctx.playbin.position().unwrap(), Duration::from_secs(120));
}

#[tokio::test]
async fn test_volume_rejects_out_of_range() {
    let ctx = TestContext::new().await;

    ctx.playbin.set_volume(0.5).await.unwrap();
    assert_eq!(ctx.playbin.volume(), 0.5);

    assert_eq!(
        ctx.playbin.set_volume(1.5).await,
        Err(PlaybinError::InvalidVolume(1.5))
    );
    assert_eq!(
        ctx.playbin.set_volume(-0.1).await,
        Err(PlaybinError::InvalidVolume(-0.1))
    );
    assert!(matches!(
        ctx.playbin.set_volume(f64::NAN).await,
        Err(PlaybinError::InvalidVolume(_))
    ));
    assert_eq!(ctx.playbin.volume(), 0.5);

    ctx.playbin.set_volume(0.0).await.unwrap();
    ctx.playbin.set_volume(1.0).await.unwrap();
    assert_eq!(ctx.playbin.volume(), 1.0);
}

#[tokio::test]
async fn test_end_of_stream() {
    let ctx = TestContext::new().await;
    ctx.playing().await;
    let mut events = ctx.playbin.subscribe();
    assert!(!ctx.playbin.end_of_stream());

    ctx.engine
        .post(async_playbin::player::BusMessage::EndOfStream);

    assert_eq!(events.recv().await.unwrap(), PlaybinEvent::EndOfStream);
    assert!(ctx.playbin.end_of_stream());

    // Seeking back clears the flag
    ctx.playbin.seek(Duration::from_secs(1)).await.unwrap();
    assert!(!ctx.playbin.end_of_stream());
}

#[tokio::test]
async fn test_unsolicited_error_is_recorded() {
    let ctx = TestContext::new().await;
    ctx.playing().await;
    let mut events = ctx.playbin.subscribe();

    ctx.engine.post(async_playbin::player::BusMessage::Error {
        code: "stream:Decode".to_string(),
        message: "corrupt frame".to_string(),
        debug: Some("avdec_h264".to_string()),
    });

    let expected = PlaybinError::Engine {
        code: "stream:Decode".to_string(),
        message: "corrupt frame (avdec_h264)".to_string(),
    };
    loop {
        match events.recv().await.unwrap() {
            PlaybinEvent::AsyncError(err) => {
                assert_eq!(err, expected);
                break;
            }
            _ => continue,
        }
    }

    assert_eq!(ctx.playbin.async_error(), Some(expected.clone()));
    assert_eq!(ctx.playbin.state(), PlaybackState::Stopped);
    // The reset completed before the event went out
    assert_eq!(ctx.engine.engine_state(), EngineState::Null);
    assert_eq!(ctx.playbin.take_async_error(), Some(expected));
    assert_eq!(ctx.playbin.async_error(), None);
}

#[tokio::test]
async fn test_duration_is_cached_until_changed() {
    let ctx = TestContext::new().await;
    ctx.playing().await;
    let mut events = ctx.playbin.subscribe();

    assert_eq!(ctx.playbin.duration().unwrap(), Duration::from_secs(120));
    assert_eq!(ctx.playbin.duration().unwrap(), Duration::from_secs(120));
    assert_eq!(ctx.engine.count_calls("duration"), 1);

    ctx.engine.set_duration(Some(Duration::from_secs(90)));
    ctx.engine
        .post(async_playbin::player::BusMessage::DurationChanged);
    assert_eq!(events.recv().await.unwrap(), PlaybinEvent::DurationChanged);

    assert_eq!(ctx.playbin.duration().unwrap(), Duration::from_secs(90));
    assert_eq!(ctx.engine.count_calls("duration"), 2);
}

#[tokio::test]
async fn test_state_can_be_watched() {
    let ctx = TestContext::new().await;
    let mut state = ctx.playbin.watch_state();
    assert_eq!(*state.borrow(), PlaybackState::Stopped);

    ctx.playing().await;
    state.changed().await.unwrap();
    assert_eq!(*state.borrow_and_update(), PlaybackState::Playing);

    ctx.playbin.pause().await.unwrap();
    state.changed().await.unwrap();
    assert_eq!(*state.borrow_and_update(), PlaybackState::Paused);
}
