//! Ratelimit scheduler scenarios against a scripted service.

mod common;

use std::time::Duration;

use common::ScriptedRest;
use cordwire::{
    Command, CommandResponse, CordError, Method, RatelimitHeaders, RatelimitScheduler, RouteKey,
    TaskScheduler, TransportError,
};
use serde_json::json;
use tokio::time::Instant;

fn scheduler(transport: std::sync::Arc<ScriptedRest>) -> RatelimitScheduler {
    RatelimitScheduler::new(transport, TaskScheduler::new())
}

fn post(channel: u64, n: usize) -> Command {
    Command::rest_json(
        Method::Post,
        format!("/channels/{channel}/messages"),
        json!({ "n": n }),
    )
}

fn sequence_number(command: &Command) -> usize {
    match command {
        Command::Rest(rest) => rest
            .body
            .as_ref()
            .and_then(|b| b["n"].as_u64())
            .and_then(|n| usize::try_from(n).ok())
            .unwrap(),
        Command::Gateway(_) => panic!("unexpected gateway command"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_eleventh_request_waits_for_reset() {
    let start = Instant::now();
    let reset_at = start + Duration::from_secs(2);
    let transport = ScriptedRest::new(move |n, _| {
        let remaining = 9_u32.saturating_sub(u32::try_from(n).unwrap());
        Ok(CommandResponse::ok().with_ratelimit(RatelimitHeaders::new(remaining, 10, reset_at)))
    });
    let scheduler = scheduler(transport.clone());

    let handles: Vec<_> = (0..11).map(|n| scheduler.submit(post(1, n))).collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let sent = transport.sent_at();
    assert_eq!(sent.len(), 11);
    assert!(sent[..10].iter().all(|&at| at < reset_at));
    assert!(sent[10] >= reset_at, "eleventh request sent before reset");
}

#[tokio::test(start_paused = true)]
async fn test_one_in_flight_per_bucket_in_submission_order() {
    let transport =
        ScriptedRest::with_latency(Duration::from_millis(100), |_, _| Ok(CommandResponse::ok()));
    let scheduler = scheduler(transport.clone());

    let mut handles = Vec::new();
    for n in 0..5 {
        handles.push(scheduler.submit(post(1, n)));
        handles.push(scheduler.submit(post(2, n)));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let received = transport.received();
    assert_eq!(received.len(), 10);
    // Two buckets drain side by side, one request each at a time.
    assert_eq!(transport.max_in_flight(), 2);

    let first = RouteKey::rest(Method::Post, "/channels/1/messages");
    let order: Vec<usize> = received
        .iter()
        .filter(|r| r.route == first)
        .map(|r| sequence_number(&r.command))
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);

    let times: Vec<Instant> = received
        .iter()
        .filter(|r| r.route == first)
        .map(|r| r.at)
        .collect();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(100));
    }
}

#[tokio::test(start_paused = true)]
async fn test_over_limit_answer_is_retried_after_delay() {
    let transport = ScriptedRest::new(|_, _| Ok(CommandResponse::ok()));
    transport.queue_replies(vec![Err(TransportError::TooManyRequests {
        retry_after: Duration::from_secs(3),
        global: false,
    })]);
    let scheduler = scheduler(transport.clone());

    let first = scheduler.submit(post(1, 0));
    let second = scheduler.submit(post(1, 1));
    assert_eq!(first.await.unwrap().status, 200);
    second.await.unwrap();

    let received = transport.received();
    assert_eq!(received.len(), 3);
    assert_eq!(sequence_number(&received[0].command), 0);
    assert_eq!(sequence_number(&received[1].command), 0);
    assert_eq!(sequence_number(&received[2].command), 1);
    assert!(received[1].at - received[0].at >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_global_limit_holds_every_bucket() {
    let start = Instant::now();
    let transport = ScriptedRest::new(|_, _| Ok(CommandResponse::ok()));
    transport.queue_replies(vec![Err(TransportError::TooManyRequests {
        retry_after: Duration::from_secs(5),
        global: true,
    })]);
    let scheduler = scheduler(transport.clone());

    let first = scheduler.submit(post(1, 0));
    while transport.received().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let other = scheduler.submit(post(2, 0));
    first.await.unwrap();
    other.await.unwrap();

    let received = transport.received();
    assert_eq!(received.len(), 3);
    for later in &received[1..] {
        assert!(later.at >= start + Duration::from_secs(5));
    }
    assert!(!scheduler.registry().global_lock().is_active(Instant::now()));
}

#[tokio::test(start_paused = true)]
async fn test_canceled_command_is_never_sent() {
    let transport =
        ScriptedRest::with_latency(Duration::from_secs(1), |_, _| Ok(CommandResponse::ok()));
    let scheduler = scheduler(transport.clone());

    let first = scheduler.submit(post(1, 0));
    let second = scheduler.submit(post(1, 1));
    second.cancel();

    first.await.unwrap();
    assert!(matches!(second.await, Err(CordError::Canceled)));
    assert_eq!(transport.received().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_wait_withdraws_queued_command() {
    let reset_at = Instant::now() + Duration::from_secs(10);
    let transport = ScriptedRest::new(move |_, _| {
        Ok(CommandResponse::ok().with_ratelimit(RatelimitHeaders::new(0, 1, reset_at)))
    });
    let scheduler = scheduler(transport.clone());

    scheduler.submit(post(1, 0)).await.unwrap();
    let late = scheduler.submit(post(1, 1));
    let result = late.wait_timeout(Duration::from_secs(1)).await;
    assert!(matches!(result, Err(CordError::Timeout(_))));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(transport.received().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_handle_still_sends() {
    let transport = ScriptedRest::new(|_, _| Ok(CommandResponse::ok()));
    let scheduler = scheduler(transport.clone());

    drop(scheduler.submit(post(1, 0)));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.received().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failures_reach_the_submitter() {
    let transport = ScriptedRest::new(|_, _| Ok(CommandResponse::ok()));
    let mut missing = CommandResponse::ok().with_body(json!({ "message": "Unknown Channel" }));
    missing.status = 404;
    transport.queue_replies(vec![
        Ok(missing),
        Err(TransportError::Failed("connection reset".to_string())),
    ]);
    let scheduler = scheduler(transport.clone());

    let not_found = scheduler.submit(post(1, 0));
    let broken = scheduler.submit(post(1, 1));
    let fine = scheduler.submit(post(1, 2));

    match not_found.await {
        Err(CordError::Status { status, message }) => {
            assert_eq!(status, 404);
            assert!(message.contains("Unknown Channel"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert!(matches!(broken.await, Err(CordError::Transport(_))));
    fine.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_fails_queued_commands() {
    let reset_at = Instant::now() + Duration::from_secs(30);
    let transport = ScriptedRest::new(move |_, _| {
        Ok(CommandResponse::ok().with_ratelimit(RatelimitHeaders::new(0, 1, reset_at)))
    });
    let scheduler = scheduler(transport.clone());

    scheduler.submit(post(1, 0)).await.unwrap();
    let waiting = scheduler.submit(post(1, 1));
    let queued = scheduler.submit(post(1, 2));
    tokio::time::sleep(Duration::from_secs(1)).await;

    scheduler.shutdown();
    assert!(matches!(queued.await, Err(CordError::Canceled)));
    assert!(matches!(waiting.await, Err(CordError::Canceled)));
    assert!(matches!(
        scheduler.submit(post(2, 0)).await,
        Err(CordError::Canceled)
    ));
    assert_eq!(transport.received().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_send_does_not_wedge_bucket() {
    let transport = ScriptedRest::new(|n, _| {
        assert_ne!(n, 0, "send blew up");
        Ok(CommandResponse::ok())
    });
    let scheduler = scheduler(transport.clone());

    let broken = scheduler.submit(post(1, 0));
    let queued = scheduler.submit(post(1, 1));
    assert!(matches!(broken.await, Err(CordError::Transport(_))));
    queued.await.unwrap();

    let later = scheduler
        .submit(post(1, 2))
        .wait_timeout(Duration::from_secs(5))
        .await;
    assert_eq!(later.unwrap().status, 200);
    assert_eq!(transport.received().len(), 3);
}
