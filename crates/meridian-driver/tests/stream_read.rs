//! Server-streaming behavior over the scripted transport.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{RunRequest, RunResult, WATCH_METHOD, WATCH_REQUEST_URL, result_payload, single_node_driver};
use meridian_driver::{
    Context, DriverConfig, DriverError, DriverTrace, StatusCode, StreamEvent, StreamScript,
    TransportReason, TypedStreamRead,
};
use tokio::sync::mpsc;

/// What the process callback observed, forwarded out for assertions.
#[derive(Debug)]
enum Seen {
    Message(String),
    Done {
        error: Option<String>,
        timeout_class: bool,
    },
}

fn watch_op(
    tx: mpsc::UnboundedSender<Seen>,
) -> TypedStreamRead<RunRequest, RunResult, impl FnMut(StreamEvent<RunResult>)> {
    TypedStreamRead::new(
        WATCH_METHOD,
        WATCH_REQUEST_URL,
        RunRequest {
            query: "WATCH changes".into(),
        },
        move |event: StreamEvent<RunResult>| {
            let seen = match event {
                StreamEvent::Message(message) => Seen::Message(message.answer),
                StreamEvent::Done(error) => Seen::Done {
                    timeout_class: error.as_ref().is_some_and(DriverError::is_timeout_class),
                    error: error.map(|err| err.to_string()),
                },
            };
            let _ = tx.send(seen);
        },
    )
}

async fn drain(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Vec<Seen> {
    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn happy_path_delivers_messages_then_eof() {
    let (driver, endpoint, _network) = single_node_driver(DriverConfig::new("/prod/orders")).await;
    endpoint.enqueue_stream(
        StreamScript::new()
            .payload(result_payload("one"))
            .payload(result_payload("two"))
            .payload(result_payload("three")),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    driver
        .stream_read(&Context::background(), watch_op(tx))
        .await
        .unwrap();

    let seen = drain(&mut rx).await;
    match seen.as_slice() {
        [
            Seen::Message(a),
            Seen::Message(b),
            Seen::Message(c),
            Seen::Done { error: None, .. },
        ] => {
            assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("one", "two", "three"));
        }
        other => panic!("unexpected event sequence: {other:?}"),
    }

    // A clean end-of-stream settles the operation as a success.
    let mut succeeded = 0;
    let mut errs = 0.0;
    driver.stats(|row| {
        succeeded += row.stats.op_succeeded;
        errs += row.stats.errs_per_minute;
    });
    assert_eq!(succeeded, 1);
    assert_eq!(errs, 0.0);
    driver.close().await.unwrap();
}

#[tokio::test]
async fn server_error_mid_flight_is_terminal() {
    let stream_done_fired = Arc::new(AtomicBool::new(false));
    let trace = {
        let fired = stream_done_fired.clone();
        DriverTrace::new().with_stream(move |_start| {
            let fired = fired.clone();
            Box::new(move |done: meridian_driver::trace::StreamDone| {
                assert!(done.error.is_some());
                fired.store(true, Ordering::SeqCst);
            })
        })
    };
    let (driver, endpoint, _network) =
        single_node_driver(DriverConfig::new("/prod/orders").with_trace(trace)).await;
    endpoint.enqueue_stream(
        StreamScript::new()
            .payload(result_payload("one"))
            .payload(result_payload("two"))
            .message(StatusCode::Overloaded, vec![], None),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    driver
        .stream_read(&Context::background(), watch_op(tx))
        .await
        .unwrap();

    let seen = drain(&mut rx).await;
    match seen.as_slice() {
        [
            Seen::Message(a),
            Seen::Message(b),
            Seen::Done {
                error: Some(err),
                timeout_class: false,
            },
        ] => {
            assert_eq!((a.as_str(), b.as_str()), ("one", "two"));
            assert!(err.contains("Overloaded"), "{err}");
        }
        other => panic!("unexpected event sequence: {other:?}"),
    }
    assert!(stream_done_fired.load(Ordering::SeqCst));
    driver.close().await.unwrap();
}

#[tokio::test]
async fn transport_failure_mid_stream_keeps_its_reason() {
    let (driver, endpoint, _network) = single_node_driver(DriverConfig::new("/prod/orders")).await;
    endpoint.enqueue_stream(
        StreamScript::new()
            .payload(result_payload("one"))
            .transport_error(TransportReason::Unavailable, "connection reset"),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    driver
        .stream_read(&Context::background(), watch_op(tx))
        .await
        .unwrap();

    let seen = drain(&mut rx).await;
    match seen.as_slice() {
        [
            Seen::Message(_),
            Seen::Done {
                error: Some(err),
                timeout_class: true,
            },
        ] => {
            assert!(err.contains("connection reset"), "{err}");
        }
        other => panic!("unexpected event sequence: {other:?}"),
    }

    let mut failed = 0;
    let mut errs = 0.0;
    driver.stats(|row| {
        failed += row.stats.op_failed;
        errs += row.stats.errs_per_minute;
    });
    assert_eq!(failed, 1);
    assert_eq!(errs, 1.0);
    driver.close().await.unwrap();
}

#[tokio::test]
async fn cancelling_the_context_stops_the_receive_loop() {
    let (driver, endpoint, _network) = single_node_driver(DriverConfig::new("/prod/orders")).await;
    endpoint.enqueue_stream(StreamScript::new().payload(result_payload("one")).hang());

    let (ctx, source) = Context::background().with_cancel();
    let (tx, mut rx) = mpsc::unbounded_channel();
    driver.stream_read(&ctx, watch_op(tx)).await.unwrap();

    match rx.recv().await {
        Some(Seen::Message(answer)) => assert_eq!(answer, "one"),
        other => panic!("unexpected first event: {other:?}"),
    }
    source.cancel();

    let rest = drain(&mut rx).await;
    match rest.as_slice() {
        [
            Seen::Done {
                error: Some(err),
                timeout_class: true,
            },
        ] => {
            assert!(err.contains("cancelled"), "{err}");
        }
        other => panic!("unexpected trailing events: {other:?}"),
    }
    driver.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stream_timeout_bounds_the_stream_lifetime() {
    let (driver, endpoint, _network) = single_node_driver(
        DriverConfig::new("/prod/orders").with_stream_timeout(Duration::from_millis(50)),
    )
    .await;
    endpoint.enqueue_stream(StreamScript::new().hang());

    let (tx, mut rx) = mpsc::unbounded_channel();
    driver
        .stream_read(&Context::background(), watch_op(tx))
        .await
        .unwrap();

    let seen = drain(&mut rx).await;
    match seen.as_slice() {
        [
            Seen::Done {
                error: Some(err),
                timeout_class: true,
            },
        ] => {
            assert!(err.contains("deadline"), "{err}");
        }
        other => panic!("unexpected event sequence: {other:?}"),
    }
    driver.close().await.unwrap();
}

#[tokio::test]
async fn closed_driver_rejects_new_streams() {
    let (driver, _endpoint, _network) = single_node_driver(DriverConfig::new("/prod/orders")).await;
    driver.close().await.unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = driver
        .stream_read(&Context::background(), watch_op(tx))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::Closed));
}
