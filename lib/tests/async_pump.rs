//! Asynchronous dispatch: completion-pump delivery on the host thread.

mod common;

use {
    common::{test_engine, ManualHostLoop, TestServer},
    hostbridge::{Outcome, RequestSpec},
    hyper::{Body, Response},
    std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    },
};

#[test]
fn async_request_returns_a_handle_and_delivers_once_on_the_host_thread() {
    let server = TestServer::start_delayed(Duration::from_millis(100), |_parts, _body| {
        Response::new(Body::from("eventually"))
    });
    let host = Arc::new(ManualHostLoop::default());
    let engine = test_engine(Arc::clone(&host));

    let host_thread = std::thread::current().id();
    let fired = Arc::new(AtomicUsize::new(0));
    let delivered = Arc::new(Mutex::new(None));

    let spec = RequestSpec::new("get", &server.url("/slow")).unwrap();
    let handle = {
        let fired = Arc::clone(&fired);
        let delivered = Arc::clone(&delivered);
        engine.request(
            spec,
            -1.0,
            Box::new(move |outcome| {
                assert_eq!(
                    std::thread::current().id(),
                    host_thread,
                    "callback must run on the host thread"
                );
                fired.fetch_add(1, Ordering::SeqCst);
                *delivered.lock().unwrap() = Some(outcome);
            }),
        )
    };

    // The call returns immediately with a live handle; nothing has been
    // delivered yet.
    let handle = handle.expect("async mode returns a handle");
    assert!(handle.is_pending());
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    let completed = host.run_until(Duration::from_secs(5), || {
        fired.load(Ordering::SeqCst) > 0
    });
    assert!(completed, "callback never fired");

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(
        delivered.lock().unwrap().take().unwrap(),
        Outcome::Ok(bytes::Bytes::from("eventually"))
    );
    assert!(!handle.is_pending());
    assert_eq!(engine.pending_sessions(), 0);

    // The pump timer retired itself after delivery.
    host.run_ticks();
    assert_eq!(host.active_timers(), 0);

    // Extra loop turns must not re-deliver.
    host.run_until(Duration::from_millis(50), || false);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn many_outstanding_requests_each_deliver_exactly_once() {
    let server = TestServer::start(|parts, _body| {
        Response::new(Body::from(parts.uri.path().to_owned()))
    });
    let host = Arc::new(ManualHostLoop::default());
    let engine = test_engine(Arc::clone(&host));

    let fired = Arc::new(AtomicUsize::new(0));
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for i in 0..8 {
        let fired = Arc::clone(&fired);
        let bodies = Arc::clone(&bodies);
        let spec = RequestSpec::new("get", &server.url(&format!("/req-{i}"))).unwrap();
        let handle = engine.request(
            spec,
            -1.0,
            Box::new(move |outcome| {
                fired.fetch_add(1, Ordering::SeqCst);
                bodies.lock().unwrap().push(outcome.into_parts().1);
            }),
        );
        handles.push(handle.expect("async handle"));
    }
    assert_eq!(engine.pending_sessions(), 8);

    let done = host.run_until(Duration::from_secs(5), || {
        fired.load(Ordering::SeqCst) == 8
    });
    assert!(done, "only {} of 8 callbacks fired", fired.load(Ordering::SeqCst));

    let mut bodies: Vec<_> = bodies
        .lock()
        .unwrap()
        .iter()
        .map(|b| String::from_utf8(b.to_vec()).unwrap())
        .collect();
    bodies.sort();
    let expected: Vec<_> = (0..8).map(|i| format!("/req-{i}")).collect();
    assert_eq!(bodies, expected);

    assert_eq!(engine.pending_sessions(), 0);
    host.run_ticks();
    assert_eq!(host.active_timers(), 0);
}

#[test]
fn async_failure_outcomes_are_pumped_like_successes() {
    let host = Arc::new(ManualHostLoop::default());
    let engine = test_engine(Arc::clone(&host));

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let spec = RequestSpec::new("get", "http://127.0.0.1:9/").unwrap();
    let handle = {
        let delivered = Arc::clone(&delivered);
        engine.request(
            spec,
            -1.0,
            Box::new(move |outcome| delivered.lock().unwrap().push(outcome)),
        )
    };

    // The dial happens inside the driver task, so a refused connection
    // surfaces after the handle was returned; delivery still happens through
    // the pump.
    let _handle = handle.expect("async mode returns a handle");
    let done = host.run_until(Duration::from_secs(5), || {
        !delivered.lock().unwrap().is_empty()
    });
    assert!(done, "failure outcome never delivered");

    let delivered = delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert!(!delivered[0].success());
}
