//! Shared test harness: a local hyper server and a manual host loop.
#![allow(dead_code)] // The exported values are used by other modules in the test suite

use {
    bytes::Bytes,
    hostbridge::{Engine, EngineConfig, HostLoop, HyperTransport, Tick, TickFn, TimerId},
    http::request::Parts,
    hyper::{
        service::{make_service_fn, service_fn},
        Body, Response, Server,
    },
    std::{
        collections::{HashMap, HashSet},
        convert::Infallible,
        net::SocketAddr,
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    },
    tokio::sync::oneshot,
};

/// A local HTTP server running on its own runtime thread.
///
/// The handler sees the request head and the collected body, and returns a
/// complete response; an optional delay before responding simulates a slow
/// upstream.
pub struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(Parts, Bytes) -> Response<Body> + Send + Sync + 'static,
    {
        Self::start_delayed(Duration::ZERO, handler)
    }

    pub fn start_delayed<F>(delay: Duration, handler: F) -> Self
    where
        F: Fn(Parts, Bytes) -> Response<Body> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("test server runtime");
            rt.block_on(async move {
                let make = make_service_fn(move |_conn| {
                    let handler = Arc::clone(&handler);
                    async move {
                        Ok::<_, Infallible>(service_fn(move |req| {
                            let handler = Arc::clone(&handler);
                            async move {
                                if !delay.is_zero() {
                                    tokio::time::sleep(delay).await;
                                }
                                let (parts, body) = req.into_parts();
                                let bytes = hyper::body::to_bytes(body)
                                    .await
                                    .expect("request body");
                                Ok::<_, Infallible>(handler(parts, bytes))
                            }
                        }))
                    }
                });

                let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make);
                addr_tx.send(server.local_addr()).expect("report server addr");
                server
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await
                    .expect("test server");
            });
        });

        let addr = addr_rx.recv().expect("server never reported its address");
        Self {
            addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[derive(Default)]
struct LoopState {
    next_id: u64,
    timers: HashMap<u64, TickFn>,
    cancelled: HashSet<u64>,
}

/// A cooperative host loop driven explicitly by the test body, standing in
/// for the embedding host's timer mechanism.
#[derive(Default)]
pub struct ManualHostLoop {
    state: Mutex<LoopState>,
}

impl HostLoop for ManualHostLoop {
    fn schedule_recurring(&self, _interval: Duration, tick: TickFn) -> TimerId {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.timers.insert(id, tick);
        TimerId(id)
    }

    fn cancel_recurring(&self, timer: TimerId) {
        let mut state = self.state.lock().unwrap();
        if state.timers.remove(&timer.0).is_none() {
            // The timer may currently be checked out by `run_ticks`; make
            // sure it is not reinserted.
            state.cancelled.insert(timer.0);
        }
    }
}

impl ManualHostLoop {
    /// Run every scheduled tick once, retiring timers that return
    /// [`Tick::Stop`] or were cancelled from within a tick.
    pub fn run_ticks(&self) {
        let drained: Vec<(u64, TickFn)> = {
            let mut state = self.state.lock().unwrap();
            state.timers.drain().collect()
        };

        let mut keep = Vec::new();
        for (id, mut tick) in drained {
            // Ticks run with the lock released; they may schedule or cancel
            // timers themselves.
            if tick() == Tick::Continue {
                keep.push((id, tick));
            }
        }

        let mut state = self.state.lock().unwrap();
        for (id, tick) in keep {
            if !state.cancelled.remove(&id) {
                state.timers.insert(id, tick);
            }
        }
        state.cancelled.clear();
    }

    /// Cooperatively run ticks until `done` or the deadline. Returns whether
    /// `done` was observed.
    pub fn run_until(&self, deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            self.run_ticks();
            std::thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    pub fn active_timers(&self) -> usize {
        self.state.lock().unwrap().timers.len()
    }
}

/// An engine over the hyper transport with an empty TLS root store; tests
/// only speak plain HTTP to loopback servers.
pub fn test_engine(host: Arc<ManualHostLoop>) -> Engine {
    let tls = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth();
    let transport = Arc::new(HyperTransport::with_tls_config(Arc::new(tls)));
    let config = EngineConfig {
        pump_interval: Duration::from_millis(5),
        ..EngineConfig::default()
    };
    Engine::new(config, transport, host).expect("engine construction")
}
