//! Thin process-lifecycle wrapper around [`Engine`]: binds the listener,
//! wires the dispatcher to the connection acceptor, and drives graceful
//! shutdown (§5, §9 — "a top-level `Engine`/`Server` aggregator").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::Result;
use crate::net::connection::ConnectionContext;
use crate::net::ConnectionAcceptor;
use crate::protocol::Dispatcher;

/// How long `Server::run` waits for `active_connections` to drain once the
/// acceptor has stopped taking new ones, before the thread pool's own
/// shutdown timeout takes over.
const CONNECTION_DRAIN_POLL_MS: u64 = 20;

pub struct Server {
    engine: Arc<Engine>,
    acceptor: ConnectionAcceptor,
    dispatcher: Arc<Dispatcher>,
    shutdown_requested: Arc<(Mutex<bool>, Condvar)>,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let max_query_length = config.api.max_query_length;
        let acceptor = ConnectionAcceptor::bind(&config.api.tcp, &config.network, &config.perf, max_query_length)?;
        let engine = Arc::new(Engine::new(config)?);
        let dispatcher = Arc::new(Dispatcher::new(engine.clone()));

        Ok(Self {
            engine,
            acceptor,
            dispatcher,
            shutdown_requested: Arc::new((Mutex::new(false), Condvar::new())),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// The address actually bound; useful when `config.api.tcp.port` was `0`.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Registers a `SIGINT`/`SIGTERM` handler that triggers the same
    /// graceful shutdown path as an explicit `Server::stop` call.
    pub fn install_signal_handler(&self) -> Result<()> {
        let flag = self.shutdown_requested.clone();
        ctrlc::set_handler(move || {
            let (lock, cvar) = &*flag;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        })
        .map_err(|e| crate::error::Error::InternalError(format!("failed to install signal handler: {e}")))?;
        Ok(())
    }

    /// Binds the listener, starts the accept loop, and blocks the calling
    /// thread until a shutdown is requested. Returns after every background
    /// worker has been joined.
    pub fn run(&self) -> Result<()> {
        let pool = self.engine.thread_pool.clone();
        let dispatcher = self.dispatcher.clone();

        let dispatch = Arc::new(move |line: &str, ctx: &mut ConnectionContext| -> String {
            dispatcher.dispatch(line, ctx)
        });

        let stats_open = self.engine.clone();
        let stats_close = self.engine.clone();
        let on_open: Arc<dyn Fn() + Send + Sync> = Arc::new(move || stats_open.stats.connection_opened());
        let on_close: Arc<dyn Fn() + Send + Sync> = Arc::new(move || stats_close.stats.connection_closed());

        self.acceptor.run(pool, dispatch, on_open, on_close)?;

        let (lock, cvar) = &*self.shutdown_requested;
        let mut requested = lock.lock().unwrap();
        while !*requested {
            requested = cvar.wait(requested).unwrap();
        }
        drop(requested);

        self.shutdown(true, 5000);
        Ok(())
    }

    /// Requests shutdown from outside the blocked `run` call (e.g. a test
    /// harness driving the server on a background thread).
    pub fn request_shutdown(&self) {
        let (lock, cvar) = &*self.shutdown_requested;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    /// Orderly shutdown (§5): acceptor stops first, then connections are
    /// given `timeout_ms` to drain, then the thread pool drains with its own
    /// budget, then the invalidation worker is stopped and drained
    /// synchronously. Workers are always joined, never detached.
    pub fn shutdown(&self, graceful: bool, timeout_ms: u64) {
        self.acceptor.stop();

        if graceful {
            let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms / 2);
            while self.acceptor.active_connection_count() > 0 && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(CONNECTION_DRAIN_POLL_MS));
            }
        }

        self.engine.thread_pool.shutdown(graceful, timeout_ms / 2);
        self.engine.shutdown_background_workers();
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert_send<T: Send>() {}
    assert_send::<Server>();
    let _ = AtomicBool::new(false);
}
