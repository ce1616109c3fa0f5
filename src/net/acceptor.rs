//! Connection acceptor: listen, CIDR admission, FD tracking, dispatch (§4.14).

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use ipnet::IpNet;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::{NetworkConfig, PerfConfig, TcpConfig};
use crate::error::{Error, Result};
use crate::net::connection::{self, Dispatch};
use crate::net::thread_pool::ThreadPool;

pub struct ConnectionAcceptor {
    listener: TcpListener,
    allow_cidrs: Vec<IpNet>,
    max_connections: usize,
    max_query_length: usize,
    active_connections: Arc<Mutex<HashSet<u64>>>,
    active_count: Arc<AtomicUsize>,
    next_conn_id: AtomicUsize,
    shutdown: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionAcceptor {
    pub fn bind(tcp: &TcpConfig, network: &NetworkConfig, perf: &PerfConfig, max_query_length: usize) -> Result<Self> {
        let addr: IpAddr = tcp
            .bind
            .parse()
            .map_err(|e| Error::NetworkInvalidBindAddress(format!("{}: {e}", tcp.bind)))?;
        let socket_addr = SocketAddr::new(addr, tcp.port);

        let domain = if socket_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| Error::NetworkSocketCreationFailed(e.to_string()))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| Error::NetworkSocketCreationFailed(e.to_string()))?;
        socket
            .set_keepalive(true)
            .map_err(|e| Error::NetworkSocketCreationFailed(e.to_string()))?;
        let _ = socket.set_recv_buffer_size(256 * 1024);
        let _ = socket.set_send_buffer_size(256 * 1024);
        socket
            .bind(&socket_addr.into())
            .map_err(|e| Error::NetworkBindFailed(e.to_string()))?;
        socket
            .listen(1024)
            .map_err(|e| Error::NetworkListenFailed(e.to_string()))?;
        let listener: TcpListener = socket.into();

        let allow_cidrs = network
            .allow_cidrs
            .iter()
            .filter_map(|cidr| match cidr.parse::<IpNet>() {
                Ok(net) => Some(net),
                Err(_) => {
                    log::warn!("skipping invalid CIDR entry in network.allow_cidrs: {cidr}");
                    None
                }
            })
            .collect();

        Ok(Self {
            listener,
            allow_cidrs,
            max_connections: perf.max_connections,
            max_query_length,
            active_connections: Arc::new(Mutex::new(HashSet::new())),
            active_count: Arc::new(AtomicUsize::new(0)),
            next_conn_id: AtomicUsize::new(0),
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_thread: Mutex::new(None),
        })
    }

    fn is_allowed(&self, ip: IpAddr) -> bool {
        if self.allow_cidrs.is_empty() {
            return false;
        }
        self.allow_cidrs.iter().any(|net| net.contains(&ip))
    }

    pub fn active_connection_count(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    /// The address actually bound, which differs from `config.api.tcp.port`
    /// when that was `0` (ephemeral port assignment).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawns the dedicated accept-loop thread. `dispatch` is shared across
    /// every connection handed off to `pool`. `on_open`/`on_close` fire once
    /// per admitted connection, letting a transport-agnostic caller (e.g.
    /// [`crate::server::Server`]) track connection-level statistics without
    /// this module depending on `crate::stats`.
    pub fn run(
        &self,
        pool: Arc<ThreadPool>,
        dispatch: Arc<Dispatch>,
        on_open: Arc<dyn Fn() + Send + Sync>,
        on_close: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<()> {
        let listener = self
            .listener
            .try_clone()
            .map_err(|e| Error::NetworkListenFailed(e.to_string()))?;
        let allow_cidrs = self.allow_cidrs.clone();
        let max_connections = self.max_connections;
        let max_query_length = self.max_query_length;
        let active_connections = self.active_connections.clone();
        let active_count = self.active_count.clone();
        let shutdown = self.shutdown.clone();

        let handle = std::thread::spawn(move || {
            let mut next_id = 0u64;
            loop {
                if shutdown.load(Ordering::Acquire) {
                    return;
                }
                let (stream, addr) = match listener.accept() {
                    Ok(pair) => pair,
                    Err(_) => {
                        if shutdown.load(Ordering::Acquire) {
                            return;
                        }
                        continue;
                    }
                };

                if active_count.load(Ordering::Acquire) >= max_connections {
                    log::warn!("rejecting connection from {addr}: max_connections reached");
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                    continue;
                }

                let ip = addr.ip();
                let allowed = allow_cidrs.iter().any(|net| net.contains(&ip));
                if !allowed {
                    log::warn!("rejecting connection from {addr}: not in network.allow_cidrs");
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                    continue;
                }

                let _ = stream.set_read_timeout(Some(Duration::from_millis(250)));

                let conn_id = next_id;
                next_id += 1;
                active_connections.lock().unwrap().insert(conn_id);
                active_count.fetch_add(1, Ordering::AcqRel);

                let active_connections_cb = active_connections.clone();
                let active_count_cb = active_count.clone();
                let shutdown_cb = shutdown.clone();
                let dispatch_cb = dispatch.clone();
                let on_open_cb = on_open.clone();
                let on_close_cb = on_close.clone();
                let peer = addr.to_string();

                let submitted = pool.submit(Box::new(move || {
                    on_open_cb();
                    connection::handle_connection(stream, peer, max_query_length, shutdown_cb, dispatch_cb);
                    on_close_cb();
                    active_connections_cb.lock().unwrap().remove(&conn_id);
                    active_count_cb.fetch_sub(1, Ordering::AcqRel);
                }));

                if !submitted {
                    log::warn!("dropping connection from {addr}: thread pool queue full");
                    active_connections.lock().unwrap().remove(&conn_id);
                    active_count.fetch_sub(1, Ordering::AcqRel);
                }
            }
        });

        *self.accept_thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Unblocks `accept`, joins the accept thread, and closes every tracked
    /// connection.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        // Connecting to ourselves unblocks a thread parked in `accept`.
        if let Ok(addr) = self.listener.local_addr() {
            let _ = TcpStream::connect_timeout(&addr, Duration::from_millis(100));
        }
        if let Some(handle) = self.accept_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.active_connections.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn bind_rejects_invalid_address() {
        let mut cfg = Config::default();
        cfg.api.tcp.bind = "not-an-ip".to_string();
        let err = ConnectionAcceptor::bind(&cfg.api.tcp, &cfg.network, &cfg.perf, 1024 * 1024);
        assert!(matches!(err, Err(Error::NetworkInvalidBindAddress(_))));
    }

    #[test]
    fn bind_succeeds_on_ephemeral_port() {
        let mut cfg = Config::default();
        cfg.api.tcp.port = 0;
        let acceptor = ConnectionAcceptor::bind(&cfg.api.tcp, &cfg.network, &cfg.perf, 1024 * 1024);
        assert!(acceptor.is_ok());
    }

    #[test]
    fn disallowed_cidr_rejects_connection() {
        let mut cfg = Config::default();
        cfg.api.tcp.port = 0;
        cfg.network.allow_cidrs = vec![];
        let acceptor = ConnectionAcceptor::bind(&cfg.api.tcp, &cfg.network, &cfg.perf, 1024 * 1024).unwrap();
        assert!(!acceptor.is_allowed("127.0.0.1".parse().unwrap()));
    }
}
