//! Concurrent request executor: bounded thread pool, connection acceptor,
//! and the per-connection line-framed I/O loop (§4.13–§4.15).

pub mod acceptor;
pub mod connection;
pub mod thread_pool;

pub use acceptor::ConnectionAcceptor;
pub use connection::ConnectionContext;
pub use thread_pool::ThreadPool;
