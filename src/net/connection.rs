//! Per-connection line-framed I/O loop (§4.15).

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RECV_BUFFER_SIZE: usize = 4 * 1024;

/// Per-connection mutable state. Nothing here outlives the connection.
pub struct ConnectionContext {
    pub debug_mode: bool,
    pub peer: String,
}

impl ConnectionContext {
    pub fn new(peer: String) -> Self {
        Self {
            debug_mode: false,
            peer,
        }
    }
}

pub type Dispatch = dyn Fn(&str, &mut ConnectionContext) -> String + Send + Sync;

/// Reads newline-framed commands from `stream`, hands each line to
/// `dispatch`, and writes back `<response>\r\n`. Returns when the peer
/// closes the connection, `shutdown` is set, or an unrecoverable I/O error
/// occurs.
pub fn handle_connection(
    mut stream: TcpStream,
    peer: String,
    max_query_length: usize,
    shutdown: Arc<AtomicBool>,
    dispatch: Arc<Dispatch>,
) {
    let accumulated_cap = max_query_length.saturating_mul(10).max(RECV_BUFFER_SIZE);
    let _ = stream.set_read_timeout(Some(Duration::from_millis(250)));

    let mut ctx = ConnectionContext::new(peer);
    let mut accumulated: Vec<u8> = Vec::new();
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }

        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                accumulated.extend_from_slice(&buf[..n]);
                if accumulated.len() > accumulated_cap {
                    log::warn!(
                        "connection {} exceeded accumulated buffer cap ({} bytes) without a newline, closing",
                        ctx.peer,
                        accumulated_cap
                    );
                    return;
                }

                while let Some(pos) = accumulated.iter().position(|&b| b == b'\n') {
                    let mut line: Vec<u8> = accumulated.drain(..=pos).collect();
                    line.pop(); // trailing \n
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    let line = match String::from_utf8(line) {
                        Ok(s) => s,
                        Err(_) => {
                            if !write_response(&mut stream, "ERROR invalid utf-8 in request") {
                                return;
                            }
                            continue;
                        }
                    };
                    if line.len() > max_query_length {
                        if !write_response(&mut stream, "ERROR query exceeds max_query_length") {
                            return;
                        }
                        continue;
                    }

                    let response = dispatch(&line, &mut ctx);
                    if !write_response(&mut stream, &response) {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("connection {} read error: {e}", ctx.peer);
                return;
            }
        }
    }
}

/// Writes `line` followed by `\r\n`, looping on partial sends. Returns
/// `false` on broken pipe / reset, signaling the caller to close up.
fn write_response(stream: &mut TcpStream, line: &str) -> bool {
    let mut out = Vec::with_capacity(line.len() + 2);
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(b"\r\n");

    let mut sent = 0;
    while sent < out.len() {
        match stream.write(&out[sent..]) {
            Ok(0) => return false,
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::BrokenPipe || e.kind() == ErrorKind::ConnectionReset => {
                return false;
            }
            Err(e) => {
                log::debug!("connection write error: {e}");
                return false;
            }
        }
    }
    true
}
