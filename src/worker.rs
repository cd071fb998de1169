//! Worker pool: each worker thread owns a `mio::Poll`-driven event loop over
//! its own acceptor plus its own accepted client connections.
//!
//! Grid cells go out over the wire as single signed bytes (`i8`); every
//! worker re-evaluates the timeout sweep / liveness check / fanout pass
//! every `poll_timeout` regardless of whether any fd was actually readable,
//! since `Poll::poll` is given a bounded timeout rather than `None`.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::codec::{self, FrameBuffer, Opcode};
use crate::config::Config;
use crate::state::{Direction, SharedState};

const SERVER: Token = Token(0);
const EVENT_CAPACITY: usize = 256;

/// Per-connection state local to one worker: never read by another thread.
struct ConnState {
    stream: TcpStream,
    slot_id: Option<usize>,
    last_version: u64,
    last_activity: Instant,
    buf: FrameBuffer,
}

/// Binds a listener with `SO_REUSEADDR`/`SO_REUSEPORT` so every worker can
/// hold its own acceptor on the same port: the closest portable analogue to
/// the reference's N forked processes sharing one `server_fd`, with the
/// kernel serializing accept.
fn bind_shared_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener))
}

pub fn run(
    worker_id: usize,
    config: Config,
    shared: SharedState,
    shutdown: Arc<AtomicBool>,
) -> io::Result<()> {
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let mut listener = bind_shared_listener(addr)?;

    let mut poll = Poll::new()?;
    poll.registry()
        .register(&mut listener, SERVER, Interest::READABLE)?;

    let mut events = Events::with_capacity(EVENT_CAPACITY);
    let mut connections: HashMap<Token, ConnState> = HashMap::new();
    let mut next_token = 1usize;

    info!(worker_id, "worker started");

    while !shutdown.load(Ordering::Relaxed) {
        match poll.poll(&mut events, Some(config.poll_timeout())) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        sweep_and_fanout(&mut poll, &shared, &config, &mut connections);

        for event in events.iter() {
            if event.token() == SERVER {
                accept_new_connections(&mut listener, &mut poll, &mut connections, &mut next_token);
                continue;
            }

            if !event.is_readable() {
                continue;
            }

            let token = event.token();
            let should_close = service_readable(token, &shared, &mut connections);
            if should_close {
                close_connection(token, &mut poll, &shared, &mut connections);
            }
        }
    }

    for (_, conn) in connections.iter_mut() {
        if let Some(slot_id) = conn.slot_id {
            shared.release(slot_id);
        }
        let _ = poll.registry().deregister(&mut conn.stream);
    }

    info!(worker_id, "worker stopped");
    Ok(())
}

/// Timeout sweep, liveness check, and version-lag fanout, run once per loop
/// iteration regardless of socket readiness.
fn sweep_and_fanout(
    poll: &mut Poll,
    shared: &SharedState,
    config: &Config,
    connections: &mut HashMap<Token, ConnState>,
) {
    let now = Instant::now();
    let current_version = shared.read_version();
    let mut to_close: Vec<Token> = Vec::new();

    for (&token, conn) in connections.iter_mut() {
        if now.duration_since(conn.last_activity) > config.client_timeout() {
            debug!(?token, "client idle timeout");
            to_close.push(token);
            continue;
        }

        if let Some(slot_id) = conn.slot_id {
            if !shared.is_slot_active(slot_id) {
                let _ = codec::send_frame(&mut conn.stream, Opcode::Die.into(), &[]);
                to_close.push(token);
                continue;
            }

            if conn.last_version < current_version {
                let grid = shared.snapshot_grid();
                let payload: Vec<u8> = grid.iter().map(|c| c.0 as i8 as u8).collect();
                match codec::send_frame(&mut conn.stream, Opcode::Update.into(), &payload) {
                    Ok(()) => conn.last_version = current_version,
                    Err(e) => {
                        warn!(?token, error = %e, "fanout send failed");
                        to_close.push(token);
                    }
                }
            }
        }
    }

    for token in to_close {
        close_connection(token, poll, shared, connections);
    }
}

fn accept_new_connections(
    listener: &mut TcpListener,
    poll: &mut Poll,
    connections: &mut HashMap<Token, ConnState>,
    next_token: &mut usize,
) {
    loop {
        match listener.accept() {
            Ok((mut stream, addr)) => {
                let token = Token(*next_token);
                *next_token += 1;
                if let Err(e) = poll
                    .registry()
                    .register(&mut stream, token, Interest::READABLE)
                {
                    warn!(error = %e, "failed to register accepted connection");
                    continue;
                }
                debug!(%addr, ?token, "accepted connection");
                connections.insert(
                    token,
                    ConnState {
                        stream,
                        slot_id: None,
                        last_version: 0,
                        last_activity: Instant::now(),
                        buf: FrameBuffer::new(),
                    },
                );
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

/// Reads whatever is available, decodes any complete frames, and dispatches
/// them. Returns `true` if the connection should be closed.
fn service_readable(token: Token, shared: &SharedState, connections: &mut HashMap<Token, ConnState>) -> bool {
    let conn = match connections.get_mut(&token) {
        Some(c) => c,
        None => return false,
    };

    let mut scratch = [0u8; 4096];
    loop {
        match conn.stream.read(&mut scratch) {
            Ok(0) => return true,
            Ok(n) => conn.buf.feed(&scratch[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return true,
        }
    }

    conn.last_activity = Instant::now();

    loop {
        match conn.buf.try_decode() {
            Ok(Some((raw_opcode, payload))) => {
                if dispatch(raw_opcode, &payload, conn, shared) == Disposition::Close {
                    return true;
                }
            }
            Ok(None) => return false,
            Err(e) => {
                debug!(?token, error = %e, "framing error, closing connection");
                return true;
            }
        }
    }
}

#[derive(PartialEq, Eq)]
enum Disposition {
    Continue,
    Close,
}

/// Dispatches one decoded message by opcode. Unknown opcodes and
/// messages with a payload length that doesn't match their contract are
/// silently ignored (still counted as activity by the caller) rather than
/// causing the kind of out-of-bounds read the reference's
/// `handle_client_message` was prone to on a zero-length MOVE.
fn dispatch(raw_opcode: u16, payload: &[u8], conn: &mut ConnState, shared: &SharedState) -> Disposition {
    match Opcode::from(raw_opcode) {
        Opcode::LoginReq => {
            if !payload.is_empty() || conn.slot_id.is_some() {
                return Disposition::Continue;
            }
            match shared.try_admit() {
                Some(slot_id) => {
                    conn.slot_id = Some(slot_id);
                    let raw = (slot_id as u32).to_be_bytes();
                    let _ = codec::send_frame(&mut conn.stream, Opcode::LoginResp.into(), &raw);
                    Disposition::Continue
                }
                None => {
                    let _ = codec::send_frame(&mut conn.stream, Opcode::Error.into(), b"Server Full");
                    Disposition::Close
                }
            }
        }
        Opcode::Move => {
            if payload.len() != 1 {
                return Disposition::Continue;
            }
            if let (Some(slot_id), Some(dir)) = (conn.slot_id, Direction::from_wire_byte(payload[0])) {
                shared.apply_move(slot_id, dir);
            }
            Disposition::Continue
        }
        Opcode::Logout => {
            if let Some(slot_id) = conn.slot_id.take() {
                shared.release(slot_id);
            }
            Disposition::Close
        }
        Opcode::Heartbeat => {
            let _ = codec::send_frame(&mut conn.stream, Opcode::HeartbeatAck.into(), &[]);
            Disposition::Continue
        }
        // Server->client-only opcodes and anything unrecognized: benign no-op.
        _ => Disposition::Continue,
    }
}

fn close_connection(
    token: Token,
    poll: &mut Poll,
    shared: &SharedState,
    connections: &mut HashMap<Token, ConnState>,
) {
    if let Some(mut conn) = connections.remove(&token) {
        if let Some(slot_id) = conn.slot_id {
            shared.release(slot_id);
        }
        let _ = poll.registry().deregister(&mut conn.stream);
    }
}
