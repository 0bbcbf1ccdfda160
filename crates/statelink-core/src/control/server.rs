//! Loopback TCP server backed by a fixed worker pool.
//!
//! One acceptor thread hands connections to `max_workers` workers through a
//! bounded queue. A connection that finds the queue full is closed right away.
//! A worker serves one connection at a time; when that connection goes quiet
//! while others wait, the worker holds it aside and rotates to the next one,
//! so an idle client cannot pin a worker. Connections idle past `idle_timeout_ms` are closed.
//! Workers poll the stop flags between reads, so `stop` joins a known set of
//! threads.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::{debug, info, warn};

use super::handler::handle_message;
use super::protocol::{Command, MAX_MESSAGE, Request};
use crate::config::ControlConfig;
use crate::context::Core;
use crate::error::Result;
use crate::memory::layout::timing;
use crate::shutdown::ShutdownSignal;

struct Connection {
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    last_request: Instant,
}

struct ServerShared {
    core: Arc<Core>,
    core_shutdown: Arc<ShutdownSignal>,
    stop: ShutdownSignal,
    read_timeout: Duration,
    idle_timeout: Duration,
}

impl ServerShared {
    fn stopping(&self) -> bool {
        self.stop.is_shutdown() || self.core_shutdown.is_shutdown()
    }
}

pub struct ControlServer {
    shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    acceptor: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl ControlServer {
    /// Bind `127.0.0.1:<port>` and start the acceptor and workers.
    /// A bind failure is returned and nothing is started.
    pub fn start(core: Arc<Core>, config: &ControlConfig) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, config.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(ServerShared {
            core_shutdown: core.shutdown_signal(),
            core,
            stop: ShutdownSignal::new(),
            read_timeout: Duration::from_millis(config.read_timeout_ms.max(1)),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms.max(1)),
        });

        let worker_count = config.max_workers.max(1);
        let (tx, rx) = bounded::<Connection>(worker_count);

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let shared = Arc::clone(&shared);
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("control-worker-{}", index))
                .spawn(move || worker_loop(&shared, rx))?;
            workers.push(handle);
        }

        let acceptor_shared = Arc::clone(&shared);
        let acceptor = thread::Builder::new()
            .name("control-accept".to_string())
            .spawn(move || accept_loop(&acceptor_shared, listener, tx))?;

        info!(
            "Control channel listening on {} ({} workers)",
            local_addr, worker_count
        );

        Ok(Self {
            shared,
            local_addr,
            acceptor: Some(acceptor),
            workers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, let workers finish their current request, join all threads.
    pub fn stop(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };
        self.shared.stop.trigger();
        if acceptor.join().is_err() {
            warn!("Control acceptor panicked");
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Control worker panicked");
            }
        }
        info!("Control channel stopped");
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(shared: &ServerShared, listener: TcpListener, tx: Sender<Connection>) {
    let poll = Duration::from_millis(timing::ACCEPT_POLL_MS);
    let mut next_id: u64 = 0;

    while !shared.stopping() {
        match listener.accept() {
            Ok((stream, peer)) => {
                next_id += 1;
                let connection = Connection {
                    id: next_id,
                    stream,
                    peer,
                    last_request: Instant::now(),
                };
                match tx.try_send(connection) {
                    Ok(()) => debug!("Queued control connection #{} from {}", next_id, peer),
                    Err(TrySendError::Full(rejected)) => {
                        warn!(
                            "Control queue full, refusing connection #{} from {}",
                            rejected.id, rejected.peer
                        );
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if shared.stop.wait(poll) {
                    break;
                }
            }
            Err(e) => {
                warn!("Control accept failed: {}", e);
                if shared.stop.wait(poll) {
                    break;
                }
            }
        }
    }
    debug!("Control acceptor exiting");
}

/// How a worker finished with a connection for now.
enum Served {
    Closed(io::Result<()>),
    /// Quiet while other connections are waiting
    Parked(Connection),
}

fn worker_loop(shared: &ServerShared, rx: Receiver<Connection>) {
    // Connections this worker rotates through, front served next
    let mut held: VecDeque<Connection> = VecDeque::new();

    while !shared.stopping() {
        let connection = match held.pop_front() {
            Some(connection) => connection,
            None => match rx.recv_timeout(shared.read_timeout) {
                Ok(connection) => connection,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
        };
        let (id, peer) = (connection.id, connection.peer);
        let others_waiting = || !held.is_empty() || !rx.is_empty();
        match serve(shared, connection, others_waiting) {
            Served::Closed(Ok(())) => debug!("Control connection #{} from {} closed", id, peer),
            Served::Closed(Err(e)) => debug!("Control connection #{} ended: {}", id, e),
            Served::Parked(connection) => {
                if let Ok(waiting) = rx.try_recv() {
                    held.push_back(waiting);
                }
                held.push_back(connection);
            }
        }
    }
}

/// Serve requests on one connection until it closes, goes idle for too long,
/// or sits quiet while `others_waiting` reports other connections.
fn serve(
    shared: &ServerShared,
    mut connection: Connection,
    others_waiting: impl Fn() -> bool,
) -> Served {
    if let Err(e) = connection
        .stream
        .set_nonblocking(false)
        .and_then(|()| connection.stream.set_read_timeout(Some(shared.read_timeout)))
    {
        return Served::Closed(Err(e));
    }
    let mut buf = vec![0u8; MAX_MESSAGE];

    while !shared.stopping() {
        let len = match read_request(&mut connection.stream, &mut buf) {
            Ok(Some(len)) => len,
            Ok(None) => return Served::Closed(Ok(())),
            Err(e) if is_timeout(&e) => {
                if connection.last_request.elapsed() >= shared.idle_timeout {
                    debug!("Control connection #{} idle, closing", connection.id);
                    return Served::Closed(Ok(()));
                }
                if others_waiting() {
                    return Served::Parked(connection);
                }
                continue;
            }
            Err(e) => return Served::Closed(Err(e)),
        };
        connection.last_request = Instant::now();

        let response = handle_message(&shared.core, &buf[..len]);
        // The handler keeps payloads within bounds
        let written = response
            .encode()
            .map_err(io::Error::other)
            .and_then(|bytes| connection.stream.write_all(&bytes));
        if let Err(e) = written {
            return Served::Closed(Err(e));
        }

        if response.command == Command::Shutdown as u32 && response.is_success() {
            info!("Shutdown requested over control channel");
            shared.core_shutdown.trigger();
        }
    }
    Served::Closed(Ok(()))
}

/// Read one request into `buf`. The first read takes whatever has arrived;
/// further reads top it up until the command's fixed part is complete, so a
/// request split across segments is reassembled. If the peer goes quiet
/// first, the short request is returned as-is and fails to parse.
/// `Ok(None)` means the peer closed.
fn read_request(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<Option<usize>> {
    let mut filled = match stream.read(buf)? {
        0 => return Ok(None),
        n => n,
    };
    while let Some(needed) = Request::expected_len(&buf[..filled])
        && filled < needed
    {
        match stream.read(&mut buf[filled..needed]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if is_timeout(&e) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(Some(filled))
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
