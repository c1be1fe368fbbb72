// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog network listener.
//!
//! Binds a UDP socket and a TCP listener on the same address, decodes every frame received on
//! either and hands the resulting records to the dispatch channel.
//!
//! - UDP: one datagram is one frame.
//! - TCP: each connection carries newline-delimited frames or octet-counted frames
//!   (`LEN SP MSG`, RFC 6587). The framing is detected per frame from its first byte.
//!
//! A [`Listener`] only exists once both sockets are bound, so its state goes
//! `Bound -> Running -> Stopped`. It stops when the cancellation token fires or when the UDP
//! receive loop or the TCP accept loop fails for good. Either way every task drops its dispatch
//! sender, which closes the channel for the workers. A frame still waiting for a queue slot
//! when the token fires is abandoned, so a stalled worker pool cannot hold up shutdown.

use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::decoder::Decoder;
use crate::dispatch::DispatchSender;
use crate::errors::{BindError, ChannelClosed, DecodeError, ListenerError, Transport};
use crate::stats::PipelineStats;

// Maximum number of consecutive socket errors before the listener gives up.
// Backoff formula: 10ms * 2^error_count: 20ms, 40ms, 80ms, 160ms, then fail.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

// Longest accepted octet count prefix ("99999999 ").
const MAX_OCTET_COUNT_DIGITS: u64 = 8;

/// Configuration for the syslog listener
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address both sockets bind to (e.g. "0.0.0.0:514")
    pub addr: String,
    /// Largest accepted frame, in bytes
    pub max_message_size: usize,
}

/// Lifecycle of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Bound,
    Running,
    Stopped,
}

/// Shared by the UDP loop and every TCP connection task.
struct FrameContext {
    decoder: Arc<dyn Decoder>,
    sender: DispatchSender,
    stats: Arc<PipelineStats>,
    cancel_token: CancellationToken,
}

impl FrameContext {
    /// Decodes one frame and dispatches the record. Decode failures are counted and dropped.
    ///
    /// Breaks when intake must stop: the worker pool is gone, or shutdown began while the
    /// record waited for a queue slot.
    async fn handle_frame(&self, frame: &[u8], peer: SocketAddr) -> ControlFlow<()> {
        self.stats.frame_received();
        match self.decoder.decode(frame, peer) {
            Ok(record) => {
                trace!("Received frame from {}: {}", peer, record.content);
                let dispatched = tokio::select! {
                    dispatched = self.sender.dispatch(record) => dispatched,
                    () = self.cancel_token.cancelled() => {
                        self.stats.record_abandoned();
                        debug!("Shutting down, abandoning record from {}", peer);
                        return ControlFlow::Break(());
                    }
                };
                if let Err(ChannelClosed) = dispatched {
                    warn!("Dispatch channel closed, stopping intake from {}", peer);
                    return ControlFlow::Break(());
                }
            }
            Err(DecodeError::Oversized { size, max }) => {
                self.stats.oversized_frame();
                warn!(
                    "Dropping {} byte frame from {}, limit is {} bytes",
                    size, peer, max
                );
            }
            Err(e) => {
                self.stats.decode_failed();
                debug!("Failed to decode frame from {}: {}", peer, e);
            }
        }
        ControlFlow::Continue(())
    }
}

/// A listener whose sockets are bound but not yet serving.
pub struct Listener {
    udp: UdpSocket,
    tcp: TcpListener,
    udp_addr: SocketAddr,
    tcp_addr: SocketAddr,
    max_message_size: usize,
    context: Arc<FrameContext>,
    cancel_token: CancellationToken,
    state: Arc<RwLock<ListenerState>>,
}

impl Listener {
    /// Binds UDP, then TCP on the address UDP ended up with, so an ephemeral port (`:0`) is
    /// shared by both transports.
    pub async fn bind(
        config: &ListenerConfig,
        decoder: Arc<dyn Decoder>,
        sender: DispatchSender,
        stats: Arc<PipelineStats>,
        cancel_token: CancellationToken,
    ) -> Result<Listener, BindError> {
        let udp = UdpSocket::bind(&config.addr)
            .await
            .map_err(|source| BindError {
                transport: Transport::Udp,
                addr: config.addr.clone(),
                source,
            })?;
        let udp_addr = udp.local_addr().map_err(|source| BindError {
            transport: Transport::Udp,
            addr: config.addr.clone(),
            source,
        })?;

        let tcp = TcpListener::bind(udp_addr)
            .await
            .map_err(|source| BindError {
                transport: Transport::Tcp,
                addr: udp_addr.to_string(),
                source,
            })?;
        let tcp_addr = tcp.local_addr().map_err(|source| BindError {
            transport: Transport::Tcp,
            addr: udp_addr.to_string(),
            source,
        })?;

        debug!("Syslog listener bound to udp://{} and tcp://{}", udp_addr, tcp_addr);

        Ok(Listener {
            udp,
            tcp,
            udp_addr,
            tcp_addr,
            max_message_size: config.max_message_size,
            context: Arc::new(FrameContext {
                decoder,
                sender,
                stats,
                cancel_token: cancel_token.clone(),
            }),
            cancel_token,
            state: Arc::new(RwLock::new(ListenerState::Bound)),
        })
    }

    #[must_use]
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    #[must_use]
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// Starts serving both transports in the background.
    pub async fn spawn(self) -> ListenerHandle {
        *self.state.write().await = ListenerState::Running;
        info!("syslog-udp: listening on {}", self.udp_addr);
        info!("syslog-tcp: listening on {}", self.tcp_addr);

        let udp_task = tokio::spawn(run_udp(
            self.udp,
            self.udp_addr,
            self.max_message_size,
            Arc::clone(&self.context),
            self.cancel_token.clone(),
        ));
        let tcp_task = tokio::spawn(run_tcp(
            self.tcp,
            self.tcp_addr,
            self.max_message_size,
            self.context,
            self.cancel_token.clone(),
        ));

        let state = Arc::clone(&self.state);
        let cancel_token = self.cancel_token.clone();
        let supervisor = tokio::spawn(async move {
            // The first transport to fail takes the other one down with it.
            let (udp_result, tcp_result) = tokio::join!(
                supervise(udp_task, &cancel_token),
                supervise(tcp_task, &cancel_token),
            );
            *state.write().await = ListenerState::Stopped;
            debug!("Syslog listener stopped");
            udp_result.and(tcp_result)
        });

        ListenerHandle {
            supervisor,
            state: self.state,
            cancel_token: self.cancel_token,
            udp_addr: self.udp_addr,
            tcp_addr: self.tcp_addr,
        }
    }
}

/// Handle to a running listener.
pub struct ListenerHandle {
    supervisor: JoinHandle<Result<(), ListenerError>>,
    state: Arc<RwLock<ListenerState>>,
    cancel_token: CancellationToken,
    udp_addr: SocketAddr,
    tcp_addr: SocketAddr,
}

impl ListenerHandle {
    pub async fn state(&self) -> ListenerState {
        *self.state.read().await
    }

    #[must_use]
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    #[must_use]
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// Stops intake. Frames already being dispatched are still delivered.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Blocks until the listener has stopped, returning the error that stopped it, if any.
    pub async fn wait(self) -> Result<(), ListenerError> {
        match self.supervisor.await {
            Ok(result) => result,
            Err(e) => Err(ListenerError::Aborted(e.to_string())),
        }
    }
}

async fn supervise(
    task: JoinHandle<Result<(), ListenerError>>,
    cancel_token: &CancellationToken,
) -> Result<(), ListenerError> {
    let result = match task.await {
        Ok(result) => result,
        Err(e) => Err(ListenerError::Aborted(e.to_string())),
    };
    if let Err(ref e) = result {
        error!("{}", e);
        cancel_token.cancel();
    }
    result
}

/// Backs off after a socket error. Returns `Ok(true)` to retry, `Ok(false)` when cancelled,
/// and an error once too many errors happened in a row.
async fn handle_error_with_backoff(
    consecutive_errors: &mut u32,
    error: io::Error,
    cancel_token: &CancellationToken,
) -> io::Result<bool> {
    *consecutive_errors += 1;

    if *consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
        return Err(error);
    }

    let backoff_ms = 10u64 * (1 << *consecutive_errors);
    warn!("Socket error, retrying in {}ms: {}", backoff_ms, error);

    tokio::select! {
        _ = sleep(Duration::from_millis(backoff_ms)) => Ok(true),
        _ = cancel_token.cancelled() => Ok(false),
    }
}

/// Errors caused by a single peer rather than by the socket itself.
fn is_peer_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

async fn run_udp(
    socket: UdpSocket,
    addr: SocketAddr,
    max_message_size: usize,
    context: Arc<FrameContext>,
    cancel_token: CancellationToken,
) -> Result<(), ListenerError> {
    // One extra byte so a truncated datagram shows up as oversized instead of silently cut.
    let mut buf = vec![0u8; max_message_size + 1];
    let mut consecutive_errors = 0;

    loop {
        let received = tokio::select! {
            () = cancel_token.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        let (amt, peer) = match received {
            Ok(received) => {
                consecutive_errors = 0;
                received
            }
            Err(e) if is_peer_error(&e) => {
                debug!("Ignoring UDP error caused by a peer: {}", e);
                continue;
            }
            Err(e) => {
                match handle_error_with_backoff(&mut consecutive_errors, e, &cancel_token).await
                {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(source) => {
                        return Err(ListenerError::Io {
                            transport: Transport::Udp,
                            addr,
                            source,
                        })
                    }
                }
            }
        };

        if context.handle_frame(&buf[..amt], peer).await.is_break() {
            break;
        }
    }

    debug!("UDP listener on {} stopped", addr);
    Ok(())
}

async fn run_tcp(
    listener: TcpListener,
    addr: SocketAddr,
    max_message_size: usize,
    context: Arc<FrameContext>,
    cancel_token: CancellationToken,
) -> Result<(), ListenerError> {
    let mut consecutive_errors = 0;

    loop {
        let accepted = tokio::select! {
            () = cancel_token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => {
                consecutive_errors = 0;
                accepted
            }
            Err(e) if is_peer_error(&e) => {
                debug!("Ignoring aborted TCP connection: {}", e);
                continue;
            }
            Err(e) => {
                match handle_error_with_backoff(&mut consecutive_errors, e, &cancel_token).await
                {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(source) => {
                        return Err(ListenerError::Io {
                            transport: Transport::Tcp,
                            addr,
                            source,
                        })
                    }
                }
            }
        };

        debug!("Accepted syslog connection from {}", peer);
        let context = Arc::clone(&context);
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move {
            context.stats.connection_opened();
            if let Err(e) =
                serve_connection(stream, peer, max_message_size, &context, &cancel_token).await
            {
                debug!("Syslog connection from {} closed with error: {}", peer, e);
            }
            context.stats.connection_closed();
        });
    }

    debug!("TCP listener on {} stopped", addr);
    Ok(())
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    max_message_size: usize,
    context: &FrameContext,
    cancel_token: &CancellationToken,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut frame = Vec::with_capacity(1024);

    loop {
        frame.clear();
        let read = tokio::select! {
            () = cancel_token.cancelled() => return Ok(()),
            read = read_frame(&mut reader, &mut frame, max_message_size) => read?,
        };

        match read {
            FrameRead::Eof => {
                debug!("Syslog connection from {} closed", peer);
                return Ok(());
            }
            FrameRead::Frame => {
                if frame.is_empty() {
                    continue;
                }
                if context.handle_frame(&frame, peer).await.is_break() {
                    return Ok(());
                }
            }
            FrameRead::Oversized(size) => {
                context.stats.frame_received();
                context.stats.oversized_frame();
                warn!(
                    "Dropping {} byte frame from {}, limit is {} bytes",
                    size, peer, max_message_size
                );
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum FrameRead {
    Eof,
    Frame,
    /// The frame was skipped because it is larger than the limit.
    Oversized(usize),
}

/// Reads one TCP frame into `frame`.
async fn read_frame<R>(reader: &mut R, frame: &mut Vec<u8>, max: usize) -> io::Result<FrameRead>
where
    R: AsyncBufRead + Unpin,
{
    let first = match reader.fill_buf().await? {
        [] => return Ok(FrameRead::Eof),
        [first, ..] => *first,
    };

    if first.is_ascii_digit() {
        read_octet_counted(reader, frame, max).await
    } else {
        read_line(reader, frame, max).await
    }
}

async fn read_octet_counted<R>(
    reader: &mut R,
    frame: &mut Vec<u8>,
    max: usize,
) -> io::Result<FrameRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut prefix = Vec::with_capacity(8);
    (&mut *reader)
        .take(MAX_OCTET_COUNT_DIGITS + 1)
        .read_until(b' ', &mut prefix)
        .await?;

    let len = prefix
        .strip_suffix(b" ")
        .and_then(|digits| std::str::from_utf8(digits).ok())
        .and_then(|digits| digits.parse::<usize>().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid octet count"))?;

    if len > max {
        let len_u64 = u64::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid octet count"))?;
        tokio::io::copy(&mut (&mut *reader).take(len_u64), &mut tokio::io::sink()).await?;
        return Ok(FrameRead::Oversized(len));
    }

    frame.resize(len, 0);
    reader.read_exact(frame).await?;
    Ok(FrameRead::Frame)
}

async fn read_line<R>(reader: &mut R, frame: &mut Vec<u8>, max: usize) -> io::Result<FrameRead>
where
    R: AsyncBufRead + Unpin,
{
    // Room for a payload of `max` bytes plus its "\r\n" terminator.
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(2);
    let read = (&mut *reader).take(limit).read_until(b'\n', frame).await?;
    if read == 0 {
        return Ok(FrameRead::Eof);
    }

    let terminated = frame.last() == Some(&b'\n');
    if terminated {
        frame.pop();
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }
    }

    // An unterminated frame within the limit is the last one of the stream.
    if frame.len() <= max {
        return Ok(FrameRead::Frame);
    }

    let mut skipped = read;
    if !terminated {
        // Skip the rest of the line so the next frame starts clean.
        let mut chunk = Vec::new();
        loop {
            chunk.clear();
            let read = (&mut *reader)
                .take(limit)
                .read_until(b'\n', &mut chunk)
                .await?;
            skipped += read;
            if read == 0 || chunk.last() == Some(&b'\n') {
                break;
            }
        }
    }
    frame.clear();
    Ok(FrameRead::Oversized(skipped))
}
