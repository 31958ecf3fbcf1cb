//! `gitssh/2` interactive PTY session (spec §4.7 "Active (gitssh/2)").
//!
//! Mirrors the PTY wiring the teacher uses for its own agent sessions
//! (open a pty, spawn a shell in the slave, take a writer + cloned
//! reader off the master, bridge the blocking reader onto a channel
//! from an OS thread) but drives the result through the envelope
//! protocol instead of a local terminal buffer.

use crate::app::RetryPolicy;
use crate::constants::{DEDUP_WINDOW_CAPACITY, PTY_INPUT_CHUNK_MAX, QUEUE_CAPACITY, SHELL_CANDIDATES, SHUTDOWN_POLL_INTERVAL};
use crate::error::ClipsshError;
use crate::session::{DedupWindow, Envelope, Kind, Protocol, PtySignalName, ReorderBuffer, RetryQueue, Role, SeqGen, SessionState};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// Initial PTY size advertised in `connect_ack`, before the client's
/// first `pty_resize` corrects it to the real terminal dimensions.
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

/// The owned half of a spawned shell the server keeps for the lifetime
/// of one session: resize handle, input writer, and the pid used for
/// `pty_signal` forwarding.
struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    pid: u32,
}

/// Open a PTY and spawn the first shell from [`SHELL_CANDIDATES`] that
/// exists, returning the handle plus the raw output reader and the
/// child (moved into a dedicated waiter thread by the caller).
fn spawn_shell(rows: u16, cols: u16, cwd: &Path) -> Result<(PtyHandle, Box<dyn Child + Send>, Box<dyn Read + Send>), ClipsshError> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
        .map_err(|e| ClipsshError::Session(format!("failed to open pty: {e}")))?;

    let mut last_err = None;
    for shell in SHELL_CANDIDATES {
        let mut cmd = CommandBuilder::new(shell);
        cmd.cwd(cwd);
        match pair.slave.spawn_command(cmd) {
            Ok(child) => {
                let pid = child.process_id().unwrap_or(0);
                let writer = pair
                    .master
                    .take_writer()
                    .map_err(|e| ClipsshError::Session(format!("failed to take pty writer: {e}")))?;
                let reader = pair
                    .master
                    .try_clone_reader()
                    .map_err(|e| ClipsshError::Session(format!("failed to clone pty reader: {e}")))?;
                let handle = PtyHandle { master: pair.master, writer, pid };
                return Ok((handle, child, reader));
            }
            Err(e) => last_err = Some(e.to_string()),
        }
    }
    Err(ClipsshError::Session(format!(
        "no shell available from {SHELL_CANDIDATES:?} (last error: {})",
        last_err.unwrap_or_else(|| "none tried".to_string())
    )))
}

/// Bridge the blocking PTY reader onto a bounded tokio channel from an
/// OS thread, the same shape as the teacher's `spawn_*_reader_thread`
/// helpers.
fn spawn_pty_reader_thread(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; PTY_INPUT_CHUNK_MAX];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::debug!("clipssh: pty reader thread: {e}");
                    break;
                }
            }
        }
    })
}

/// Block on `child.wait()` from a dedicated thread and report the exit
/// status once: the PTY master fd's EOF (picked up by
/// [`spawn_pty_reader_thread`]) and the child's actual exit don't
/// happen atomically, so both are surfaced independently.
fn spawn_pty_waiter_thread(mut child: Box<dyn Child + Send>, tx: oneshot::Sender<Option<i32>>) {
    thread::spawn(move || {
        let status = child.wait().ok();
        let code = status.and_then(|s| i32::try_from(s.exit_code()).ok());
        let _ = tx.send(code);
    });
}

fn forward_signal(pid: u32, name: PtySignalName) {
    let sig = match name {
        PtySignalName::Int => libc::SIGINT,
        PtySignalName::Quit => libc::SIGQUIT,
        PtySignalName::Tstp => libc::SIGTSTP,
    };
    // This signals the shell's own pid rather than its foreground
    // process group, since `portable_pty::MasterPty` doesn't portably
    // expose the fd needed for `tcgetpgrp`. Most shells forward
    // job-control signals to their foreground child themselves, so this
    // is close enough for INT/QUIT/TSTP without a platform-specific
    // ioctl reach-around.
    //
    // SAFETY: `pid` names a process this server spawned and still owns;
    // calling `kill` with a valid pid and signal number has no other
    // side effects visible to Rust.
    unsafe {
        libc::kill(pid as libc::pid_t, sig);
    }
}

fn next_envelope(state: &SessionState, seq_gen: &mut SeqGen, kind: Kind, source: Role) -> Envelope {
    Envelope::new(Protocol::GitsshV2, kind, state.session_id.clone().unwrap_or_default(), seq_gen.next(), source)
}

async fn send_tracked(
    transport: &mut dyn Transport,
    retry: &mut RetryQueue,
    retry_policy: RetryPolicy,
    envelope: Envelope,
) -> Result<(), ClipsshError> {
    transport.send(&envelope).await?;
    if retry_policy == RetryPolicy::L3Retry {
        retry.track(envelope, Instant::now());
    }
    Ok(())
}

/// Drive one `gitssh/2` connection to completion as the server: accept
/// (or reject with `busy`) a handshake, spawn a shell, then pump bytes
/// between the PTY and the transport until the shell exits or the peer
/// disconnects.
///
/// Runs until `shutdown` is triggered (checked once per iteration,
/// bounding cancellation latency to [`SHUTDOWN_POLL_INTERVAL`] per spec
/// §5), then closes the transport and returns.
pub async fn run_server(mut transport: Box<dyn Transport>, retry_policy: RetryPolicy, shutdown: crate::app::Shutdown) -> Result<(), ClipsshError> {
    let mut state = SessionState::new();
    let mut dedup = DedupWindow::new(DEDUP_WINDOW_CAPACITY);
    let mut retry = RetryQueue::new();
    let mut seq_gen = SeqGen::new();

    let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(QUEUE_CAPACITY);
    let mut pty: Option<PtyHandle> = None;
    let mut closed_rx: Option<oneshot::Receiver<Option<i32>>> = None;

    while !shutdown.is_set() {
        let closed_armed = closed_rx.is_some();
        tokio::select! {
            recv_result = transport.recv(SHUTDOWN_POLL_INTERVAL) => {
                match recv_result {
                    Ok(envelope) => {
                        if dedup.is_duplicate(&envelope.msg_id) {
                            continue;
                        }
                        if retry_policy == RetryPolicy::L3Retry {
                            retry.clear();
                        }
                        dispatch_server_kind(
                            envelope,
                            transport.as_mut(),
                            &mut state,
                            &mut seq_gen,
                            &mut pty,
                            &output_tx,
                            &mut closed_rx,
                        ).await?;
                    }
                    Err(TransportError::Timeout(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Some(chunk) = output_rx.recv(), if pty.is_some() => {
                let envelope = next_envelope(&state, &mut seq_gen, Kind::PtyOutput { data: chunk }, Role::Server);
                send_tracked(transport.as_mut(), &mut retry, retry_policy, envelope).await?;
            }
            exit_code = async { closed_rx.as_mut().unwrap().await }, if closed_armed => {
                let code = exit_code.unwrap_or(None);
                closed_rx = None;
                let envelope = next_envelope(&state, &mut seq_gen, Kind::PtyClosed { exit_status: code }, Role::Server);
                send_tracked(transport.as_mut(), &mut retry, retry_policy, envelope).await?;
                pty = None;
                state.begin_drain();
                state.reset_to_idle();
            }
        }

        if retry_policy == RetryPolicy::L3Retry {
            let due = retry.due(Instant::now());
            for envelope in due.retransmit {
                transport.send(&envelope).await?;
            }
            for envelope in due.exhausted {
                log::warn!("clipssh: retry budget exhausted for msg_id={}", envelope.msg_id);
            }
        }
    }

    if tokio::time::timeout(crate::constants::SHUTDOWN_DRAIN_DEADLINE, transport.close()).await.is_err() {
        log::warn!("clipssh: transport close exceeded the shutdown drain deadline");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_server_kind(
    envelope: Envelope,
    transport: &mut dyn Transport,
    state: &mut SessionState,
    seq_gen: &mut SeqGen,
    pty: &mut Option<PtyHandle>,
    output_tx: &mpsc::Sender<Vec<u8>>,
    closed_rx: &mut Option<oneshot::Receiver<Option<i32>>>,
) -> Result<(), ClipsshError> {
    match envelope.kind {
        Kind::ConnectReq { source } => {
            let session_id = uuid::Uuid::new_v4().to_string();
            if !state.begin_handshake(session_id, source) {
                let busy = Envelope::new(
                    Protocol::GitsshV2,
                    Kind::Busy { session_id: state.session_id.clone().unwrap_or_default() },
                    envelope.session_id,
                    0,
                    Role::Server,
                );
                transport.send(&busy).await?;
                return Ok(());
            }
            let session_id = state.session_id.clone().unwrap_or_default();

            let cwd = std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_else(|_| "/".to_string());
            match spawn_shell(DEFAULT_ROWS, DEFAULT_COLS, Path::new(&cwd)) {
                Ok((handle, child, reader)) => {
                    let pid = handle.pid;
                    *pty = Some(handle);
                    spawn_pty_reader_thread(reader, output_tx.clone());
                    let (tx, rx) = oneshot::channel();
                    spawn_pty_waiter_thread(child, tx);
                    *closed_rx = Some(rx);

                    state.activate(pid);
                    let ack = Envelope::new(
                        Protocol::GitsshV2,
                        Kind::ConnectAck {
                            session_id: session_id.clone(),
                            user: crate::app::local_user(),
                            host: crate::app::local_host(),
                            cwd,
                            cols: Some(DEFAULT_COLS),
                            rows: Some(DEFAULT_ROWS),
                        },
                        session_id,
                        seq_gen.next(),
                        Role::Server,
                    );
                    transport.send(&ack).await?;
                }
                Err(e) => {
                    log::error!("clipssh: shell spawn failed: {e}");
                    let error_env = Envelope::new(
                        Protocol::GitsshV2,
                        Kind::Error { code: "shell".to_string(), message: e.to_string() },
                        session_id.clone(),
                        0,
                        Role::Server,
                    );
                    transport.send(&error_env).await?;
                    let disconnect = Envelope::new(Protocol::GitsshV2, Kind::Disconnect, session_id, 0, Role::Server);
                    transport.send(&disconnect).await?;
                    state.reset_to_idle();
                }
            }
        }
        Kind::PtyInput { data } => {
            if let Some(handle) = pty.as_mut() {
                if let Err(e) = handle.writer.write_all(&data).and_then(|()| handle.writer.flush()) {
                    log::warn!("clipssh: pty write failed: {e}");
                }
            }
        }
        Kind::PtyResize { cols, rows } => {
            if let Some(handle) = pty.as_ref() {
                let _ = handle.master.resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 });
            }
        }
        Kind::PtySignal { name } => {
            if let Some(handle) = pty.as_ref() {
                forward_signal(handle.pid, name);
            }
        }
        Kind::Disconnect => {
            *pty = None;
            *closed_rx = None;
            state.reset_to_idle();
        }
        other => {
            log::debug!("clipssh: ignoring unexpected kind {} in current phase", other.name());
            let error_env = Envelope::new(
                Protocol::GitsshV2,
                Kind::Error { code: "protocol".to_string(), message: format!("unexpected kind {} in current phase", other.name()) },
                envelope.session_id,
                0,
                Role::Server,
            );
            transport.send(&error_env).await?;
        }
    }
    Ok(())
}

/// Raw terminal I/O, implemented by the binary layer: reading keystroke
/// bytes and writing PTY output bytes to the real terminal (raw-mode
/// toggling and resize detection are both external collaborators per
/// spec §1, out of scope for this module).
#[async_trait]
pub trait TerminalIo: Send {
    async fn read(&mut self) -> std::io::Result<Vec<u8>>;
    async fn write(&mut self, data: &[u8]) -> std::io::Result<()>;
}

/// Drive one `gitssh/2` connection to completion as the client: connect
/// (retrying on `busy`/timeout per `retry_policy`), then pump bytes
/// between the terminal and the transport until the shell closes or
/// the user disconnects.
///
/// `resize_rx`, if given, is fed by the binary layer's own terminal
/// resize detection (e.g. `SIGWINCH`); each `(cols, rows)` it yields
/// becomes a `pty_resize` envelope. `None` means only `initial_size` is
/// ever sent, for callers that don't wire up live resize detection.
pub async fn run_client(
    mut transport: Box<dyn Transport>,
    retry_policy: RetryPolicy,
    mut terminal: Box<dyn TerminalIo>,
    initial_size: (u16, u16),
    mut resize_rx: Option<mpsc::Receiver<(u16, u16)>>,
) -> Result<(), ClipsshError> {
    let mut seq_gen = SeqGen::new();
    let mut retry = RetryQueue::new();
    let mut dedup = DedupWindow::new(DEDUP_WINDOW_CAPACITY);
    let mut reorder = ReorderBuffer::new();

    let connect_req = Envelope::new(Protocol::GitsshV2, Kind::ConnectReq { source: Role::Client }, String::new(), seq_gen.next(), Role::Client);
    send_tracked(transport.as_mut(), &mut retry, retry_policy, connect_req).await?;

    let session_id = loop {
        match transport.recv(Duration::from_secs(5)).await {
            Ok(envelope) => {
                if dedup.is_duplicate(&envelope.msg_id) {
                    continue;
                }
                match envelope.kind {
                    Kind::ConnectAck { session_id, .. } => {
                        retry.clear();
                        break session_id;
                    }
                    Kind::Busy { session_id } => {
                        return Err(ClipsshError::Session(format!("server busy with session {session_id}")));
                    }
                    _ => {}
                }
            }
            Err(TransportError::Timeout(_)) => {
                if retry_policy == RetryPolicy::L3Retry {
                    let due = retry.due(Instant::now());
                    for envelope in due.retransmit {
                        transport.send(&envelope).await?;
                    }
                    if !due.exhausted.is_empty() {
                        return Err(ClipsshError::Timeout("no connect_ack received".to_string()));
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    };

    let (cols, rows) = initial_size;
    let resize = Envelope::new(Protocol::GitsshV2, Kind::PtyResize { cols, rows }, session_id.clone(), seq_gen.next(), Role::Client);
    transport.send(&resize).await?;

    'session: loop {
        let resize_armed = resize_rx.is_some();
        tokio::select! {
            input = terminal.read() => {
                match input {
                    Ok(bytes) if bytes.is_empty() => break 'session,
                    Ok(bytes) => {
                        for chunk in bytes.chunks(PTY_INPUT_CHUNK_MAX) {
                            let envelope = Envelope::new(
                                Protocol::GitsshV2,
                                Kind::PtyInput { data: chunk.to_vec() },
                                session_id.clone(),
                                seq_gen.next(),
                                Role::Client,
                            );
                            send_tracked(transport.as_mut(), &mut retry, retry_policy, envelope).await?;
                        }
                    }
                    Err(e) => {
                        log::warn!("clipssh: terminal read error: {e}");
                        break 'session;
                    }
                }
            }
            Some((cols, rows)) = async { resize_rx.as_mut().unwrap().recv().await }, if resize_armed => {
                let envelope = Envelope::new(Protocol::GitsshV2, Kind::PtyResize { cols, rows }, session_id.clone(), seq_gen.next(), Role::Client);
                transport.send(&envelope).await?;
            }
            recv_result = transport.recv(SHUTDOWN_POLL_INTERVAL) => {
                match recv_result {
                    Ok(envelope) => {
                        if dedup.is_duplicate(&envelope.msg_id) {
                            continue;
                        }
                        // Reassemble by seq before dispatch (spec §4.7/§5):
                        // an out-of-order pty_output chunk must not be
                        // written to the terminal ahead of one that
                        // logically preceded it.
                        for envelope in reorder.accept(envelope) {
                            match envelope.kind {
                                Kind::PtyOutput { data } => {
                                    if let Err(e) = terminal.write(&data).await {
                                        log::warn!("clipssh: terminal write error: {e}");
                                    }
                                }
                                Kind::PtyClosed { exit_status } => {
                                    log::info!("clipssh: shell closed (exit_status={exit_status:?})");
                                    break 'session;
                                }
                                Kind::Error { code, message } => {
                                    log::warn!("clipssh: server error {code}: {message}");
                                }
                                Kind::Disconnect => break 'session,
                                _ => {}
                            }
                        }
                    }
                    Err(TransportError::Timeout(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if retry_policy == RetryPolicy::L3Retry {
            let due = retry.due(Instant::now());
            for envelope in due.retransmit {
                transport.send(&envelope).await?;
            }
        }
    }

    let disconnect = Envelope::new(Protocol::GitsshV2, Kind::Disconnect, session_id, seq_gen.next(), Role::Client);
    let _ = transport.send(&disconnect).await;
    transport.close().await;
    Ok(())
}

