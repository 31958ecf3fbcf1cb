//! `CLIPSSH/1` command/reply session (spec §4.7 "Active (CLIPSSH/1)").
//!
//! No PTY: each `cmd` runs once through the shell's `-c` flag via
//! `tokio::process::Command`, the same one-shot-subprocess style the
//! clipboard transport itself uses for `wl-copy`/`xclip`.

use crate::app::RetryPolicy;
use crate::constants::{DEDUP_WINDOW_CAPACITY, PTY_INPUT_CHUNK_MAX, SHELL_CANDIDATES, SHUTDOWN_POLL_INTERVAL};
use crate::error::ClipsshError;
use crate::session::{DedupWindow, Envelope, Kind, Protocol, ReorderBuffer, RetryQueue, Role, SeqGen, SessionState};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// A line-oriented input source for [`run_client_repl`], implemented by
/// the binary layer over stdin (raw-mode toggling, if any, is an
/// external collaborator per spec §1 — the clipboard client never puts
/// the terminal in raw mode since CLIPSSH/1 has no PTY to emulate).
#[async_trait]
pub trait LineSource: Send {
    /// Returns the next line with its trailing newline stripped, or
    /// `None` at end of input.
    async fn next_line(&mut self) -> std::io::Result<Option<String>>;
}

async fn send_tracked(transport: &mut dyn Transport, retry: &mut RetryQueue, retry_policy: RetryPolicy, envelope: Envelope) -> Result<(), ClipsshError> {
    transport.send(&envelope).await?;
    if retry_policy == RetryPolicy::L3Retry {
        retry.track(envelope, Instant::now());
    }
    Ok(())
}

/// Spawn `text` through the first available shell's `-c` flag, piping
/// stdout/stderr.
fn spawn_command(text: &str) -> Result<tokio::process::Child, ClipsshError> {
    let mut last_err = None;
    for shell in SHELL_CANDIDATES {
        match Command::new(shell).arg("-c").arg(text).stdout(Stdio::piped()).stderr(Stdio::piped()).stdin(Stdio::null()).spawn() {
            Ok(child) => return Ok(child),
            Err(e) => last_err = Some(e.to_string()),
        }
    }
    Err(ClipsshError::Session(format!(
        "no shell available from {SHELL_CANDIDATES:?} (last error: {})",
        last_err.unwrap_or_else(|| "none tried".to_string())
    )))
}

/// Run `text` to completion, streaming `stdout`/`stderr` chunks as they
/// arrive and finishing with `exit{code}`.
async fn execute_command(
    transport: &mut dyn Transport,
    retry: &mut RetryQueue,
    retry_policy: RetryPolicy,
    session_id: &str,
    seq_gen: &mut crate::session::SeqGen,
    text: &str,
) -> Result<(), ClipsshError> {
    let mut child = match spawn_command(text) {
        Ok(child) => child,
        Err(e) => {
            log::error!("clipssh: command spawn failed: {e}");
            let error_env = Envelope::new(
                Protocol::ClipsshV1,
                Kind::Error { code: "shell".to_string(), message: e.to_string() },
                session_id.to_string(),
                seq_gen.next(),
                Role::Server,
            );
            send_tracked(transport, retry, retry_policy, error_env).await?;
            let exit_env = Envelope::new(Protocol::ClipsshV1, Kind::Exit { code: 127 }, session_id.to_string(), seq_gen.next(), Role::Server);
            return send_tracked(transport, retry, retry_policy, exit_env).await;
        }
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut stdout_done = stdout.is_none();
    let mut stderr_done = stderr.is_none();
    let mut stdout_buf = [0u8; PTY_INPUT_CHUNK_MAX];
    let mut stderr_buf = [0u8; PTY_INPUT_CHUNK_MAX];

    while !stdout_done || !stderr_done {
        tokio::select! {
            n = async { stdout.as_mut().unwrap().read(&mut stdout_buf).await }, if !stdout_done => {
                match n {
                    Ok(0) => stdout_done = true,
                    Ok(n) => {
                        let envelope = Envelope::new(
                            Protocol::ClipsshV1,
                            Kind::Stdout { data: stdout_buf[..n].to_vec() },
                            session_id.to_string(),
                            seq_gen.next(),
                            Role::Server,
                        );
                        send_tracked(transport, retry, retry_policy, envelope).await?;
                    }
                    Err(e) => {
                        log::warn!("clipssh: stdout read error: {e}");
                        stdout_done = true;
                    }
                }
            }
            n = async { stderr.as_mut().unwrap().read(&mut stderr_buf).await }, if !stderr_done => {
                match n {
                    Ok(0) => stderr_done = true,
                    Ok(n) => {
                        let envelope = Envelope::new(
                            Protocol::ClipsshV1,
                            Kind::Stderr { data: stderr_buf[..n].to_vec() },
                            session_id.to_string(),
                            seq_gen.next(),
                            Role::Server,
                        );
                        send_tracked(transport, retry, retry_policy, envelope).await?;
                    }
                    Err(e) => {
                        log::warn!("clipssh: stderr read error: {e}");
                        stderr_done = true;
                    }
                }
            }
        }
    }

    let status = child.wait().await.map_err(|e| ClipsshError::Session(format!("failed to wait on command: {e}")))?;
    let code = status.code().unwrap_or(-1);
    let exit_env = Envelope::new(Protocol::ClipsshV1, Kind::Exit { code }, session_id.to_string(), seq_gen.next(), Role::Server);
    send_tracked(transport, retry, retry_policy, exit_env).await
}

/// Drive one `CLIPSSH/1` connection to completion as the server:
/// accept (or reject with `busy`) a handshake, then execute each
/// incoming `cmd` to completion until the peer disconnects.
///
/// Runs until `shutdown` is triggered (checked once per iteration,
/// bounding cancellation latency to [`SHUTDOWN_POLL_INTERVAL`] per spec
/// §5), then closes the transport and returns.
pub async fn run_server(mut transport: Box<dyn Transport>, retry_policy: RetryPolicy, shutdown: crate::app::Shutdown) -> Result<(), ClipsshError> {
    let mut state = SessionState::new();
    let mut dedup = DedupWindow::new(DEDUP_WINDOW_CAPACITY);
    let mut retry = RetryQueue::new();
    let mut seq_gen = SeqGen::new();

    while !shutdown.is_set() {
        match transport.recv(SHUTDOWN_POLL_INTERVAL).await {
            Ok(envelope) => {
                if dedup.is_duplicate(&envelope.msg_id) {
                    continue;
                }
                if retry_policy == RetryPolicy::L3Retry {
                    retry.clear();
                }
                match envelope.kind {
                    Kind::ConnectReq { source } => {
                        let session_id = uuid::Uuid::new_v4().to_string();
                        if !state.begin_handshake(session_id, source) {
                            let busy = Envelope::new(
                                Protocol::ClipsshV1,
                                Kind::Busy { session_id: state.session_id.clone().unwrap_or_default() },
                                envelope.session_id,
                                0,
                                Role::Server,
                            );
                            transport.send(&busy).await?;
                            continue;
                        }
                        let session_id = state.session_id.clone().unwrap_or_default();
                        state.activate(std::process::id());
                        let cwd = std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_else(|_| "/".to_string());
                        let ack = Envelope::new(
                            Protocol::ClipsshV1,
                            Kind::ConnectAck {
                                session_id: session_id.clone(),
                                user: crate::app::local_user(),
                                host: crate::app::local_host(),
                                cwd,
                                cols: None,
                                rows: None,
                            },
                            session_id,
                            seq_gen.next(),
                            Role::Server,
                        );
                        transport.send(&ack).await?;
                    }
                    Kind::Cmd { text } => {
                        let session_id = state.session_id.clone().unwrap_or_default();
                        execute_command(transport.as_mut(), &mut retry, retry_policy, &session_id, &mut seq_gen, &text).await?;
                    }
                    Kind::Disconnect => {
                        state.reset_to_idle();
                    }
                    other => {
                        log::debug!("clipssh: unexpected kind {} in current phase", other.name());
                        let session_id = state.session_id.clone().unwrap_or_default();
                        let error_env = Envelope::new(
                            Protocol::ClipsshV1,
                            Kind::Error { code: "protocol".to_string(), message: format!("unexpected {} in current phase", other.name()) },
                            session_id,
                            seq_gen.next(),
                            Role::Server,
                        );
                        send_tracked(transport.as_mut(), &mut retry, retry_policy, error_env).await?;
                    }
                }
            }
            Err(TransportError::Timeout(_)) => {}
            Err(e) => return Err(e.into()),
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

/// Client-side handshake: send `connect_req`, retry per `retry_policy`
/// until either a matching `connect_ack` names the new `session_id` or
/// `busy` reports the peer's existing one.
async fn connect(
    transport: &mut dyn Transport,
    retry_policy: RetryPolicy,
    retry: &mut RetryQueue,
    dedup: &mut DedupWindow,
    seq_gen: &mut SeqGen,
) -> Result<String, ClipsshError> {
    let connect_req = Envelope::new(Protocol::ClipsshV1, Kind::ConnectReq { source: Role::Client }, String::new(), seq_gen.next(), Role::Client);
    send_tracked(transport, retry, retry_policy, connect_req).await?;

    loop {
        match transport.recv(Duration::from_secs(5)).await {
            Ok(envelope) => {
                if dedup.is_duplicate(&envelope.msg_id) {
                    continue;
                }
                match envelope.kind {
                    Kind::ConnectAck { session_id, .. } => {
                        retry.clear();
                        return Ok(session_id);
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
    }
}

/// Send one `cmd` over an already-connected session, streaming
/// `stdout`/`stderr` to the local terminal as it arrives, and return
/// the remote exit code once `exit` (or `disconnect`) is observed.
///
/// `reorder` reassembles the server's reply stream by `seq` before any
/// of it reaches the match below (spec §4.7/§5), so an out-of-order
/// `stdout` chunk can't be printed ahead of one that logically preceded
/// it, and an `exit` racing ahead of buffered output can't end the
/// session early.
async fn send_command(
    transport: &mut dyn Transport,
    retry_policy: RetryPolicy,
    retry: &mut RetryQueue,
    dedup: &mut DedupWindow,
    reorder: &mut ReorderBuffer,
    seq_gen: &mut SeqGen,
    session_id: &str,
    command_text: String,
) -> Result<i32, ClipsshError> {
    let cmd_env = Envelope::new(Protocol::ClipsshV1, Kind::Cmd { text: command_text }, session_id.to_string(), seq_gen.next(), Role::Client);
    send_tracked(transport, retry, retry_policy, cmd_env).await?;

    loop {
        match transport.recv(SHUTDOWN_POLL_INTERVAL).await {
            Ok(envelope) => {
                if dedup.is_duplicate(&envelope.msg_id) {
                    continue;
                }
                for envelope in reorder.accept(envelope) {
                    match envelope.kind {
                        Kind::Stdout { data } => {
                            use std::io::Write as _;
                            let _ = std::io::stdout().write_all(&data);
                            let _ = std::io::stdout().flush();
                        }
                        Kind::Stderr { data } => {
                            use std::io::Write as _;
                            let _ = std::io::stderr().write_all(&data);
                            let _ = std::io::stderr().flush();
                        }
                        Kind::Exit { code } => return Ok(code),
                        Kind::Error { code, message } => log::warn!("clipssh: server error {code}: {message}"),
                        Kind::Disconnect => return Ok(-1),
                        _ => {}
                    }
                }
            }
            Err(TransportError::Timeout(_)) => {
                if retry_policy == RetryPolicy::L3Retry {
                    let due = retry.due(Instant::now());
                    for envelope in due.retransmit {
                        transport.send(&envelope).await?;
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Drive one `CLIPSSH/1` connection to completion as the client:
/// connect, send a single `cmd`, print streamed `stdout`/`stderr` as it
/// arrives, and return the remote exit code.
pub async fn run_client(mut transport: Box<dyn Transport>, retry_policy: RetryPolicy, command_text: String) -> Result<i32, ClipsshError> {
    let mut seq_gen = SeqGen::new();
    let mut retry = RetryQueue::new();
    let mut dedup = DedupWindow::new(DEDUP_WINDOW_CAPACITY);
    let mut reorder = ReorderBuffer::new();

    let session_id = connect(transport.as_mut(), retry_policy, &mut retry, &mut dedup, &mut seq_gen).await?;
    let exit_code =
        send_command(transport.as_mut(), retry_policy, &mut retry, &mut dedup, &mut reorder, &mut seq_gen, &session_id, command_text).await?;

    let disconnect = Envelope::new(Protocol::ClipsshV1, Kind::Disconnect, session_id, seq_gen.next(), Role::Client);
    let _ = transport.send(&disconnect).await;
    transport.close().await;
    Ok(exit_code)
}

/// Drive a `CLIPSSH/1` connection as an interactive-feeling REPL:
/// connect once, then read commands one line at a time from `lines`
/// (normally stdin) and execute each through the same session until
/// the source is exhausted, printing a `prompt` before each read the
/// way an interactive shell would — even though, per spec §4.7, each
/// command itself runs non-interactively with no PTY behind it.
pub async fn run_client_repl(
    mut transport: Box<dyn Transport>,
    retry_policy: RetryPolicy,
    mut lines: Box<dyn LineSource>,
    prompt: &str,
) -> Result<i32, ClipsshError> {
    let mut seq_gen = SeqGen::new();
    let mut retry = RetryQueue::new();
    let mut dedup = DedupWindow::new(DEDUP_WINDOW_CAPACITY);
    let mut reorder = ReorderBuffer::new();

    let session_id = connect(transport.as_mut(), retry_policy, &mut retry, &mut dedup, &mut seq_gen).await?;

    let mut last_exit_code = 0;
    loop {
        use std::io::Write as _;
        print!("{prompt}");
        let _ = std::io::stdout().flush();

        match lines.next_line().await {
            Ok(Some(line)) => {
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                last_exit_code = send_command(
                    transport.as_mut(),
                    retry_policy,
                    &mut retry,
                    &mut dedup,
                    &mut reorder,
                    &mut seq_gen,
                    &session_id,
                    text.to_string(),
                )
                .await?;
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("clipssh: stdin read error: {e}");
                break;
            }
        }
    }

    let disconnect = Envelope::new(Protocol::ClipsshV1, Kind::Disconnect, session_id, seq_gen.next(), Role::Client);
    let _ = transport.send(&disconnect).await;
    transport.close().await;
    Ok(last_exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_command_runs_through_a_shell() {
        let child = spawn_command("echo hi");
        assert!(child.is_ok());
    }

    #[test]
    fn spawn_command_pipes_stdout_and_stderr_separately() {
        let child = spawn_command("echo out; echo err 1>&2").unwrap();
        assert!(child.stdout.is_some());
        assert!(child.stderr.is_some());
        assert!(child.stdin.is_none());
    }
}
