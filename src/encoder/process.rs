//! Real encoder subprocesses.
//!
//! Each process gets three tasks: one writes queued blocks to stdin, one scans
//! stderr for status markers, and one owns the `Child`, waits for it to exit
//! and performs the stop escalation (close stdin, SIGTERM, SIGKILL).

use crate::config::{EncoderConfig, TargetConfig};
use crate::encoder::markers::{self, Diagnostic};
use crate::encoder::profile::EncoderProfile;
use crate::encoder::supervisor::{self, EncoderEvent, EncoderHandle, EncoderLauncher};
use crate::error::{BridgeError, Result};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Longest diagnostic line kept; the rest of an overlong line is split off.
const MAX_LINE_BYTES: usize = 4096;

/// How long exit reporting waits for stderr to be fully scanned.
const DIAGNOSTICS_DRAIN: Duration = Duration::from_millis(500);

/// Settings applied to every spawned encoder.
#[derive(Debug, Clone)]
pub struct SpawnSettings {
    /// Converted blocks queued for stdin before new ones are dropped.
    pub input_queue: usize,
    /// Wait between teardown steps.
    pub stop_grace: Duration,
}

impl From<&EncoderConfig> for SpawnSettings {
    fn from(config: &EncoderConfig) -> Self {
        Self {
            input_queue: config.input_queue,
            stop_grace: config.stop_grace(),
        }
    }
}

/// Launches the configured encoder binary with the standard profile.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    settings: SpawnSettings,
}

impl ProcessLauncher {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            program: config.program.clone(),
            settings: SpawnSettings::from(config),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl EncoderLauncher for ProcessLauncher {
    fn launch(&self, target: &TargetConfig) -> Result<EncoderHandle> {
        let profile = EncoderProfile::from_target(target)?;
        tracing::info!(
            program = %self.program,
            destination = %profile.redacted_url(),
            sample_rate = target.sample_rate,
            channels = target.channels,
            bitrate_kbps = target.bitrate_kbps,
            "Starting encoder"
        );

        let mut command = Command::new(&self.program);
        command.args(profile.args());
        spawn_encoder(command, &self.settings)
    }
}

/// Spawn `command` as an encoder and wire it to a new handle.
///
/// stdin and stderr are captured, stdout is discarded. Returns as soon as
/// the OS process exists.
pub fn spawn_encoder(mut command: Command, settings: &SpawnSettings) -> Result<EncoderHandle> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| BridgeError::EncoderSpawn {
        program: program.clone(),
        message: spawn_message(&e),
    })?;

    let stdin = child.stdin.take().ok_or_else(|| BridgeError::EncoderPipe {
        message: format!("stdin of '{}' was not captured", program),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| BridgeError::EncoderPipe {
        message: format!("stderr of '{}' was not captured", program),
    })?;

    let (mut handle, endpoint) = supervisor::channel(settings.input_queue);
    handle.set_pid(child.id());
    let id = handle.id();
    tracing::debug!(handle = id, pid = ?child.id(), program = %program, "Encoder spawned");

    let writer = tokio::spawn(write_input(stdin, endpoint.input, id));
    let diagnostics = tokio::spawn(watch_diagnostics(stderr, endpoint.events.clone(), id));
    tokio::spawn(supervise_exit(
        child,
        writer,
        diagnostics,
        endpoint.stop,
        endpoint.events,
        settings.stop_grace,
        id,
    ));

    Ok(handle)
}

fn spawn_message(error: &io::Error) -> String {
    match error.kind() {
        io::ErrorKind::NotFound => "not found (is it installed and on PATH?)".to_string(),
        io::ErrorKind::PermissionDenied => "permission denied".to_string(),
        _ => error.to_string(),
    }
}

fn emit(events: &mpsc::UnboundedSender<EncoderEvent>, event: EncoderEvent, id: u64) {
    if events.send(event).is_err() {
        tracing::trace!(
            handle = id,
            "Session no longer listening for encoder events"
        );
    }
}

async fn write_input(mut stdin: ChildStdin, mut input: mpsc::Receiver<Vec<u8>>, id: u64) {
    while let Some(block) = input.recv().await {
        if let Err(e) = stdin.write_all(&block).await {
            tracing::debug!(handle = id, error = %e, "Encoder stdin closed");
            return;
        }
    }
    // Queue closed by stop(): let the encoder see EOF.
    if let Err(e) = stdin.shutdown().await {
        tracing::debug!(handle = id, error = %e, "Failed to close encoder stdin");
    }
}

async fn watch_diagnostics(
    stderr: ChildStderr,
    events: mpsc::UnboundedSender<EncoderEvent>,
    id: u64,
) {
    let mut lines = DiagnosticLines::new(stderr);
    let mut connected = false;

    // Keep reading after the session stops listening so the encoder never
    // blocks on a full stderr pipe.
    while let Some(line) = lines.next_line().await {
        tracing::debug!(handle = id, "encoder: {}", line);
        match markers::classify(&line) {
            Diagnostic::Established if !connected => {
                connected = true;
                tracing::info!(handle = id, "Encoder connected to ingest server");
                emit(&events, EncoderEvent::Connected, id);
            }
            Diagnostic::Failure(message) => {
                tracing::warn!(handle = id, "Encoder reported: {}", message);
                emit(&events, EncoderEvent::Failure(message), id);
            }
            _ => {}
        }
    }
}

enum ExitCause {
    Exited(io::Result<ExitStatus>),
    StopRequested,
}

async fn supervise_exit(
    mut child: Child,
    mut writer: JoinHandle<()>,
    diagnostics: JoinHandle<()>,
    stop: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<EncoderEvent>,
    grace: Duration,
    id: u64,
) {
    // A dropped stop sender counts as a stop request.
    let cause = tokio::select! {
        status = child.wait() => ExitCause::Exited(status),
        _ = stop => ExitCause::StopRequested,
    };

    let status = match cause {
        ExitCause::Exited(status) => status,
        ExitCause::StopRequested => terminate(&mut child, &mut writer, grace, id).await,
    };

    if timeout(DIAGNOSTICS_DRAIN, diagnostics).await.is_err() {
        tracing::debug!(handle = id, "Encoder stderr still open after exit");
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(handle = id, error = %e, "Failed to collect encoder exit status");
            None
        }
    };
    tracing::info!(handle = id, code = ?code, "Encoder exited");
    emit(&events, EncoderEvent::Exited(code), id);
}

/// Escalating teardown: close stdin, SIGTERM, SIGKILL, each after `grace`.
async fn terminate(
    child: &mut Child,
    writer: &mut JoinHandle<()>,
    grace: Duration,
    id: u64,
) -> io::Result<ExitStatus> {
    if timeout(grace, &mut *writer).await.is_err() {
        tracing::debug!(handle = id, "Encoder stdin blocked, dropping queued audio");
        writer.abort();
    }

    if let Ok(status) = timeout(grace, child.wait()).await {
        return status;
    }

    send_sigterm(child, id);
    if let Ok(status) = timeout(grace, child.wait()).await {
        return status;
    }

    tracing::warn!(handle = id, "Encoder ignored SIGTERM, killing");
    child.kill().await?;
    child.wait().await
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child, id: u64) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: `pid` belongs to our child, which has not been reaped yet
    // (`Child::id` returns None after that).
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(
            handle = id,
            error = %io::Error::last_os_error(),
            "SIGTERM to encoder failed"
        );
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child, id: u64) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(handle = id, error = %e, "Failed to kill encoder");
    }
}

/// Splits a diagnostic stream into lines ending in `\n` or `\r`.
///
/// ffmpeg rewrites its progress line with bare carriage returns; splitting on
/// `\n` alone would grow one line for the whole broadcast.
pub struct DiagnosticLines<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> DiagnosticLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
        }
    }

    /// Next non-empty line, or `None` at end of stream.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            let buf = match self.reader.fill_buf().await {
                Ok(buf) => buf,
                Err(_) => return self.take_pending(),
            };
            if buf.is_empty() {
                return self.take_pending();
            }

            if let Some(pos) = buf.iter().position(|&b| b == b'\n' || b == b'\r') {
                let room = MAX_LINE_BYTES.saturating_sub(self.pending.len());
                self.pending.extend_from_slice(&buf[..pos.min(room)]);
                self.reader.consume(pos + 1);
                match self.take_pending() {
                    Some(line) => return Some(line),
                    None => continue,
                }
            }

            let room = MAX_LINE_BYTES.saturating_sub(self.pending.len());
            let take = buf.len().min(room);
            self.pending.extend_from_slice(&buf[..take]);
            self.reader.consume(take);
            if self.pending.len() >= MAX_LINE_BYTES {
                return self.take_pending();
            }
        }
    }

    fn take_pending(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        if line.is_empty() { None } else { Some(line) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_lines(input: &'static [u8]) -> Vec<String> {
        let mut lines = DiagnosticLines::new(input);
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_lines_split_on_newline_and_carriage_return() {
        let lines = collect_lines(b"Input #0\nsize=1\rsize=2\rStream mapping:\r\nlast").await;
        assert_eq!(
            lines,
            vec!["Input #0", "size=1", "size=2", "Stream mapping:", "last"]
        );
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let lines = collect_lines(b"\n\n\r\n  \nError\n").await;
        assert_eq!(lines, vec!["Error"]);
    }

    #[tokio::test]
    async fn test_overlong_line_is_split() {
        static LONG: [u8; MAX_LINE_BYTES + 10] = [b'x'; MAX_LINE_BYTES + 10];
        let lines = collect_lines(&LONG).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
        assert_eq!(lines[1].len(), 10);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let launcher = ProcessLauncher::new(&EncoderConfig {
            program: "/nonexistent/castbridge-encoder".to_string(),
            ..Default::default()
        });
        let err = launcher.launch(&TargetConfig::default()).unwrap_err();
        match err {
            BridgeError::EncoderSpawn { program, message } => {
                assert_eq!(program, "/nonexistent/castbridge-encoder");
                assert!(message.contains("not found"), "got: {}", message);
            }
            other => panic!("Expected EncoderSpawn, got {:?}", other),
        }
    }

    #[test]
    fn test_spawn_settings_from_config() {
        let settings = SpawnSettings::from(&EncoderConfig {
            input_queue: 7,
            stop_grace_ms: 250,
            ..Default::default()
        });
        assert_eq!(settings.input_queue, 7);
        assert_eq!(settings.stop_grace, Duration::from_millis(250));
    }
}
