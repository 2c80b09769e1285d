//! Classification of encoder diagnostic lines.
//!
//! ffmpeg has no structured status channel on stderr, so connection state is
//! inferred from a fixed table of text markers. Everything that knows about
//! those strings lives here; the supervisor only sees [`Diagnostic`].

/// What a single diagnostic line says about the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The output is open and audio is flowing to the ingest server.
    Established,
    /// The encoder reported a problem. Carries the trimmed line.
    Failure(String),
    /// Anything else (banner, progress, codec details).
    Chatter,
}

/// Substrings that mean the stream reached the ingest server.
///
/// `Stream mapping:` is printed only after every output was opened, which for
/// an `icecast://` output means the source connection was accepted.
pub const ESTABLISHED_MARKERS: &[&str] = &[
    "Connection established",
    "Server connection established",
    "Starting streaming",
    "Stream mapping:",
];

/// Substrings that mean something went wrong.
pub const FAILURE_MARKERS: &[&str] = &[
    "Error",
    "error",
    "Failed",
    "failed",
    "Could not",
    "Connection refused",
    "Unauthorized",
    "Invalid",
];

/// Line prefixes that may contain failure words without reporting a failure.
///
/// The build banner lists configure flags such as `--disable-error-resilience`.
const BENIGN_PREFIXES: &[&str] = &["configuration:", "built with", "lib", "ffmpeg version"];

/// Classify one diagnostic line.
pub fn classify(line: &str) -> Diagnostic {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Diagnostic::Chatter;
    }

    if ESTABLISHED_MARKERS.iter().any(|m| trimmed.contains(m)) {
        return Diagnostic::Established;
    }

    if BENIGN_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        return Diagnostic::Chatter;
    }

    if FAILURE_MARKERS.iter().any(|m| trimmed.contains(m)) {
        return Diagnostic::Failure(trimmed.to_string());
    }

    Diagnostic::Chatter
}
