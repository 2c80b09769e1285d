//! System diagnostics and dependency checking.
//!
//! Verifies that the encoder is installed with MP3 support and that the
//! configuration can actually be served.

use crate::config::Config;
use owo_colors::OwoColorize;
use std::path::Path;
use std::process::Command;

/// Result of a dependency check.
#[derive(Debug, PartialEq)]
pub enum CheckResult {
    /// Tool is installed and working
    Ok,
    /// Tool is not found
    NotFound,
    /// Tool is found but has issues (e.g., missing codec)
    Warning(String),
}

/// Check if a command exists and is executable.
fn check_command(command: &str) -> CheckResult {
    match Command::new(command).arg("-version").output() {
        Ok(output) if output.status.success() => CheckResult::Ok,
        Ok(_) => CheckResult::Warning(format!("'{}' found but -version failed", command)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CheckResult::NotFound,
        Err(e) => CheckResult::Warning(format!("Error checking '{}': {}", command, e)),
    }
}

/// First line of the encoder's version banner.
fn encoder_version(command: &str) -> Option<String> {
    let output = Command::new(command).arg("-version").output().ok()?;
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

/// Check that the encoder lists the MP3 encoder the stream profile uses.
fn check_mp3_encoder(command: &str) -> CheckResult {
    match Command::new(command)
        .args(["-hide_banner", "-encoders"])
        .output()
    {
        Ok(output) => {
            if String::from_utf8_lossy(&output.stdout).contains("libmp3lame") {
                CheckResult::Ok
            } else {
                CheckResult::Warning(
                    "libmp3lame not listed; the encoder was built without MP3 support".to_string(),
                )
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CheckResult::NotFound,
        Err(e) => CheckResult::Warning(format!("Error listing encoders: {}", e)),
    }
}

/// Check that the static directory has a page to serve.
fn check_static_dir(dir: &Path) -> CheckResult {
    if !dir.is_dir() {
        CheckResult::NotFound
    } else if !dir.join("index.html").is_file() {
        CheckResult::Warning(format!("{} has no index.html", dir.display()))
    } else {
        CheckResult::Ok
    }
}

fn print_result(result: &CheckResult, ok_note: &str) -> bool {
    match result {
        CheckResult::Ok => {
            println!("{} {}", "✓ OK".green(), ok_note);
            true
        }
        CheckResult::NotFound => {
            println!("{}", "✗ NOT FOUND".red());
            false
        }
        CheckResult::Warning(msg) => {
            println!("{} {}", "⚠ WARNING:".yellow(), msg);
            false
        }
    }
}

/// Run all dependency checks and print results.
///
/// Returns `true` when the relay can start encoders.
pub fn check_dependencies(config: &Config) -> bool {
    println!("Checking castbridge dependencies...\n");
    let program = config.encoder.program.as_str();

    print!("encoder ({}): ", program);
    let encoder_result = check_command(program);
    let version = encoder_version(program).unwrap_or_default();
    let encoder_ok = print_result(&encoder_result, &version);
    if encoder_result == CheckResult::NotFound {
        println!("  Install: sudo apt install ffmpeg  (Debian/Ubuntu)");
        println!("           sudo pacman -S ffmpeg    (Arch)");
        println!("           brew install ffmpeg      (macOS)");
        println!("  Or point CASTBRIDGE_ENCODER / [encoder].program at a binary.");
    }

    let mut mp3_ok = false;
    if encoder_ok {
        print!("MP3 encoder (libmp3lame): ");
        mp3_ok = print_result(&check_mp3_encoder(program), "");
    }

    print!(
        "target ({}:{}{}): ",
        config.target.host, config.target.port, config.target.mountpoint
    );
    let target_ok = match config.validate() {
        Ok(()) => {
            println!("{}", "✓ OK".green());
            true
        }
        Err(e) => {
            println!("{} {}", "✗ INVALID:".red(), e);
            false
        }
    };

    print!("static files ({}): ", config.server.static_dir.display());
    let static_result = check_static_dir(&config.server.static_dir);
    if static_result == CheckResult::NotFound {
        println!(
            "{}",
            "- not found (only the WebSocket relay will be served)".dimmed()
        );
    } else {
        print_result(&static_result, "");
    }

    let ready = encoder_ok && mp3_ok && target_ok;
    println!();
    if ready {
        println!("{}", "Ready to relay.".green().bold());
    } else {
        println!("{}", "Not ready: fix the items above.".red().bold());
    }
    ready
}
