//! Synchronous runtime-dependency probe.
//!
//! Adapters call [`probe_binary`] before building a launch spec to find out
//! whether their server binary is installed. The probe never panics and never
//! blocks much past the timeout: a hung binary is killed and reported as not
//! found, and stdout held open by a leftover grandchild is abandoned.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Minimum wait for the first stdout line once the binary has exited.
const OUTPUT_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Found { path: PathBuf, version: String },
    NotFound,
}

impl ProbeOutcome {
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }
}

/// Run `program args...` and report whether it exited successfully.
///
/// `version` is the first non-empty line of stdout, or `"<program> available"`
/// when the binary prints nothing.
#[must_use]
pub fn probe_binary(program: &str, args: &[&str], timeout: Duration) -> ProbeOutcome {
    let Ok(path) = which::which(program) else {
        tracing::debug!(program, "probe: not found in PATH");
        return ProbeOutcome::NotFound;
    };

    let mut child = match Command::new(&path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!(program, "probe: spawn failed: {e}");
            return ProbeOutcome::NotFound;
        }
    };

    // Drain stdout on a detached thread so a full pipe cannot stall the child.
    // Only the first non-empty line is reported back.
    let stdout = child.stdout.take();
    let (line_tx, line_rx) = mpsc::channel();
    thread::spawn(move || {
        let Some(stdout) = stdout else {
            return;
        };
        let mut sent = false;
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            let line = line.trim();
            if !sent && !line.is_empty() {
                let _ = line_tx.send(line.to_string());
                sent = true;
            }
        }
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                tracing::warn!(program, ?timeout, "probe timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                return ProbeOutcome::NotFound;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                tracing::debug!(program, "probe: wait failed: {e}");
                let _ = child.kill();
                return ProbeOutcome::NotFound;
            }
        }
    };
    if !status.success() {
        tracing::debug!(program, %status, "probe: binary exited unsuccessfully");
        return ProbeOutcome::NotFound;
    }

    // A grandchild may keep stdout open after the binary exits.
    let wait = deadline
        .saturating_duration_since(Instant::now())
        .max(OUTPUT_GRACE);
    let version = line_rx
        .recv_timeout(wait)
        .unwrap_or_else(|_| format!("{program} available"));
    ProbeOutcome::Found { path, version }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_not_found() {
        let outcome = probe_binary(
            "polyglot-definitely-not-installed",
            &["--help"],
            Duration::from_secs(1),
        );
        assert_eq!(outcome, ProbeOutcome::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_binary_reports_first_line() {
        let outcome = probe_binary("sh", &["-c", "echo; echo 'fake 1.2.3'; echo more"], Duration::from_secs(5));
        match outcome {
            ProbeOutcome::Found { version, .. } => assert_eq!(version, "fake 1.2.3"),
            ProbeOutcome::NotFound => panic!("sh should be found"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_binary_reports_available() {
        let outcome = probe_binary("sh", &["-c", "true"], Duration::from_secs(5));
        assert_eq!(
            outcome,
            ProbeOutcome::Found {
                path: which::which("sh").unwrap(),
                version: "sh available".into()
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_binary_is_not_found() {
        let outcome = probe_binary("sh", &["-c", "exit 2"], Duration::from_secs(5));
        assert!(!outcome.is_found());
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_binary_times_out() {
        let started = Instant::now();
        let outcome = probe_binary("sh", &["-c", "exec sleep 30"], Duration::from_millis(200));
        assert_eq!(outcome, ProbeOutcome::NotFound);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_binary_with_background_child_times_out() {
        let started = Instant::now();
        let outcome = probe_binary("sh", &["-c", "sleep 6 & wait"], Duration::from_millis(200));
        assert_eq!(outcome, ProbeOutcome::NotFound);
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_binary_with_background_child_still_reports_version() {
        let started = Instant::now();
        let outcome = probe_binary(
            "sh",
            &["-c", "echo 'fake 2.0'; sleep 6 &"],
            Duration::from_secs(1),
        );
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        match outcome {
            ProbeOutcome::Found { version, .. } => assert_eq!(version, "fake 2.0"),
            ProbeOutcome::NotFound => panic!("sh should be found"),
        }
    }
}
