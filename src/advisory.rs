//! Advisory backend boundary.
//!
//! The engine only knows the [`AdvisoryClient`] trait; the default
//! implementation shells out to a planner CLI (`claude -p` by default) for
//! simplicity and composability, with the prompt as the last argument. One
//! call per request, stateless.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AdvisorySettings;

/// Failures of the advisory backend itself. The engine folds these into an
/// `advisory_api` error state; it never retries on its own.
#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("failed to invoke advisory command '{program}': {detail}")]
    Spawn { program: String, detail: String },
    #[error("advisory command failed: {0}")]
    Command(String),
    #[error("advisory command produced no output")]
    Empty,
    #[error("advisory command timed out after {0:?}")]
    TimedOut(Duration),
}

/// The remote reasoning backend, reduced to two blocking text operations.
pub trait AdvisoryClient: Send + Sync {
    /// Produce the next-step response for an assembled prompt.
    fn generate(&self, prompt: &str) -> Result<String, AdvisoryError>;

    /// Condense conversation text into a shorter summary.
    fn summarize(&self, text: &str) -> Result<String, AdvisoryError>;
}

/// Subprocess-backed advisory client.
pub struct CommandAdvisory {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAdvisory {
    pub fn new(settings: &AdvisorySettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    /// Run the configured command with `input` appended as the last argument
    /// and a wall-clock deadline. Output is drained on a separate thread so a
    /// chatty child can't deadlock on a full pipe while we wait on it.
    fn run(&self, input: &str) -> Result<String, AdvisoryError> {
        debug!(program = %self.program, prompt_chars = input.len(), "calling advisory backend");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AdvisoryError::Spawn {
                program: self.program.clone(),
                detail: e.to_string(),
            })?;

        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
        let stdout_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stdout_pipe.read_to_string(&mut buf);
            buf
        });
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf);
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!(program = %self.program, "advisory command hit timeout, killing");
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(AdvisoryError::TimedOut(self.timeout));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(AdvisoryError::Command(e.to_string())),
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(AdvisoryError::Command(format!(
                "exit {:?}: {}",
                status.code(),
                stderr.trim()
            )));
        }

        let text = stdout.trim().to_string();
        if text.is_empty() {
            return Err(AdvisoryError::Empty);
        }
        info!(response_chars = text.len(), "advisory responded");
        Ok(text)
    }
}

impl AdvisoryClient for CommandAdvisory {
    fn generate(&self, prompt: &str) -> Result<String, AdvisoryError> {
        self.run(prompt)
    }

    fn summarize(&self, text: &str) -> Result<String, AdvisoryError> {
        let prompt = format!(
            "Condense the following coordination conversation into a compact summary. \
             Keep decisions, file names, completed steps, and open problems; drop \
             pleasantries and repetition. Respond with the summary text only.\n\n{text}"
        );
        self.run(&prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(program: &str, args: &[&str]) -> CommandAdvisory {
        CommandAdvisory::new(&AdvisorySettings {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 5,
        })
    }

    #[test]
    fn generate_returns_trimmed_stdout() {
        // `echo` receives the prompt as its argument and prints it back.
        let c = client("echo", &[]);
        let out = c.generate("hello advisory").unwrap();
        assert_eq!(out, "hello advisory");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let c = client("definitely-not-a-real-binary-xyz", &[]);
        assert!(matches!(
            c.generate("x"),
            Err(AdvisoryError::Spawn { .. })
        ));
    }

    #[test]
    fn nonzero_exit_is_a_command_error() {
        let c = client("false", &[]);
        assert!(matches!(c.generate("x"), Err(AdvisoryError::Command(_))));
    }

    #[test]
    fn empty_output_is_rejected() {
        let c = client("true", &[]);
        assert!(matches!(c.generate("x"), Err(AdvisoryError::Empty)));
    }

    #[test]
    fn slow_command_times_out() {
        let c = CommandAdvisory {
            program: "sleep".to_string(),
            args: vec![],
            timeout: Duration::from_millis(200),
        };
        // `sleep 5` as the single argument.
        assert!(matches!(c.run("5"), Err(AdvisoryError::TimedOut(_))));
    }

    #[test]
    fn summarize_wraps_text_in_a_summary_prompt() {
        let c = client("echo", &[]);
        let out = c.summarize("turn one\nturn two").unwrap();
        assert!(out.contains("turn one"));
        assert!(out.contains("Condense"));
    }
}
