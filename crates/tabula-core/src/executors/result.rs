//! Result assembly: bounds captured text and composes the final report.

use super::controller::{CapturedOutput, ExecOutcome};
use super::outbound::RetrievedArtifacts;
use super::ExecutionResult;

pub const STDOUT_TRUNCATION_MARKER: &str = "\n...[OUTPUT TRUNCATED]...";
pub const STDERR_TRUNCATION_MARKER: &str = "\n...[ERRORS TRUNCATED]...";

/// Status reported when the wall-clock bound was exceeded
pub const TIMEOUT_STATUS_CODE: i64 = 124;

/// Keeps at most `max_chars` characters of `text`, appending `marker` when
/// anything was cut. Cuts always land on a char boundary.
pub fn truncate_output(text: String, max_chars: usize, marker: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut truncated = text;
            truncated.truncate(cut);
            truncated.push_str(marker);
            truncated
        }
        None => text,
    }
}

fn bound_stream(bytes: &[u8], dropped: usize, max_chars: usize, marker: &str) -> String {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let bounded = truncate_output(text, max_chars, marker);
    // Bytes dropped at capture time still count as truncation
    if dropped > 0 && !bounded.ends_with(marker) {
        return bounded + marker;
    }
    bounded
}

fn round_seconds(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

#[derive(Debug, Clone)]
pub struct ResultAssembler {
    max_log_length: usize,
}

impl ResultAssembler {
    pub fn new(max_log_length: usize) -> Self {
        Self { max_log_length }
    }

    pub fn assemble(&self, outcome: ExecOutcome, artifacts: RetrievedArtifacts) -> ExecutionResult {
        let execution_time = round_seconds(outcome.elapsed().as_secs_f64());

        match outcome {
            ExecOutcome::Completed {
                exit_code, output, ..
            } => {
                let (stdout, stderr) = self.bound(&output, None);
                ExecutionResult {
                    status_code: exit_code,
                    stdout,
                    stderr,
                    execution_time,
                    files_generated: artifacts.files_generated,
                    host_file_paths: artifacts.host_file_paths,
                    timed_out: false,
                }
            }
            ExecOutcome::TimedOut { output, limit, .. } => {
                let note = format!(
                    "Execution exceeded the time limit of {}s and the sandbox was terminated.",
                    limit.as_secs_f64()
                );
                let (stdout, stderr) = self.bound(&output, Some(&note));
                ExecutionResult {
                    status_code: TIMEOUT_STATUS_CODE,
                    stdout,
                    stderr,
                    execution_time,
                    files_generated: artifacts.files_generated,
                    host_file_paths: artifacts.host_file_paths,
                    timed_out: true,
                }
            }
        }
    }

    fn bound(&self, output: &CapturedOutput, stderr_note: Option<&str>) -> (String, String) {
        let stdout = bound_stream(
            &output.stdout,
            output.stdout_dropped,
            self.max_log_length,
            STDOUT_TRUNCATION_MARKER,
        );

        // The note goes first so truncation can never cut it off
        let stderr = match stderr_note {
            Some(note) => {
                let mut bytes = Vec::with_capacity(note.len() + 1 + output.stderr.len());
                bytes.extend_from_slice(note.as_bytes());
                if !output.stderr.is_empty() {
                    bytes.push(b'\n');
                    bytes.extend_from_slice(&output.stderr);
                }
                bound_stream(
                    &bytes,
                    output.stderr_dropped,
                    self.max_log_length,
                    STDERR_TRUNCATION_MARKER,
                )
            }
            None => bound_stream(
                &output.stderr,
                output.stderr_dropped,
                self.max_log_length,
                STDERR_TRUNCATION_MARKER,
            ),
        };

        (stdout, stderr)
    }
}
