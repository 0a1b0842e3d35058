//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use chrono::{DateTime, Utc};
use pack_core::Hash;
use serde::Serialize;
use std::fmt::Display;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Check if JSON mode is enabled.
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Write output using the configured format.
    ///
    /// The `data` parameter must be a serializable struct that includes
    /// `success: bool` and `result_code: u8` fields.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(
        &self,
        data: &T,
        text_fn: impl FnOnce() -> String,
    ) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write one line immediately in text mode; no-op in JSON mode.
    ///
    /// Used by streaming commands, which emit a single JSON document at the end.
    pub fn write_line(&self, line: impl Display) -> Result<()> {
        if self.format == OutputFormat::Text {
            writeln!(&self.stdout, "{}", line)?;
        }
        Ok(())
    }

    /// Report a non-fatal problem on stderr in text mode.
    pub fn warn(&self, message: impl Display) {
        if self.format == OutputFormat::Text {
            let _ = writeln!(io::stderr(), "warning: {}", message);
        }
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    /// In text mode, writes the error message directly.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `make` command.
#[derive(Debug, Serialize)]
pub struct MakeOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: Hash,
    pub files: usize,
    pub bytes: u64,
    pub manifest: String,
    pub completed_at: DateTime<Utc>,
}

/// Output for `regen` command.
#[derive(Debug, Serialize)]
pub struct RegenOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: Hash,
    pub files: usize,
    pub directories_skipped: usize,
    pub completed_at: DateTime<Utc>,
}

/// Output for `gc` command.
#[derive(Debug, Serialize)]
pub struct GcOutput {
    pub success: bool,
    pub result_code: u8,
    pub removed: Vec<Hash>,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Output for `ls` command.
#[derive(Debug, Serialize)]
pub struct LsOutput {
    pub success: bool,
    pub result_code: u8,
    pub blocks: Vec<Hash>,
}

/// Output for `rm` command.
#[derive(Debug, Serialize)]
pub struct RmOutput {
    pub success: bool,
    pub result_code: u8,
    pub removed: String,
}
