use crate::core::message::{Message, MessageStatus, Role};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const USER_PREFIX: &str = "You";

/// Plain-text transcript log written by `polychat chat --log <file>`.
pub struct LoggingState {
    file_path: Option<PathBuf>,
}

impl LoggingState {
    pub fn new(log_file: Option<PathBuf>) -> io::Result<Self> {
        if let Some(path) = &log_file {
            // Fail at startup rather than on the first finished turn.
            OpenOptions::new().create(true).append(true).open(path)?;
        }
        Ok(Self {
            file_path: log_file,
        })
    }

    pub fn is_active(&self) -> bool {
        self.file_path.is_some()
    }

    pub fn status_string(&self) -> String {
        match &self.file_path {
            None => "disabled".to_string(),
            Some(path) => format!(
                "active ({})",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
        }
    }

    /// Append one settled message. Streaming messages are not logged.
    pub fn log_message(&self, message: &Message) -> io::Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        if message.status() == MessageStatus::Streaming {
            return Ok(());
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        write_message(&mut writer, message)?;
        writer.flush()
    }

    /// Append a `## `-prefixed note, such as a conversation boundary.
    pub fn log_note(&self, note: &str) -> io::Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "## {note}")?;
        writeln!(file)
    }

    /// Replace the log with the settled part of `transcript`, e.g. after a
    /// regenerate dropped the last reply.
    pub fn rewrite(&self, transcript: &[Message]) -> io::Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp_file = NamedTempFile::new_in(parent)?;
        for message in transcript
            .iter()
            .filter(|message| message.status() != MessageStatus::Streaming)
        {
            write_message(&mut temp_file, message)?;
        }
        temp_file.flush()?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(path)?;
        Ok(())
    }
}

fn write_message<W: Write>(writer: &mut W, message: &Message) -> io::Result<()> {
    let text = match message.role() {
        Role::User => format!("{USER_PREFIX}: {}", message.content()),
        Role::Assistant => message.content().to_string(),
    };
    for line in text.lines() {
        writeln!(writer, "{line}")?;
    }
    if let Some(reason) = message.failure() {
        writeln!(writer, "## {reason}")?;
    }
    writeln!(writer)
}
