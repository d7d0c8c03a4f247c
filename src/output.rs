use crossterm::style::Stylize;
use std::fmt;
use std::io::Write;

use crate::utils::get_color;

/// One line of tail output: `<timestamp> [<pod>]: <summary>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine {
    pub timestamp: String,
    pub pod_name: String,
    pub summary: String,
}

impl fmt::Display for RenderedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.timestamp, self.pod_name, self.summary)
    }
}

/// Destination for rendered lines. Implementations serialize their own writes.
pub trait LineSink: Send + Sync {
    fn write_line(&self, line: &RenderedLine) -> std::io::Result<()>;
}

/// Writes lines to the process stdout.
#[derive(Debug, Default)]
pub struct StdoutSink {
    color: bool,
}

impl StdoutSink {
    pub fn new(color: bool) -> Self {
        Self { color }
    }
}

impl LineSink for StdoutSink {
    fn write_line(&self, line: &RenderedLine) -> std::io::Result<()> {
        let mut stdout = std::io::stdout().lock();
        if self.color {
            let prefix = format!("[{}]", line.pod_name).with(get_color(&line.pod_name));
            writeln!(stdout, "{} {}: {}", line.timestamp, prefix, line.summary)?;
        } else {
            writeln!(stdout, "{}", line)?;
        }
        stdout.flush()
    }
}

/// Collects lines in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: parking_lot::Mutex<Vec<String>>,
    fail: bool,
}

#[cfg(test)]
impl MemorySink {
    /// A sink whose every write fails, like a closed pipe.
    pub fn broken() -> Self {
        Self {
            lines: Default::default(),
            fail: true,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

#[cfg(test)]
impl LineSink for MemorySink {
    fn write_line(&self, line: &RenderedLine) -> std::io::Result<()> {
        if self.fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdout closed",
            ));
        }
        self.lines.lock().push(line.to_string());
        Ok(())
    }
}
