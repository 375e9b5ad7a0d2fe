use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

impl OutputMode {
    pub fn sink(self) -> Box<dyn ProgressSink> {
        match self {
            OutputMode::Interactive => Box::new(LineProgress),
            OutputMode::NonInteractive => Box::new(JsonOutput),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// One stderr line per event, e.g. `[2024-01-01T00:00:00+00:00] Wrote datasets/... in 3ms`.
pub struct LineProgress;

impl ProgressSink for LineProgress {
    fn event(&self, event: ProgressEvent) {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let line = match event.elapsed {
            Some(elapsed) => format!("[{timestamp}] {} in {}ms", event.message, elapsed.as_millis()),
            None => format!("[{timestamp}] {}", event.message),
        };
        let _ = writeln!(io::stderr(), "{line}");
    }
}
