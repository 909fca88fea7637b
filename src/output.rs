use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::RunReport;
use crate::settings::PipelineConfig;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_config(config: &PipelineConfig) -> io::Result<()> {
        Self::print_json(config)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Streams new run-log lines to stderr while a non-interactive run is in flight.
pub struct LogEcho {
    printed: usize,
}

impl LogEcho {
    pub fn new() -> Self {
        Self { printed: 0 }
    }

    pub fn echo(&mut self, log: &[String]) -> io::Result<()> {
        // the log is cleared when a run starts
        if log.len() < self.printed {
            self.printed = 0;
        }
        let mut stderr = io::stderr();
        for line in &log[self.printed..] {
            writeln!(stderr, "{line}")?;
        }
        self.printed = log.len();
        Ok(())
    }
}

impl Default for LogEcho {
    fn default() -> Self {
        Self::new()
    }
}
