use crate::error::{SimError, SimResult};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

enum Sink {
    File(File),
    Memory(Vec<(usize, String)>),
    Discard,
}

/// Column-indented progress output.
///
/// Each vehicle writes into its own column so concurrent journeys can be
/// read side by side. Lines go to stdout and are appended to a text file.
pub struct ProgressLog {
    column_width: usize,
    console: bool,
    sink: Mutex<Sink>,
}

impl ProgressLog {
    /// Truncates `path`, then keeps appending to it for the rest of the run.
    pub fn open(path: &Path, column_width: usize, console: bool) -> SimResult<Self> {
        let unavailable = |e: std::io::Error| {
            SimError::exhausted(format!("log file {}", path.display()), e.to_string())
        };
        File::create(path).map_err(unavailable)?;
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(unavailable)?;
        Ok(Self {
            column_width,
            console,
            sink: Mutex::new(Sink::File(file)),
        })
    }

    /// Keeps every message in memory instead of printing it.
    pub fn in_memory() -> Self {
        Self {
            column_width: 0,
            console: false,
            sink: Mutex::new(Sink::Memory(Vec::new())),
        }
    }

    pub fn disabled() -> Self {
        Self {
            column_width: 0,
            console: false,
            sink: Mutex::new(Sink::Discard),
        }
    }

    pub fn message(&self, column: usize, text: &str) {
        let Ok(mut sink) = self.sink.lock() else {
            return;
        };
        let indent = " ".repeat(column * self.column_width);
        if self.console {
            println!("{indent}{text}");
        }
        match &mut *sink {
            Sink::File(file) => {
                if let Err(e) = writeln!(file, "{indent}{text}") {
                    log::warn!("progress log write failed: {}", e);
                }
            }
            Sink::Memory(lines) => lines.push((column, text.to_string())),
            Sink::Discard => {}
        }
    }

    /// One heading per vehicle column.
    pub fn header(&self, vehicles: usize) {
        let width = self.column_width.max(1);
        let heading: String = (0..vehicles)
            .map(|n| format!("{:<width$}", format!("Vehicle {n}")))
            .collect();
        self.message(0, heading.trim_end());
    }

    /// Messages captured by an in-memory log, in write order.
    pub fn lines(&self) -> Vec<(usize, String)> {
        match self.sink.lock().as_deref() {
            Ok(Sink::Memory(lines)) => lines.clone(),
            _ => Vec::new(),
        }
    }

    /// Captured messages written in one column.
    pub fn column(&self, column: usize) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(c, _)| *c == column)
            .map(|(_, text)| text)
            .collect()
    }
}
