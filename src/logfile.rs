use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Local;

/// The two append-only text logs: a main log and a remote log.
///
/// Lines are prefixed with a local timestamp; nothing in the bot reads them
/// back.
#[derive(Debug, Default)]
pub struct LogFiles {
    main: Option<File>,
    remote: Option<File>,
}

impl LogFiles {
    pub fn open(main_path: &str, remote_path: &str) -> Self {
        Self {
            main: open_append(main_path),
            remote: open_append(remote_path),
        }
    }

    /// Append a line to the main log.
    pub fn log(&mut self, line: &str) {
        write_line(&mut self.main, line);
    }

    /// Append a line to the remote log.
    pub fn log_remote(&mut self, line: &str) {
        write_line(&mut self.remote, line);
    }
}

fn open_append(path: &str) -> Option<File> {
    if path.is_empty() {
        return None;
    }
    match OpenOptions::new().create(true).append(true).open(Path::new(path)) {
        Ok(file) => Some(file),
        Err(err) => {
            warn!(target: "warhost", "Cannot open log file {}: {}", path, err);
            None
        }
    }
}

fn write_line(file: &mut Option<File>, line: &str) {
    if let Some(file) = file {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        if let Err(err) = writeln!(file, "[{}] {}", stamp, line) {
            warn!(target: "warhost", "Log write failed: {}", err);
        }
    }
}
