use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;

/// Results file name inside the data directory.
pub const FILE: &str = "games.jsonl";

/// Outcome record of one hosted game.
///
/// The full deployment hands this to a statistics database; here it is
/// appended to a JSON-lines file so nothing is lost.
#[derive(Debug, Default, Clone, Serialize)]
pub struct GameRecord {
    pub game_name: String,
    pub map: String,
    pub players: Vec<String>,
    pub started: bool,
    pub duration_secs: u64,
    pub winners: Vec<String>,
}

/// Append-only sink for finished games.
#[derive(Debug)]
pub struct StatsSink {
    path: PathBuf,
}

impl StatsSink {
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            path: data_dir.join(FILE),
        }
    }

    /// Persist one finished game.
    ///
    /// A write failure is logged and swallowed; the in-memory record stays
    /// authoritative.
    pub fn commit(&self, record: &GameRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                error!(target: "warhost", "Failed to serialize game record: {}", err);
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(err) = result {
            error!(target: "warhost", "Failed to write game record: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes() {
        let record = GameRecord {
            game_name: "test".into(),
            map: "maps/x.w3x".into(),
            players: vec!["alice".into()],
            started: true,
            duration_secs: 300,
            winners: vec![],
        };
        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains("\"started\":true"));
    }
}
