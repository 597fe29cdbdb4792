/// File-backed decision journal
///
/// One JSON-Lines file per trader under the journal root. Appends are
/// serialized behind a mutex so concurrent writers cannot interleave lines;
/// reads parse the tail of the file. Corrupt lines are skipped with a
/// warning instead of poisoning history.
use super::types::DecisionRecord;
use crate::errors::JournalError;
use crate::logger::{self, LogTag};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;

const JOURNAL_FILE: &str = "decisions.jsonl";

pub struct DecisionJournal {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DecisionJournal {
    /// Open (creating if needed) the journal directory for one trader
    pub fn open(root: impl Into<PathBuf>, trader_id: &str) -> Result<Self, JournalError> {
        let dir = root.into().join(trader_id);
        fs::create_dir_all(&dir).map_err(|e| JournalError::Io {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn file_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Append one record. Safe for concurrent callers.
    pub async fn append(&self, record: &DecisionRecord) -> Result<(), JournalError> {
        let line = serde_json::to_string(record).map_err(|e| JournalError::Corrupt {
            path: self.file_path().display().to_string(),
            message: e.to_string(),
        })?;

        let _guard = self.write_lock.lock().await;
        let path = self.file_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| JournalError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        writeln!(file, "{}", line).map_err(|e| JournalError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Read the most recent `limit` records, oldest first
    pub async fn read_recent(&self, limit: usize) -> Result<Vec<DecisionRecord>, JournalError> {
        let path = self.file_path();
        let _guard = self.write_lock.lock().await;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(JournalError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(limit);
        let mut records = Vec::with_capacity(lines.len() - start);
        for line in &lines[start..] {
            match serde_json::from_str::<DecisionRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    logger::warning(
                        LogTag::Journal,
                        &format!("skipping corrupt journal line: {}", e),
                    );
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::types::DecisionAction;

    #[tokio::test]
    async fn test_append_and_read_recent() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = DecisionJournal::open(tmp.path(), "alpha").unwrap();

        for i in 0..5 {
            let mut record = DecisionRecord::new("binance");
            record.log_line(format!("cycle {}", i));
            journal.append(&record).await.unwrap();
        }

        let recent = journal.read_recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].execution_log[0], "cycle 2");
        assert_eq!(recent[2].execution_log[0], "cycle 4");
    }

    #[tokio::test]
    async fn test_read_empty_journal() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = DecisionJournal::open(tmp.path(), "beta").unwrap();
        assert!(journal.read_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_lines_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = DecisionJournal::open(tmp.path(), "gamma").unwrap();

        let mut record = DecisionRecord::new("aster");
        record.actions.push(DecisionAction::new("wait", "ALL"));
        journal.append(&record).await.unwrap();

        // Corrupt the file by hand
        let path = tmp.path().join("gamma").join("decisions.jsonl");
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{not json}\n");
        fs::write(&path, content).unwrap();

        journal.append(&DecisionRecord::new("aster")).await.unwrap();

        let recent = journal.read_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
    }
}
