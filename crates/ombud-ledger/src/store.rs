//! CSV-backed complaint store with in-memory indexes.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ombud_types::{LedgerRecord, OmbudError};

/// First-column values that mark an optional header row.
const HEADER_NAMES: &[&str] = &["display_id", "DisplayId", "ComplaintID", "complaint_id"];

#[derive(Debug, Default, Clone)]
struct StoredFields {
    message_id: String,
    portal_id: String,
    cached_name: String,
}

/// Thread-safe durable ledger.
///
/// One mutex covers both the file and the indexes, so readers observe
/// either the pre-state or the post-state of any mutation. Writes are
/// flushed before the indexes change (write-then-index): after a crash
/// the in-memory view rebuilt at startup always matches the file.
pub struct Ledger {
    path: PathBuf,
    records: Mutex<HashMap<String, StoredFields>>,
}

impl Ledger {
    /// Open the ledger, loading any existing rows into the indexes.
    ///
    /// A missing file is the normal first-run case. A leading header row is
    /// skipped; malformed rows are logged and skipped, never fatal.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OmbudError> {
        let path = path.as_ref().to_path_buf();
        let records = match File::open(&path) {
            Ok(file) => load_rows(&path, file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no existing ledger file, starting empty");
                HashMap::new()
            }
            Err(e) => {
                return Err(OmbudError::Ledger(format!(
                    "cannot open {}: {e}",
                    path.display()
                )))
            }
        };

        tracing::info!(
            path = %path.display(),
            known = records.len(),
            "ledger loaded"
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// True iff the complaint has never been recorded.
    pub fn is_new(&self, display_id: &str) -> bool {
        !self.records.lock().unwrap().contains_key(display_id)
    }

    /// Chat message id for a complaint; empty string if absent.
    pub fn message_id(&self, display_id: &str) -> String {
        self.field(display_id, |f| f.message_id.clone())
    }

    /// Portal backend id for a complaint; empty string if absent.
    pub fn portal_id(&self, display_id: &str) -> String {
        self.field(display_id, |f| f.portal_id.clone())
    }

    /// Cached complainant name; empty string if absent.
    pub fn cached_name(&self, display_id: &str) -> String {
        self.field(display_id, |f| f.cached_name.clone())
    }

    fn field(&self, display_id: &str, pick: impl Fn(&StoredFields) -> String) -> String {
        self.records
            .lock()
            .unwrap()
            .get(display_id)
            .map(pick)
            .unwrap_or_default()
    }

    /// Snapshot of every known display id.
    pub fn all_known(&self) -> Vec<String> {
        self.records.lock().unwrap().keys().cloned().collect()
    }

    /// Atomically persist and index a batch of records.
    ///
    /// Rows are appended and flushed before the indexes are touched; on an
    /// I/O error nothing is indexed and the whole batch stays "new".
    pub fn save_batch(&self, batch: &[LedgerRecord]) -> Result<(), OmbudError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut records = self.records.lock().unwrap();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| OmbudError::Ledger(format!("cannot append to {}: {e}", self.path.display())))?;
        let mut writer = BufWriter::new(file);

        for r in batch {
            let line = crate::csv::write_row(&[
                &r.display_id,
                &r.message_id,
                &r.portal_id,
                &r.cached_name,
            ]);
            writeln!(writer, "{line}")
                .map_err(|e| OmbudError::Ledger(format!("write failed: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| OmbudError::Ledger(format!("flush failed: {e}")))?;

        for r in batch {
            records.insert(
                r.display_id.clone(),
                StoredFields {
                    message_id: r.message_id.clone(),
                    portal_id: r.portal_id.clone(),
                    cached_name: r.cached_name.clone(),
                },
            );
        }

        Ok(())
    }

    /// Durably remove a complaint. A no-op (still rewriting nothing new)
    /// when the id is absent.
    pub fn remove(&self, display_id: &str) -> Result<(), OmbudError> {
        let mut records = self.records.lock().unwrap();
        if records.remove(display_id).is_none() {
            return Ok(());
        }
        rewrite(&self.path, &records)
    }

    /// Atomic compare-and-remove. Returns whether a removal happened;
    /// `Ok(false)` exactly when the id was already gone.
    pub fn remove_if_present(&self, display_id: &str) -> Result<bool, OmbudError> {
        let mut records = self.records.lock().unwrap();
        if records.remove(display_id).is_none() {
            return Ok(false);
        }
        rewrite(&self.path, &records)?;
        Ok(true)
    }
}

/// Load all rows from an open ledger file.
fn load_rows(path: &Path, file: File) -> HashMap<String, StoredFields> {
    let mut records = HashMap::new();
    let reader = BufReader::new(file);

    for (idx, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(path = %path.display(), line = idx + 1, error = %e, "unreadable ledger line, skipping");
                continue;
            }
        };
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let fields = crate::csv::parse_row(line);
        if idx == 0 && HEADER_NAMES.contains(&fields[0].as_str()) {
            continue;
        }
        if fields[0].is_empty() {
            tracing::warn!(path = %path.display(), line = idx + 1, "ledger row without a display id, skipping");
            continue;
        }

        let get = |i: usize| fields.get(i).cloned().unwrap_or_default();
        records.insert(
            fields[0].clone(),
            StoredFields {
                message_id: get(1),
                portal_id: get(2),
                cached_name: get(3),
            },
        );
    }

    records
}

/// Rewrite the whole file from the in-memory state. Caller holds the lock.
fn rewrite(path: &Path, records: &HashMap<String, StoredFields>) -> Result<(), OmbudError> {
    let file = File::create(path)
        .map_err(|e| OmbudError::Ledger(format!("cannot rewrite {}: {e}", path.display())))?;
    let mut writer = BufWriter::new(file);

    for (display_id, f) in records {
        let line = crate::csv::write_row(&[display_id, &f.message_id, &f.portal_id, &f.cached_name]);
        writeln!(writer, "{line}").map_err(|e| OmbudError::Ledger(format!("write failed: {e}")))?;
    }

    writer
        .flush()
        .map_err(|e| OmbudError::Ledger(format!("flush failed: {e}")))
}
