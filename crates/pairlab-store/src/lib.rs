use chrono::Local;
use pairlab_core::{SessionState, TrialLogRow, TRIAL_LOG_HEADER};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const ARCHIVE_DIR: &str = "archive";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document {uid:?} is not usable: {reason}")]
    InvalidDocument { uid: String, reason: String },
}

/// Durable home of the session documents: one JSON file per uid, written
/// atomically, plus an `archive/` subdirectory for finished records.
///
/// Single writer per document is assumed; readers may observe only whole
/// documents because saves go through a temp file and a rename.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(ARCHIVE_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_path(&self, uid: &str) -> PathBuf {
        self.root.join(format!("{uid}.json"))
    }

    fn archive_path(&self, uid: &str) -> PathBuf {
        self.root.join(ARCHIVE_DIR).join(format!("{uid}.json"))
    }

    /// Writes the full document under its uid and stamps the save time.
    pub fn save(&self, state: &mut SessionState) -> Result<(), StoreError> {
        state.progress.last_saved = Some(Local::now().format("%Y-%m-%dT%H:%M:%S").to_string());
        let bytes = serde_json::to_vec_pretty(state)?;
        atomic_write(&self.document_path(&state.uid), &bytes)?;
        debug!(uid = %state.uid, "session document saved");
        Ok(())
    }

    /// Loads one document. `Ok(None)` when no file exists for the uid; a
    /// present-but-broken document is an error here (unlike [`load_all`],
    /// the caller asked for this one specifically).
    pub fn load(&self, uid: &str) -> Result<Option<SessionState>, StoreError> {
        let path = self.document_path(uid);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let state: SessionState = serde_json::from_str(&raw)?;
        state
            .check_required()
            .map_err(|err| StoreError::InvalidDocument {
                uid: uid.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Some(state))
    }

    /// Scans the store directory and returns every resumable record, keyed
    /// by uid. Documents that fail to parse or lack required fields are
    /// logged and skipped, never fatal, and stay untouched on disk for
    /// inspection. Completed records are filtered out.
    pub fn load_all(&self) -> Result<BTreeMap<String, SessionState>, StoreError> {
        let mut out = BTreeMap::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if !path.is_file() || path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %path.display(), %err, "unreadable session document skipped");
                    continue;
                }
            };
            let state: SessionState = match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(err) => {
                    warn!(path = %path.display(), %err, "malformed session document skipped");
                    continue;
                }
            };
            if let Err(err) = state.check_required() {
                warn!(path = %path.display(), %err, "incomplete session document skipped");
                continue;
            }
            if state.is_complete() {
                continue;
            }
            out.insert(state.uid.clone(), state);
        }
        Ok(out)
    }

    /// Drops the backing document for a uid; "already gone" is success.
    /// Used when an operator edit re-derives the uid.
    pub fn remove_document(&self, uid: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.document_path(uid)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Retires a fully completed record. No-op for anything still
    /// incomplete; tolerant of the document already being gone.
    pub fn archive_or_delete(&self, state: &SessionState, delete: bool) -> Result<(), StoreError> {
        if !state.is_complete() {
            return Ok(());
        }
        if delete {
            return self.remove_document(&state.uid);
        }
        match fs::rename(
            self.document_path(&state.uid),
            self.archive_path(&state.uid),
        ) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Append-only trial log: one CSV per (pair, session) with a fixed header.
/// Its row count is the ground truth for how many trios actually finished,
/// so rows are written strictly after reward delivery and never rewritten.
pub struct TrialLog {
    root: PathBuf,
}

impl TrialLog {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_path(&self, pair: &str, session: u32) -> PathBuf {
        self.root.join(format!("pairlab_{pair}_S{session}.csv"))
    }

    /// Number of data rows already on disk for the pair/session; 0 when the
    /// log does not exist yet. The header line is not counted.
    pub fn row_count(&self, pair: &str, session: u32) -> Result<u32, StoreError> {
        let file = match File::open(self.log_path(pair, session)) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut lines = 0u32;
        for line in BufReader::new(file).lines() {
            if !line?.trim().is_empty() {
                lines += 1;
            }
        }
        Ok(lines.saturating_sub(1))
    }

    /// Appends one row, creating the file (with header) on first write.
    /// Existing rows are never touched.
    pub fn append_row(&self, row: &TrialLogRow) -> Result<PathBuf, StoreError> {
        let path = self.log_path(&row.pair, row.session);
        let is_new = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut chunk = String::new();
        if is_new {
            chunk.push_str(&csv_line(&TRIAL_LOG_HEADER));
        }
        chunk.push_str(&csv_line(&row.fields()));
        file.write_all(chunk.as_bytes())?;
        Ok(path)
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let tmp = dir.join(format!(".{stem}.tmp.{}", std::process::id()));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|field| csv_cell(field.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Minimal CSV quoting. Newlines collapse to spaces so the log keeps one
/// physical line per row, which is what the row counter reads.
fn csv_cell(raw: &str) -> String {
    let flat = if raw.contains('\n') || raw.contains('\r') {
        raw.replace(['\n', '\r'], " ")
    } else {
        raw.to_string()
    };
    if flat.contains(',') || flat.contains('"') {
        format!("\"{}\"", flat.replace('"', "\"\""))
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairlab_core::{
        ChoiceOption, SessionConfig, SessionStatus, StimulusLabel, TrialLogRow,
    };
    use pairlab_core::Side;
    use std::collections::HashMap;

    fn sample_config() -> SessionConfig {
        SessionConfig {
            leader: "Ira".to_string(),
            follower: "Irene".to_string(),
            left_side: "Ira".to_string(),
            right_side: "Irene".to_string(),
            stimulus_profile: "Dark S+".to_string(),
            sessions_total: 2,
            extra: HashMap::new(),
        }
    }

    fn sample_state() -> SessionState {
        SessionState::new(sample_config())
    }

    fn sample_row(session: u32, trial: u32) -> TrialLogRow {
        TrialLogRow {
            date: chrono::NaiveDate::from_ymd_opt(2026, 2, 23).expect("date"),
            time: chrono::NaiveTime::from_hms_opt(10, 30, 0).expect("time"),
            stimulus_profile: "Dark S+".to_string(),
            pair: "Ira-Irene".to_string(),
            leader_side: Side::Left,
            leader: "Ira".to_string(),
            follower: "Irene".to_string(),
            session,
            block: (trial - 1) / 7 + 1,
            trial,
            leader_choice: ChoiceOption::Large,
            leader_choice_ms: 1200,
            follower_choice: ChoiceOption::Small,
            follower_choice_ms: 1500,
            leader_stimulus: StimulusLabel::SPlus,
            leader_hit: true,
            leader_rt_ms: 900,
            follower_stimulus: StimulusLabel::Intermediate,
            follower_hit: false,
            follower_rt_ms: 5000,
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::open(dir.path()).expect("open store");
        let mut state = sample_state();
        state.progress.rebase_completed(9);

        store.save(&mut state).expect("save");
        assert!(state.progress.last_saved.is_some());

        let loaded = store
            .load(&state.uid)
            .expect("load")
            .expect("document exists");
        assert_eq!(loaded, state);
        assert_eq!(loaded.progress.completed_trios, 9);
    }

    #[test]
    fn load_missing_document_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::open(dir.path()).expect("open store");
        assert!(store.load("no-such-uid").expect("load").is_none());
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::open(dir.path()).expect("open store");
        let mut state = sample_state();
        store.save(&mut state).expect("save");

        let names: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.contains(".tmp.")), "{names:?}");
    }

    #[test]
    fn load_all_skips_broken_and_complete_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::open(dir.path()).expect("open store");

        let mut good = sample_state();
        store.save(&mut good).expect("save good");

        let mut done = sample_state();
        done.config.follower = "Paddy".to_string();
        done.config.right_side = "Paddy".to_string();
        done.uid = done.config.uid();
        done.status = SessionStatus::Complete;
        store.save(&mut done).expect("save complete");

        let broken_path = dir.path().join("broken.json");
        fs::write(&broken_path, "{ not json").expect("write broken");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write txt");

        let all = store.load_all().expect("load all");
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(&good.uid));
        // the broken file is left on disk for inspection
        assert!(broken_path.exists());
    }

    #[test]
    fn load_all_skips_documents_missing_required_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::open(dir.path()).expect("open store");
        fs::write(
            dir.path().join("empty-leader.json"),
            r#"{"uid":"x","config":{"leader":"","follower":"Irene","stimulus_profile":"Dark S+","sessions_total":2}}"#,
        )
        .expect("write doc");

        let all = store.load_all().expect("load all");
        assert!(all.is_empty());
    }

    #[test]
    fn archive_or_delete_respects_status_and_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::open(dir.path()).expect("open store");
        let mut state = sample_state();
        store.save(&mut state).expect("save");

        // still incomplete: untouched
        store.archive_or_delete(&state, true).expect("noop");
        assert!(store.document_path(&state.uid).exists());

        state.status = SessionStatus::Complete;
        store.save(&mut state).expect("save complete");
        store.archive_or_delete(&state, false).expect("archive");
        assert!(!store.document_path(&state.uid).exists());
        assert!(store.archive_path(&state.uid).exists());

        // already gone counts as success
        store.archive_or_delete(&state, true).expect("tolerates gone");
    }

    #[test]
    fn delete_flag_removes_the_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::open(dir.path()).expect("open store");
        let mut state = sample_state();
        state.status = SessionStatus::Complete;
        store.save(&mut state).expect("save");

        store.archive_or_delete(&state, true).expect("delete");
        assert!(!store.document_path(&state.uid).exists());
        assert!(!store.archive_path(&state.uid).exists());
    }

    #[test]
    fn remove_document_tolerates_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::open(dir.path()).expect("open store");
        store.remove_document("never-existed").expect("remove");
    }

    #[test]
    fn row_count_is_zero_without_a_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = TrialLog::open(dir.path()).expect("open log");
        assert_eq!(log.row_count("Ira-Irene", 1).expect("count"), 0);
    }

    #[test]
    fn append_creates_header_once_and_counts_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = TrialLog::open(dir.path()).expect("open log");

        for trial in 1..=3 {
            log.append_row(&sample_row(1, trial)).expect("append");
        }
        assert_eq!(log.row_count("Ira-Irene", 1).expect("count"), 3);

        let raw = fs::read_to_string(log.log_path("Ira-Irene", 1)).expect("read log");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], TRIAL_LOG_HEADER.join(","));
        assert!(lines[1].starts_with("2026-02-23,10:30:00,Dark S+,Ira-Irene,Left,"));
        assert!(lines[1].contains(",LS,"));

        // appending never rewrites what is already there
        log.append_row(&sample_row(1, 4)).expect("append");
        let again = fs::read_to_string(log.log_path("Ira-Irene", 1)).expect("read log");
        assert!(again.starts_with(&raw));
    }

    #[test]
    fn sessions_log_to_separate_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = TrialLog::open(dir.path()).expect("open log");
        log.append_row(&sample_row(1, 28)).expect("append s1");
        log.append_row(&sample_row(2, 1)).expect("append s2");

        assert_eq!(log.row_count("Ira-Irene", 1).expect("count"), 1);
        assert_eq!(log.row_count("Ira-Irene", 2).expect("count"), 1);
        assert!(log.log_path("Ira-Irene", 1).exists());
        assert!(log.log_path("Ira-Irene", 2).exists());
    }

    #[test]
    fn csv_cells_quote_commas_and_flatten_newlines() {
        assert_eq!(csv_cell("plain"), "plain");
        assert_eq!(csv_cell("a,b"), "\"a,b\"");
        assert_eq!(csv_cell("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_cell("two\nlines"), "two lines");

        let mut row = sample_row(1, 1);
        row.stimulus_profile = "Dark, custom".to_string();
        let line = csv_line(&row.fields());
        assert!(line.contains("\"Dark, custom\""));
        assert_eq!(line.matches('\n').count(), 1);
    }
}
