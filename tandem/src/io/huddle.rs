//! The huddle: project-scoped interaction log and skill store.
//!
//! Lives under `<project>/.brain/`: an append-only `huddle.jsonl` holding
//! every message exchanged between agents, the orchestrator, and the user;
//! a `skills.jsonl` collection of lessons learned across missions; and a
//! `logs/` archive area for full-history snapshots taken during pruning.
//!
//! Records are immutable once appended. The store does not promise
//! retrieval order, so readers sort explicitly by `(ts_ms, seq)`. Callers
//! depend only on this API; the JSONL backend is an implementation detail.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::status::status_window;
use crate::core::types::{HuddleRecord, InteractionKind, SkillRecord, render_transcript};

/// Author name used for orchestrator-written notes.
pub const SYSTEM_AUTHOR: &str = "System";
/// Author name used for ingested user replies.
pub const USER_AUTHOR: &str = "User";

pub struct Huddle {
    state: Mutex<HuddleState>,
}

#[derive(Debug)]
struct HuddleState {
    dir: PathBuf,
    next_seq: u64,
    next_skill_seq: u64,
}

impl Huddle {
    /// Open (or create) the store rooted at `dir`, usually
    /// `<project>/.brain`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let state = bind(dir.into())?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Rebind the store to a different directory (project switch). Sequence
    /// counters continue from whatever the new directory already holds.
    pub fn set_root(&self, dir: impl Into<PathBuf>) -> Result<()> {
        let next = bind(dir.into())?;
        let mut state = self.lock()?;
        *state = next;
        Ok(())
    }

    /// Append one record. Records are immutable once written.
    pub fn log(&self, author: &str, kind: InteractionKind, body: &str) -> Result<HuddleRecord> {
        let mut state = self.lock()?;
        let record = HuddleRecord {
            seq: state.next_seq,
            ts_ms: now_ms(),
            author: author.to_string(),
            kind,
            body: body.to_string(),
        };
        append_line(&log_path(&state.dir), &serde_json::to_string(&record)?)?;
        state.next_seq += 1;
        Ok(record)
    }

    /// All records, unsorted. Malformed lines are skipped with a warning so
    /// one corrupt entry cannot take down the mission.
    pub fn records(&self) -> Result<Vec<HuddleRecord>> {
        let path = log_path(&self.lock()?.dir);
        read_jsonl(&path)
    }

    pub fn record_count(&self) -> Result<usize> {
        Ok(self.records()?.len())
    }

    /// Sequence of the most recently appended record (0 when empty).
    pub fn last_seq(&self) -> u64 {
        self.lock().map(|state| state.next_seq - 1).unwrap_or(0)
    }

    /// The most recent `limit` records in chronological order.
    pub fn query_recent(&self, limit: usize) -> Result<Vec<HuddleRecord>> {
        let mut records = self.records()?;
        sort_records(&mut records);
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }

    /// Records appended after `seq`, in chronological order.
    pub fn records_after(&self, seq: u64) -> Result<Vec<HuddleRecord>> {
        let mut records = self.records()?;
        records.retain(|record| record.seq > seq);
        sort_records(&mut records);
        Ok(records)
    }

    /// Tail of the rendered transcript for sentinel classification.
    /// Best-effort: read failures degrade to an empty window.
    pub fn latest_status_text(&self, max_chars: usize) -> String {
        match self.query_recent(50) {
            Ok(records) => status_window(&records, max_chars),
            Err(err) => {
                warn!(err = %err, "failed to read status window");
                String::new()
            }
        }
    }

    /// Body of the most recent record, if any.
    pub fn latest_entry(&self) -> Option<String> {
        self.query_recent(1)
            .ok()
            .and_then(|records| records.into_iter().next_back())
            .map(|record| record.body)
    }

    /// Bound the log: once it holds more than `threshold` records, archive
    /// the full transcript to `logs/` and replace the live log with a
    /// continuation notice plus the most recent `keep` records.
    ///
    /// The archive write happens strictly before truncation; if it fails
    /// the live log is left untouched. A log at or below the threshold is a
    /// no-op, so repeated calls are idempotent.
    pub fn prune_to_summary(&self, threshold: usize, keep: usize) -> Result<Option<PathBuf>> {
        let mut state = self.lock()?;
        let path = log_path(&state.dir);
        let mut records = read_jsonl(&path)?;
        if records.len() <= threshold {
            return Ok(None);
        }
        sort_records(&mut records);

        let archive_path = state.dir.join("logs").join(format!("archive_{}.md", now_ms()));
        fs::write(&archive_path, render_transcript(&records))
            .with_context(|| format!("archive huddle to {}", archive_path.display()))?;

        let tail_start = records.len().saturating_sub(keep);
        let (pruned, tail) = records.split_at(tail_start);
        let notice = HuddleRecord {
            seq: state.next_seq,
            ts_ms: now_ms(),
            author: SYSTEM_AUTHOR.to_string(),
            kind: InteractionKind::System,
            body: prune_notice(pruned, &archive_path, keep),
        };
        state.next_seq += 1;

        let mut buf = String::new();
        buf.push_str(&serde_json::to_string(&notice)?);
        buf.push('\n');
        for record in tail {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        replace_file(&path, &buf)?;

        info!(
            archived = pruned.len(),
            kept = tail.len(),
            archive = %archive_path.display(),
            "huddle pruned"
        );
        Ok(Some(archive_path))
    }

    /// Persist a lesson keyed by the task it was learned from.
    pub fn add_skill(&self, task: &str, lesson: &str) -> Result<SkillRecord> {
        let mut state = self.lock()?;
        let record = SkillRecord {
            seq: state.next_skill_seq,
            ts_ms: now_ms(),
            task: task.to_string(),
            lesson: lesson.to_string(),
        };
        append_line(&skills_path(&state.dir), &serde_json::to_string(&record)?)?;
        state.next_skill_seq += 1;
        Ok(record)
    }

    pub fn skills(&self) -> Result<Vec<SkillRecord>> {
        let path = skills_path(&self.lock()?.dir);
        read_jsonl(&path)
    }

    /// Skills ranked by term overlap with `text`, most relevant first.
    /// Recency breaks ties. Skills sharing no terms are excluded.
    pub fn query_similar(&self, text: &str, top_k: usize) -> Result<Vec<SkillRecord>> {
        let query = tokenize(text);
        let mut scored: Vec<(usize, SkillRecord)> = self
            .skills()?
            .into_iter()
            .filter_map(|skill| {
                let terms = tokenize(&format!("{} {}", skill.task, skill.lesson));
                let overlap = query.iter().filter(|term| terms.contains(*term)).count();
                (overlap > 0).then_some((overlap, skill))
            })
            .collect();
        scored.sort_by(|(left_score, left), (right_score, right)| {
            right_score
                .cmp(left_score)
                .then_with(|| right.ts_ms.cmp(&left.ts_ms))
        });
        Ok(scored.into_iter().take(top_k).map(|(_, s)| s).collect())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HuddleState>> {
        self.state.lock().map_err(|_| anyhow!("huddle state poisoned"))
    }
}

fn bind(dir: PathBuf) -> Result<HuddleState> {
    fs::create_dir_all(&dir).with_context(|| format!("create huddle dir {}", dir.display()))?;
    let logs_dir = dir.join("logs");
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("create archive dir {}", logs_dir.display()))?;

    let next_seq = next_seq_after(&read_jsonl::<HuddleRecord>(&log_path(&dir))?, |r| r.seq);
    let next_skill_seq = next_seq_after(&read_jsonl::<SkillRecord>(&skills_path(&dir))?, |r| r.seq);
    debug!(dir = %dir.display(), next_seq, next_skill_seq, "huddle bound");
    Ok(HuddleState {
        dir,
        next_seq,
        next_skill_seq,
    })
}

fn next_seq_after<T>(records: &[T], seq: impl Fn(&T) -> u64) -> u64 {
    records.iter().map(seq).max().unwrap_or(0) + 1
}

fn log_path(dir: &Path) -> PathBuf {
    dir.join("huddle.jsonl")
}

fn skills_path(dir: &Path) -> PathBuf {
    dir.join("skills.jsonl")
}

fn sort_records(records: &mut [HuddleRecord]) {
    records.sort_by_key(|record| (record.ts_ms, record.seq));
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("append to {}", path.display()))
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut records = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(err) => warn!(path = %path.display(), err = %err, "skipping malformed record"),
        }
    }
    Ok(records)
}

fn replace_file(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("jsonl.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp log {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace log {}", path.display()))?;
    Ok(())
}

fn prune_notice(pruned: &[HuddleRecord], archive_path: &Path, keep: usize) -> String {
    let mut by_author: BTreeMap<&str, usize> = BTreeMap::new();
    for record in pruned {
        *by_author.entry(record.author.as_str()).or_default() += 1;
    }
    let activity = by_author
        .iter()
        .map(|(author, count)| format!("{author} ({count})"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Context pruned: {} earlier records archived to {}. Activity so far: {}. \
         The mission continues from the most recent {} records below.",
        pruned.len(),
        archive_path.display(),
        activity,
        keep
    )
}

/// Lowercased alphanumeric terms of at least four characters. The length
/// floor stands in for a stopword list.
fn tokenize(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() >= 4)
        .map(str::to_string)
        .collect()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
