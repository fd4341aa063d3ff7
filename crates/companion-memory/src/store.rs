//! Long-term memory store.
//!
//! An append-only, human-editable markdown file.  Each entry is one block:
//!
//! ```text
//! ## Memory Entry [2026-10-18 Sunday 14:05]
//! **Importance**: 4
//! **Summary**: One paragraph of prose.
//! ```
//!
//! Entries are only ever appended by this process, with a single write under
//! a writer lock.  People may edit the file between runs, so reading is
//! lenient: a missing or unreadable importance falls back to the default and
//! a block whose header timestamp cannot be parsed is skipped.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::buffer::tail_chars;
use crate::error::Result;
use crate::fsio;

const HEADER: &str = "## Memory Entry [";

pub const MIN_IMPORTANCE: u8 = 1;
pub const MAX_IMPORTANCE: u8 = 5;
pub const DEFAULT_IMPORTANCE: u8 = 3;

// Field markers only count at the start of a line, so prose such as
// "in summary: ..." is never mistaken for one.
static IMPORTANCE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*\*{0,2}[ \t]*importance[ \t]*\*{0,2}[ \t]*[:：][ \t]*\**[ \t]*(\d+)").ok()
});

static IMPORTANCE_LINE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*\*{0,2}\s*importance\s*\*{0,2}\s*[:：]").ok());

static SUMMARY_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*\*{0,2}[ \t]*summary[ \t]*\*{0,2}[ \t]*[:：]").ok()
});

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// One summarized memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryEntry {
    /// Local wall-clock time, minute precision.
    pub timestamp: NaiveDateTime,
    pub summary: String,
    /// Always within `1..=5`.
    pub importance: u8,
}

impl MemoryEntry {
    /// Create an entry.  Importance is clamped into range and the summary is
    /// collapsed to a single paragraph.
    pub fn new(timestamp: NaiveDateTime, summary: &str, importance: u8) -> Self {
        Self {
            timestamp: truncate_to_minute(timestamp),
            summary: collapse_whitespace(summary),
            importance: clamp_importance(u64::from(importance)),
        }
    }

    /// An entry stamped with the current local time.
    pub fn now(summary: &str, importance: u8) -> Self {
        Self::new(Local::now().naive_local(), summary, importance)
    }

    /// The on-disk block, without surrounding blank lines.
    pub fn render(&self) -> String {
        format!(
            "{HEADER}{}]\n**Importance**: {}\n**Summary**: {}",
            self.timestamp.format("%Y-%m-%d %A %H:%M"),
            self.importance,
            self.summary
        )
    }
}

fn truncate_to_minute(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp_importance(value: u64) -> u8 {
    // Bounded by MAX_IMPORTANCE, so the cast cannot truncate.
    value.clamp(u64::from(MIN_IMPORTANCE), u64::from(MAX_IMPORTANCE)) as u8
}

/// Extract an importance marker from free text, clamped into `1..=5`.
/// Returns `None` when there is no numeric marker.
pub fn parse_importance(text: &str) -> Option<u8> {
    let digits = IMPORTANCE_RE.as_ref()?.captures(text)?.get(1)?.as_str();
    Some(clamp_importance(digits.parse::<u64>().unwrap_or(u64::MAX)))
}

/// Extract the summary paragraph from free text.
///
/// With a `Summary:` marker line, the summary runs from the marker up to the
/// next importance marker or entry header.  Without one, every line that is
/// not a header or importance marker counts.
pub fn parse_summary(text: &str) -> String {
    if let Some(marker) = SUMMARY_RE.as_ref().and_then(|re| re.find(text)) {
        let rest = text[marker.end()..].trim_start_matches(['*', ' ', '\t']);
        let mut lines = rest.lines();
        let first = lines.next().unwrap_or_default();
        let body: Vec<&str> = std::iter::once(first)
            .chain(lines.take_while(|l| !is_field_boundary(l)))
            .collect();
        return collapse_whitespace(&body.join(" "));
    }
    let body: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#') && !l.starts_with("```"))
        .filter(|l| !is_importance_line(l))
        .collect();
    collapse_whitespace(&body.join(" "))
}

fn is_importance_line(line: &str) -> bool {
    IMPORTANCE_LINE_RE
        .as_ref()
        .is_some_and(|re| re.is_match(line))
}

/// A line that ends a summary paragraph.
fn is_field_boundary(line: &str) -> bool {
    line.trim_start().starts_with(HEADER) || is_importance_line(line)
}

/// Parse the bracketed header timestamp, e.g. `2026-10-18 Sunday 14:05`.
/// The first token is the date and the last the time; anything between (the
/// weekday) is ignored.
fn parse_header_timestamp(inner: &str) -> Option<NaiveDateTime> {
    let mut tokens = inner.split_whitespace();
    let date = NaiveDate::parse_from_str(tokens.next()?, "%Y-%m-%d").ok()?;
    let time = match tokens.next_back() {
        Some(t) => NaiveTime::parse_from_str(t, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
            .ok()?,
        None => NaiveTime::MIN,
    };
    Some(date.and_time(time))
}

fn parse_block(block: &str, default_importance: u8) -> Option<MemoryEntry> {
    let rest = block.strip_prefix(HEADER)?;
    let (header_line, body) = rest.split_once('\n').unwrap_or((rest, ""));
    let inner = header_line.split(']').next().unwrap_or_default();

    let Some(timestamp) = parse_header_timestamp(inner) else {
        warn!(header = %header_line.trim(), "skipping memory entry with unreadable timestamp");
        return None;
    };

    Some(MemoryEntry {
        timestamp,
        summary: parse_summary(body),
        importance: parse_importance(body).unwrap_or(default_importance),
    })
}

/// Byte offset of the next line starting with the entry header.
fn find_header(text: &str) -> Option<usize> {
    if text.starts_with(HEADER) {
        return Some(0);
    }
    text.find(&format!("\n{HEADER}")).map(|i| i + 1)
}

// ---------------------------------------------------------------------------
// Iterator
// ---------------------------------------------------------------------------

/// Lazy iterator over the entries of one read of the memory file, in
/// insertion order.  Each call to [`MemoryStore::all`] starts a fresh one.
#[derive(Debug, Clone)]
pub struct MemoryEntries {
    text: String,
    pos: usize,
    default_importance: u8,
}

impl Iterator for MemoryEntries {
    type Item = MemoryEntry;

    fn next(&mut self) -> Option<MemoryEntry> {
        loop {
            let rest = &self.text[self.pos..];
            let start = find_header(rest)?;
            let body_start = start + HEADER.len();
            let end = find_header(&rest[body_start..]).map_or(rest.len(), |e| body_start + e);
            let block = &rest[start..end];
            self.pos += end;

            if let Some(entry) = parse_block(block, self.default_importance) {
                return Some(entry);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Append-only persisted sequence of [`MemoryEntry`] records.
#[derive(Debug)]
pub struct MemoryStore {
    path: PathBuf,
    default_importance: u8,
    writer: Mutex<()>,
}

impl MemoryStore {
    /// Open (or prepare to create) the memory file at `path`.
    pub fn open(path: impl Into<PathBuf>, default_importance: u8) -> Result<Self> {
        let path = path.into();
        fsio::ensure_parent(&path)?;
        info!(path = %path.display(), "memory store opened");
        Ok(Self {
            path,
            default_importance: clamp_importance(u64::from(default_importance)),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_importance(&self) -> u8 {
        self.default_importance
    }

    /// Durably append one entry.  On error the file is unchanged.
    #[instrument(skip(self, entry), fields(importance = entry.importance))]
    pub async fn append(&self, entry: &MemoryEntry) -> Result<()> {
        let _writer = self.writer.lock().await;

        let path = self.path.clone();
        let rendered = entry.render();
        fsio::blocking(move || {
            let existing = std::fs::metadata(&path).map_or(0, |m| m.len());
            let mut block = String::with_capacity(rendered.len() + 2);
            if existing > 0 {
                block.push('\n');
            }
            block.push_str(&rendered);
            block.push('\n');
            fsio::append_durable(&path, block.as_bytes())
        })
        .await?;
        debug!(path = %self.path.display(), "memory entry appended");
        Ok(())
    }

    /// Every entry in insertion order.  Reads the file once; parsing is lazy.
    pub fn all(&self) -> Result<MemoryEntries> {
        Ok(MemoryEntries {
            text: fsio::read_or_empty(&self.path)?,
            pos: 0,
            default_importance: self.default_importance,
        })
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.all()?.count())
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Result<Vec<MemoryEntry>> {
        let entries: Vec<_> = self.all()?.collect();
        let skip = entries.len().saturating_sub(n);
        Ok(entries.into_iter().skip(skip).collect())
    }

    /// The rendered entries joined by blank lines, keeping at most the last
    /// `max_chars` characters.  Used for prompt injection.
    pub fn render_tail(&self, max_chars: usize) -> Result<String> {
        let rendered = self
            .all()?
            .map(|e| e.render())
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(tail_chars(&rendered, max_chars).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(dir.path().join("memory.md"), DEFAULT_IMPORTANCE).unwrap();
        (dir, store)
    }

    #[test]
    fn render_format() {
        let entry = MemoryEntry::new(ts("2026-10-18 14:05"), "We talked\n about  tea.", 4);
        assert_eq!(
            entry.render(),
            "## Memory Entry [2026-10-18 Sunday 14:05]\n**Importance**: 4\n**Summary**: We talked about tea."
        );
    }

    #[test]
    fn importance_is_clamped() {
        assert_eq!(MemoryEntry::new(ts("2026-01-01 00:00"), "x", 0).importance, 1);
        assert_eq!(MemoryEntry::new(ts("2026-01-01 00:00"), "x", 9).importance, 5);
        assert_eq!(parse_importance("**Importance**: 7"), Some(5));
        assert_eq!(parse_importance("importance: 0"), Some(1));
        assert_eq!(parse_importance("Importance: 99999999999999999999999"), Some(5));
        assert_eq!(parse_importance("**Importance**: X"), None);
        assert_eq!(parse_importance("nothing here"), None);
    }

    #[test]
    fn summary_stops_at_importance_marker() {
        let raw = "**Summary**: We planned a trip\nto the coast.\n**Importance**: 4";
        assert_eq!(parse_summary(raw), "We planned a trip to the coast.");
        assert_eq!(parse_importance(raw), Some(4));

        let bold_colon = "**Summary:** Quiet evening.\n**Importance:** 2\n";
        assert_eq!(parse_summary(bold_colon), "Quiet evening.");
        assert_eq!(parse_importance(bold_colon), Some(2));
    }

    #[test]
    fn summary_stops_at_next_entry_header() {
        let raw = "**Summary**: First.\n## Memory Entry [2026-10-18 Sunday 10:00]\n**Summary**: Second.";
        assert_eq!(parse_summary(raw), "First.");
    }

    #[test]
    fn markers_must_start_a_line() {
        let raw = "We went for a walk. In summary: a calm day.\nThe importance: 5 stars, they said.";
        assert_eq!(
            parse_summary(raw),
            "We went for a walk. In summary: a calm day. The importance: 5 stars, they said."
        );
        assert_eq!(parse_importance(raw), None);
    }

    #[tokio::test]
    async fn append_then_all_preserves_order() {
        let (_dir, store) = store();
        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            let entry = MemoryEntry::new(ts("2026-10-18 10:00"), text, i as u8 + 2);
            store.append(&entry).await.unwrap();
        }

        let entries: Vec<_> = store.all().unwrap().collect();
        let summaries: Vec<_> = entries.iter().map(|e| e.summary.as_str()).collect();
        assert_eq!(summaries, ["first", "second", "third"]);
        assert_eq!(entries[2].importance, 4);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn all_is_restartable() {
        let (_dir, store) = store();
        store
            .append(&MemoryEntry::new(ts("2026-10-18 10:00"), "a", 3))
            .await
            .unwrap();
        store
            .append(&MemoryEntry::new(ts("2026-10-18 11:00"), "b", 5))
            .await
            .unwrap();

        let first: Vec<_> = store.all().unwrap().collect();
        let second: Vec<_> = store.all().unwrap().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_store_has_no_entries() {
        let (_dir, store) = store();
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.render_tail(100).unwrap(), "");
    }

    #[test]
    fn hand_edited_file_is_read_leniently() {
        let (_dir, store) = store();
        let text = "\
Some notes written by hand at the top.

## Memory Entry [2026-10-17 Saturday 21:40]
**Importance**: high
**Summary**: The importance above is not a number.

## Memory Entry [yesterday-ish]
**Importance**: 5
**Summary**: Unparsable header, skipped.

## Memory Entry [2026-10-18 Sunday 08:15:30]
Just a plain paragraph
spread over two lines.
";
        std::fs::write(store.path(), text).unwrap();

        let entries: Vec<_> = store.all().unwrap().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].importance, DEFAULT_IMPORTANCE);
        assert_eq!(entries[0].summary, "The importance above is not a number.");
        assert_eq!(entries[1].timestamp, ts("2026-10-18 08:15") + chrono::Duration::seconds(30));
        assert_eq!(entries[1].summary, "Just a plain paragraph spread over two lines.");
    }

    #[tokio::test]
    async fn recent_and_render_tail() {
        let (_dir, store) = store();
        for text in ["one", "two", "three"] {
            store
                .append(&MemoryEntry::new(ts("2026-10-18 09:00"), text, 3))
                .await
                .unwrap();
        }
        let recent = store.recent(2).unwrap();
        assert_eq!(recent[0].summary, "two");
        assert_eq!(recent[1].summary, "three");

        let tail = store.render_tail(20).unwrap();
        assert_eq!(tail.chars().count(), 20);
        assert!(tail.ends_with("three"));
    }

    #[tokio::test]
    async fn appended_file_is_human_readable() {
        let (_dir, store) = store();
        store
            .append(&MemoryEntry::new(ts("2026-10-18 09:00"), "a", 2))
            .await
            .unwrap();
        store
            .append(&MemoryEntry::new(ts("2026-10-18 10:00"), "b", 3))
            .await
            .unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            text,
            "## Memory Entry [2026-10-18 Sunday 09:00]\n**Importance**: 2\n**Summary**: a\n\n\
             ## Memory Entry [2026-10-18 Sunday 10:00]\n**Importance**: 3\n**Summary**: b\n"
        );
    }
}
