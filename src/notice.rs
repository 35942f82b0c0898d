//! Purpose: Structured stderr notices for non-fatal extraction events.
//! Exports: `NoticeKind`, `Notice`, `notice_json`, `timestamp_now`.
//! Role: Reports dump content the CLI read but could not export, without failing the run.
//! Invariants: Notices never alter stdout payloads.
//! Invariants: The `{"notice":{...}}` field set is additive-only.
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::extract::ExtractStats;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NoticeKind {
    /// Rows were decoded but not exported.
    Skip,
    /// Input ended inside an `INSERT` statement.
    Unterminated,
}

impl NoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NoticeKind::Skip => "skip",
            NoticeKind::Unterminated => "unterminated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub time: String,
    pub cmd: String,
    /// Dump the event was observed in.
    pub source: String,
    pub message: String,
    pub details: Map<String, Value>,
}

impl Notice {
    pub fn new(
        kind: NoticeKind,
        cmd: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            time: timestamp_now(),
            cmd: cmd.into(),
            source: source.into(),
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn unterminated(cmd: &str, source: &str, stats: &ExtractStats) -> Self {
        Self::new(
            NoticeKind::Unterminated,
            cmd,
            source,
            "Dump ended inside an INSERT statement; its rows were dropped.",
        )
        .with_detail("unterminated", stats.unterminated)
        .with_detail("statements", stats.statements)
    }

    pub fn skipped_rows(cmd: &str, source: &str, table: &str, skipped: u64, reason: &str) -> Self {
        let plural = if skipped == 1 { "" } else { "s" };
        Self::new(
            NoticeKind::Skip,
            cmd,
            source,
            format!("Skipped {skipped} {table} row{plural}: {reason}."),
        )
        .with_detail("skipped", skipped)
        .with_detail("table", table)
    }
}

/// Current UTC time as RFC 3339; `"unknown"` if the clock cannot be formatted.
pub fn timestamp_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

pub fn notice_json(notice: &Notice) -> Value {
    json!({
        "notice": {
            "kind": notice.kind.as_str(),
            "time": notice.time,
            "cmd": notice.cmd,
            "source": notice.source,
            "message": notice.message,
            "details": notice.details,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{Notice, NoticeKind, notice_json};
    use crate::core::extract::ExtractStats;

    #[test]
    fn skipped_rows_notice_counts_and_pluralizes() {
        let one = Notice::skipped_rows("attachments", "dump.sql", "t", 1, "no content");
        assert_eq!(one.kind, NoticeKind::Skip);
        assert_eq!(one.message, "Skipped 1 t row: no content.");

        let many = Notice::skipped_rows("attachments", "dump.sql", "t", 3, "no content");
        assert_eq!(many.message, "Skipped 3 t rows: no content.");
        assert_eq!(many.details["skipped"], 3);
        assert_eq!(many.details["table"], "t");
    }

    #[test]
    fn unterminated_notice_renders_envelope() {
        let stats = ExtractStats {
            statements: 4,
            unterminated: 1,
            ..ExtractStats::default()
        };
        let value = notice_json(&Notice::unterminated("extract", "mantisbt.sql", &stats));
        let inner = &value["notice"];
        assert_eq!(inner["kind"], "unterminated");
        assert_eq!(inner["cmd"], "extract");
        assert_eq!(inner["source"], "mantisbt.sql");
        assert_eq!(inner["details"]["statements"], 4);
        assert!(inner["time"].as_str().is_some_and(|time| !time.is_empty()));
    }
}
