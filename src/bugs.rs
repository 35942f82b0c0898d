//! Purpose: Join the Mantis tables into the per-bug export document.
//! Exports: `Records`, `LabelSet`, `BugTables`, `AttachmentIndex`, `load_attachment_index`,
//! `build_bug_export`.
//! Role: Collaborator downstream of extraction; consumes records keyed by `records_by_id`.
//! Invariants: Joins compare the key text of id columns (`5` and `'5'` both join as `"5"`).
//! Invariants: Dangling references yield empty summaries and empty labels, never errors.
//! Invariants: A limit keeps the lowest bug ids plus only the rows those bugs reference.
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::catalog::{columns_for, records_by_id, zip_rows};
use crate::core::error::{Error, ErrorKind};
use crate::core::extract::TableRows;
use crate::labels::EnumLabels;

/// Records keyed by the text of their first column.
pub type Records = BTreeMap<String, Value>;

/// Manifest entries grouped by bug id key.
pub type AttachmentIndex = BTreeMap<String, Vec<Value>>;

/// Bug columns that get a `<column>_label` sibling, with the enum each one reads.
const BUG_LABELS: &[(&str, &str)] = &[
    ("priority", "priority"),
    ("severity", "severity"),
    ("reproducibility", "reproducibility"),
    ("status", "status"),
    ("resolution", "resolution"),
    ("projection", "projection"),
    ("eta", "eta"),
    ("view_state", "view_state"),
];

const MANIFEST_FIELDS: &[&str] = &[
    "file_id",
    "filename",
    "diskfile",
    "filesize",
    "file_type",
    "title",
    "description",
    "path",
];

#[derive(Clone, Debug, Default)]
pub struct LabelSet {
    /// Output of `labels::enum_label_maps`.
    pub enums: BTreeMap<String, EnumLabels>,
    /// Output of `labels::note_type_labels`.
    pub note_types: EnumLabels,
}

impl LabelSet {
    fn label(&self, enum_name: &str, value: Option<&Value>) -> String {
        let Some(labels) = self.enums.get(enum_name) else {
            return String::new();
        };
        label_key(value)
            .and_then(|key| labels.get(&key))
            .cloned()
            .unwrap_or_default()
    }

    /// Note types only match integer values; there is no text fallback.
    fn note_type_label(&self, value: Option<&Value>) -> String {
        value
            .and_then(Value::as_i64)
            .and_then(|value| self.note_types.get(&value.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default)]
pub struct BugTables {
    pub bugs: Records,
    pub bug_texts: Records,
    pub users: Records,
    pub categories: Records,
    pub projects: Records,
    pub bugnote_texts: Records,
    pub tags: Records,
    pub bugnotes: Vec<Value>,
    pub relationships: Vec<Value>,
    pub history: Vec<Value>,
    pub bug_tags: Vec<Value>,
}

impl BugTables {
    /// Moves the catalog tables out of `rows`.
    pub fn from_rows(rows: &mut TableRows) -> Self {
        Self {
            bugs: keyed(rows, "mantis_bug_table"),
            bug_texts: keyed(rows, "mantis_bug_text_table"),
            users: keyed(rows, "mantis_user_table"),
            categories: keyed(rows, "mantis_category_table"),
            projects: keyed(rows, "mantis_project_table"),
            bugnote_texts: keyed(rows, "mantis_bugnote_text_table"),
            tags: keyed(rows, "mantis_tag_table"),
            bugnotes: listed(rows, "mantis_bugnote_table"),
            relationships: listed(rows, "mantis_bug_relationship_table"),
            history: listed(rows, "mantis_bug_history_table"),
            bug_tags: listed(rows, "mantis_bug_tag_table"),
        }
    }

    /// Keeps the `limit` lowest bug ids and the rows that hang off them.
    pub fn limit(&mut self, limit: usize) {
        let mut ids = self.bugs.keys().collect::<Vec<_>>();
        ids.sort_by(|a, b| compare_keys(a, b));
        let keep = ids
            .into_iter()
            .take(limit)
            .cloned()
            .collect::<BTreeSet<_>>();
        self.bugs.retain(|id, _| keep.contains(id));

        let text_ids = referenced(self.bugs.values(), &["bug_text_id"]);
        self.bug_texts.retain(|id, _| text_ids.contains(id));

        self.bugnotes.retain(|note| refers_to(note, "bug_id", &keep));
        let note_text_ids = referenced(&self.bugnotes, &["bugnote_text_id"]);
        self.bugnote_texts.retain(|id, _| note_text_ids.contains(id));

        self.relationships
            .retain(|rel| refers_to(rel, "source_bug_id", &keep));
        self.history.retain(|entry| refers_to(entry, "bug_id", &keep));

        self.bug_tags.retain(|link| refers_to(link, "bug_id", &keep));
        let tag_ids = referenced(&self.bug_tags, &["tag_id"]);
        self.tags.retain(|id, _| tag_ids.contains(id));

        let project_ids = referenced(self.bugs.values(), &["project_id"]);
        self.projects.retain(|id, _| project_ids.contains(id));
        let category_ids = referenced(self.bugs.values(), &["category_id"]);
        self.categories.retain(|id, _| category_ids.contains(id));

        let mut user_ids = referenced(self.bugs.values(), &["reporter_id", "handler_id"]);
        user_ids.extend(referenced(&self.bugnotes, &["reporter_id"]));
        user_ids.extend(referenced(&self.history, &["user_id"]));
        self.users.retain(|id, _| user_ids.contains(id));
    }
}

/// Reads a `manifest.jsonl` written by the attachment export and groups it by bug.
/// Returns `None` when the manifest does not exist. Lines without an integer bug id are skipped.
pub fn load_attachment_index(path: &Path) -> Result<Option<AttachmentIndex>, Error> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no attachment manifest");
            return Ok(None);
        }
        Err(err) => {
            return Err(Error::io(err, "failed to read attachment manifest").with_path(path));
        }
    };

    let mut index = AttachmentIndex::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: Value = serde_json::from_str(line).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid attachment manifest line")
                .with_path(path)
                .with_line(idx as u64 + 1)
                .with_hint("Regenerate it with `mantis-extract attachments`.")
                .with_source(err)
        })?;
        let Some(bug_id) = entry.get("bug_id").and_then(integer_key) else {
            continue;
        };
        let attachment = MANIFEST_FIELDS
            .iter()
            .map(|name| (name.to_string(), field_or_null(Some(&entry), name)))
            .collect::<Map<_, _>>();
        index
            .entry(bug_id)
            .or_default()
            .push(Value::Object(attachment));
    }
    Ok(Some(index))
}

/// Builds the joined document: counts, labels, `*_by_id` maps and the flat lists.
/// Bugs get `attachments` only when an index is given.
pub fn build_bug_export(
    tables: BugTables,
    labels: &LabelSet,
    attachments: Option<&AttachmentIndex>,
) -> Map<String, Value> {
    let BugTables {
        mut bugs,
        bug_texts,
        users,
        categories,
        projects,
        bugnote_texts,
        tags,
        mut bugnotes,
        relationships,
        history,
        bug_tags,
    } = tables;

    for note in &mut bugnotes {
        enrich_note(note, &bugnote_texts, &users, labels);
    }
    for bug in bugs.values_mut() {
        enrich_bug(bug, &bug_texts, &users, &projects, &categories, labels);
    }

    let notes_by_bug = group_by(&bugnotes, "bug_id");
    let rels_by_bug = group_by(&relationships, "source_bug_id");
    let history_by_bug = group_by(&history, "bug_id");
    let tags_by_bug = tag_links(&bug_tags, &tags);
    for (bug_id, bug) in &mut bugs {
        let Some(record) = bug.as_object_mut() else {
            continue;
        };
        let take = |groups: &BTreeMap<String, Vec<Value>>| {
            Value::Array(groups.get(bug_id).cloned().unwrap_or_default())
        };
        record.insert("bugnotes".to_string(), take(&notes_by_bug));
        record.insert("relationships".to_string(), take(&rels_by_bug));
        record.insert("history".to_string(), take(&history_by_bug));
        record.insert("tags".to_string(), take(&tags_by_bug));
        if let Some(index) = attachments {
            record.insert("attachments".to_string(), take(index));
        }
    }

    let bugnotes_by_id = bugnotes
        .iter()
        .filter_map(|note| Some((key_text(note.get("id")?)?, note.clone())))
        .collect::<Records>();

    let counts = json!({
        "bugs": bugs.len(),
        "bug_texts": bug_texts.len(),
        "bugnotes": bugnotes.len(),
        "bugnote_texts": bugnote_texts.len(),
        "relationships": relationships.len(),
        "history": history.len(),
        "projects": projects.len(),
        "categories": categories.len(),
        "users": users.len(),
        "tags": tags.len(),
        "bug_tags": bug_tags.len(),
    });

    [
        ("counts", counts),
        ("enum_labels", json!(labels.enums)),
        ("note_type_labels", json!(labels.note_types)),
        ("bugs_by_id", object(bugs)),
        ("bug_texts_by_id", object(bug_texts)),
        ("users_by_id", object(users)),
        ("categories_by_id", object(categories)),
        ("projects_by_id", object(projects)),
        ("bugnote_texts_by_id", object(bugnote_texts)),
        ("bugnotes_by_id", object(bugnotes_by_id)),
        ("tags_by_id", object(tags)),
        ("bugnotes", Value::Array(bugnotes)),
        ("relationships", Value::Array(relationships)),
        ("history", Value::Array(history)),
        ("bug_tags", Value::Array(bug_tags)),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

fn keyed(rows: &mut TableRows, table: &str) -> Records {
    records_by_id(columns_for(table).unwrap_or_default(), &rows.take(table))
}

fn listed(rows: &mut TableRows, table: &str) -> Vec<Value> {
    zip_rows(columns_for(table).unwrap_or_default(), &rows.take(table))
}

fn object(records: Records) -> Value {
    Value::Object(records.into_iter().collect())
}

fn enrich_note(note: &mut Value, texts: &Records, users: &Records, labels: &LabelSet) {
    let note_text = lookup(texts, note, "bugnote_text_id")
        .and_then(|text| text.get("note"))
        .filter(|value| !value.is_null())
        .cloned()
        .unwrap_or_else(|| json!(""));
    let reporter = user_summary(lookup(users, note, "reporter_id"));
    let view_state_label = labels.label("view_state", note.get("view_state"));
    let note_type_label = labels.note_type_label(note.get("note_type"));

    if let Some(record) = note.as_object_mut() {
        record.insert("view_state_label".to_string(), json!(view_state_label));
        record.insert("note_type_label".to_string(), json!(note_type_label));
        record.insert("note_text".to_string(), note_text);
        record.insert("reporter".to_string(), reporter);
    }
}

fn enrich_bug(
    bug: &mut Value,
    texts: &Records,
    users: &Records,
    projects: &Records,
    categories: &Records,
    labels: &LabelSet,
) {
    let text = lookup(texts, bug, "bug_text_id");
    let project = lookup(projects, bug, "project_id");
    let category = lookup(categories, bug, "category_id");

    let mut extra = Map::new();
    for column in ["description", "steps_to_reproduce", "additional_information"] {
        extra.insert(column.to_string(), field_or_empty(text, column));
    }
    extra.insert(
        "reporter".to_string(),
        user_summary(lookup(users, bug, "reporter_id")),
    );
    extra.insert(
        "handler".to_string(),
        user_summary(lookup(users, bug, "handler_id")),
    );
    extra.insert(
        "project".to_string(),
        json!({
            "id": field_or_null(project, "id"),
            "name": field_or_empty(project, "name"),
            "status": field_or_null(project, "status"),
            "status_label": labels.label("project_status", field(project, "status")),
            "view_state": field_or_null(project, "view_state"),
            "view_state_label":
                labels.label("project_view_state", field(project, "view_state")),
        }),
    );
    extra.insert(
        "category".to_string(),
        json!({
            "id": field_or_null(category, "id"),
            "name": field_or_empty(category, "name"),
            "status": field_or_null(category, "status"),
            "project_id": field_or_null(category, "project_id"),
        }),
    );
    for (column, enum_name) in BUG_LABELS {
        let label = labels.label(enum_name, bug.get(*column));
        extra.insert(format!("{column}_label"), json!(label));
    }

    if let Some(record) = bug.as_object_mut() {
        record.extend(extra);
    }
}

fn user_summary(user: Option<&Value>) -> Value {
    json!({
        "id": field_or_null(user, "id"),
        "username": field_or_empty(user, "username"),
        "realname": field_or_empty(user, "realname"),
        "email": field_or_empty(user, "email"),
    })
}

fn tag_links(bug_tags: &[Value], tags: &Records) -> BTreeMap<String, Vec<Value>> {
    let mut out = BTreeMap::<String, Vec<Value>>::new();
    for link in bug_tags {
        let Some(bug_id) = link.get("bug_id").and_then(key_text) else {
            continue;
        };
        let tag = lookup(tags, link, "tag_id");
        out.entry(bug_id).or_default().push(json!({
            "tag_id": field_or_null(Some(link), "tag_id"),
            "tag_name": field_or_empty(tag, "name"),
            "tag_description": field_or_empty(tag, "description"),
            "user_id": field_or_null(Some(link), "user_id"),
            "date_attached": field_or_null(Some(link), "date_attached"),
        }));
    }
    out
}

fn group_by(records: &[Value], column: &str) -> BTreeMap<String, Vec<Value>> {
    let mut out = BTreeMap::<String, Vec<Value>>::new();
    for record in records {
        if let Some(key) = record.get(column).and_then(key_text) {
            out.entry(key).or_default().push(record.clone());
        }
    }
    out
}

/// Key text of an id value; null has none.
fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn integer_key(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => number.as_i64().map(|id| id.to_string()),
        Value::String(text) => text.trim().parse::<i64>().ok().map(|id| id.to_string()),
        _ => None,
    }
}

/// Enum lookups go through the integer value when there is one (`"010"` and `10.7` read as 10).
fn label_key(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.trunc() as i64))
            .map(|id| id.to_string()),
        Value::String(text) => Some(
            text.trim()
                .parse::<i64>()
                .map(|id| id.to_string())
                .unwrap_or_else(|_| text.clone()),
        ),
        _ => None,
    }
}

/// Ids of 0, empty text and null do not reference anything.
fn is_reference(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|value| value != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

fn referenced<'a, I>(records: I, columns: &[&str]) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut out = BTreeSet::new();
    for record in records {
        for column in columns {
            let value = record.get(*column);
            if is_reference(value) {
                out.extend(value.and_then(key_text));
            }
        }
    }
    out
}

fn refers_to(record: &Value, column: &str, keys: &BTreeSet<String>) -> bool {
    record
        .get(column)
        .and_then(key_text)
        .is_some_and(|key| keys.contains(&key))
}

fn lookup<'a>(records: &'a Records, record: &Value, column: &str) -> Option<&'a Value> {
    records.get(&key_text(record.get(column)?)?)
}

fn field<'a>(record: Option<&'a Value>, name: &str) -> Option<&'a Value> {
    record.and_then(|record| record.get(name))
}

fn field_or_null(record: Option<&Value>, name: &str) -> Value {
    field(record, name).cloned().unwrap_or(Value::Null)
}

/// Missing, null, zero and empty values all render as `""`.
fn field_or_empty(record: Option<&Value>, name: &str) -> Value {
    match field(record, name) {
        Some(value) if is_reference(Some(value)) => value.clone(),
        _ => json!(""),
    }
}

/// Numeric ids sort numerically and before any non-numeric key.
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(left), Ok(right)) => left.cmp(&right),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
