//! Purpose: Column catalog for the Mantis tables and row-to-record mapping.
//! Exports: `TableSchema`, `MANTIS_TABLES`, `columns_for`, `zip_row`, `zip_rows`, `records_by_id`.
//! Role: Schema-mapping collaborator that consumes tokenizer rows.
//! Invariants: Mapping is positional; missing trailing columns become null, surplus values are ignored.
//! Invariants: Catalog order is the default watched-table order for extraction.
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::core::scalar::{Row, Scalar};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

pub const MANTIS_TABLES: &[TableSchema] = &[
    TableSchema {
        name: "mantis_bug_table",
        columns: &[
            "id",
            "project_id",
            "reporter_id",
            "handler_id",
            "duplicate_id",
            "priority",
            "severity",
            "reproducibility",
            "status",
            "resolution",
            "projection",
            "eta",
            "bug_text_id",
            "os",
            "os_build",
            "platform",
            "version",
            "fixed_in_version",
            "build",
            "profile_id",
            "view_state",
            "summary",
            "sponsorship_total",
            "sticky",
            "target_version",
            "category_id",
            "date_submitted",
            "due_date",
            "last_updated",
        ],
    },
    TableSchema {
        name: "mantis_bug_text_table",
        columns: &[
            "id",
            "description",
            "steps_to_reproduce",
            "additional_information",
        ],
    },
    TableSchema {
        name: "mantis_bugnote_table",
        columns: &[
            "id",
            "bug_id",
            "reporter_id",
            "bugnote_text_id",
            "view_state",
            "note_type",
            "note_attr",
            "time_tracking",
            "last_modified",
            "date_submitted",
        ],
    },
    TableSchema {
        name: "mantis_bugnote_text_table",
        columns: &["id", "note"],
    },
    TableSchema {
        name: "mantis_user_table",
        columns: &[
            "id",
            "username",
            "realname",
            "email",
            "password",
            "enabled",
            "protected",
            "access_level",
            "login_count",
            "lost_password_request_count",
            "failed_login_count",
            "cookie_string",
            "last_visit",
            "date_created",
        ],
    },
    TableSchema {
        name: "mantis_category_table",
        columns: &["id", "project_id", "user_id", "name", "status"],
    },
    TableSchema {
        name: "mantis_project_table",
        columns: &[
            "id",
            "name",
            "status",
            "enabled",
            "view_state",
            "access_min",
            "file_path",
            "description",
            "category_id",
            "inherit_global",
        ],
    },
    TableSchema {
        name: "mantis_bug_relationship_table",
        columns: &["id", "source_bug_id", "destination_bug_id", "relationship_type"],
    },
    TableSchema {
        name: "mantis_bug_history_table",
        columns: &[
            "id",
            "user_id",
            "bug_id",
            "field_name",
            "old_value",
            "new_value",
            "type",
            "date_modified",
        ],
    },
    TableSchema {
        name: "mantis_tag_table",
        columns: &[
            "id",
            "user_id",
            "name",
            "description",
            "date_created",
            "date_updated",
        ],
    },
    TableSchema {
        name: "mantis_bug_tag_table",
        columns: &["bug_id", "tag_id", "user_id", "date_attached"],
    },
];

pub fn columns_for(table: &str) -> Option<&'static [&'static str]> {
    MANTIS_TABLES
        .iter()
        .find(|schema| schema.name == table)
        .map(|schema| schema.columns)
}

pub fn zip_row(columns: &[&str], row: &[Scalar]) -> Map<String, Value> {
    let mut record = Map::new();
    for (idx, column) in columns.iter().enumerate() {
        let value = row.get(idx).map(Value::from).unwrap_or(Value::Null);
        record.insert((*column).to_string(), value);
    }
    record
}

pub fn zip_rows(columns: &[&str], rows: &[Row]) -> Vec<Value> {
    rows.iter()
        .map(|row| Value::Object(zip_row(columns, row)))
        .collect()
}

/// Keys records by their first column. Later rows replace earlier ones with the same key.
pub fn records_by_id(columns: &[&str], rows: &[Row]) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for row in rows {
        let key = row
            .first()
            .map(Scalar::to_string)
            .unwrap_or_else(|| "NULL".to_string());
        out.insert(key, Value::Object(zip_row(columns, row)));
    }
    out
}
