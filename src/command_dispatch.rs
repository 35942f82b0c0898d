//! Purpose: Hold top-level CLI command dispatch for `mantis-extract`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command prints exactly one JSON document on stdout when it succeeds.
//! Invariants: Non-fatal conditions go out as notices on stderr, never in the stdout payload.
//! Invariants: `meta.source_sql` is the dump's file name, not its full path.

use super::*;

use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};

use tracing::info;

use mantis_extract::bugs::{BugTables, LabelSet, build_bug_export, load_attachment_index};
use mantis_extract::catalog::{MANTIS_TABLES, columns_for, zip_rows};
use mantis_extract::core::extract::{ExtractConfig, ExtractStats, extract_tables};
use mantis_extract::core::scalar::Row;
use mantis_extract::labels::{
    EnumLabels, enum_label_maps, load_constants, load_enum_strings, note_type_labels,
};
use mantis_extract::notice::timestamp_now;

use crate::attachments::{AttachmentConfig, BUG_FILE_TABLE, export_attachments};

pub(super) fn dispatch_command(
    command: Command,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "mantis-extract", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Tables => {
            let tables = MANTIS_TABLES
                .iter()
                .map(|schema| json!({ "name": schema.name, "columns": schema.columns }))
                .collect::<Vec<_>>();
            emit_json(json!({ "tables": tables }), false);
            Ok(RunOutcome::ok())
        }
        Command::Extract(args) => run_extract(args, color_mode),
        Command::Bugs(args) => run_bugs(args, color_mode),
        Command::Attachments(args) => run_attachments(args, color_mode),
    }
}

fn run_extract(args: ExtractArgs, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    let tables = watched_tables(&args.tables);
    let config = ExtractConfig::new(tables.iter().cloned(), args.encoding.into());

    // Config files are read before the dump so a bad path fails fast.
    let labels = load_labels(&args.labels)?;

    let reader = open_dump(&args.sql)?;
    let mut extracted =
        extract_tables(reader, &config).map_err(|err| with_dump_path(err, &args.sql))?;
    if extracted.stats.unterminated > 0 {
        emit_unterminated_notice("extract", &args.sql, &extracted.stats, color_mode);
    }

    let mut counts = Map::new();
    let mut records = Map::new();
    for table in &tables {
        let rows = extracted.take(table);
        counts.insert(table.clone(), json!(rows.len()));
        records.insert(table.clone(), table_json(table, &rows));
    }

    let payload = json!({
        "meta": export_meta(&args.sql),
        "counts": counts,
        "enum_labels": labels.enums,
        "note_type_labels": labels.note_types,
        "tables": records,
    });
    write_or_emit(payload, args.output.as_deref(), args.pretty)?;
    Ok(RunOutcome::ok())
}

fn run_bugs(args: BugArgs, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    let labels = load_labels(&args.labels)?;
    let attachments = match &args.attachments_manifest {
        Some(path) => load_attachment_index(path)?,
        None => None,
    };

    let config = ExtractConfig::new(
        MANTIS_TABLES.iter().map(|schema| schema.name),
        args.encoding.into(),
    );
    let reader = open_dump(&args.sql)?;
    let mut extracted =
        extract_tables(reader, &config).map_err(|err| with_dump_path(err, &args.sql))?;
    if extracted.stats.unterminated > 0 {
        emit_unterminated_notice("bugs", &args.sql, &extracted.stats, color_mode);
    }

    let mut tables = BugTables::from_rows(&mut extracted);
    if let Some(limit) = args.limit.filter(|limit| *limit > 0) {
        tables.limit(limit);
        info!(limit, bugs = tables.bugs.len(), "limited bug export");
    }

    let mut payload = build_bug_export(tables, &labels, attachments.as_ref());
    payload.insert("meta".to_string(), export_meta(&args.sql));
    write_or_emit(Value::Object(payload), args.output.as_deref(), args.pretty)?;
    Ok(RunOutcome::ok())
}

fn run_attachments(args: AttachmentArgs, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    let reader = open_dump(&args.sql)?;
    let config = AttachmentConfig {
        output_dir: args.output.clone(),
        encoding: args.encoding.into(),
    };
    let outcome =
        export_attachments(reader, &config).map_err(|err| with_dump_path(err, &args.sql))?;

    if outcome.stats.unterminated > 0 {
        emit_unterminated_notice("attachments", &args.sql, &outcome.stats, color_mode);
    }
    if outcome.skipped > 0 {
        let notice = Notice::skipped_rows(
            "attachments",
            &source_name(&args.sql),
            BUG_FILE_TABLE,
            outcome.skipped,
            "no inline content",
        );
        emit_notice(&notice, color_mode);
    }

    emit_json(
        json!({
            "written": outcome.written,
            "skipped": outcome.skipped,
            "manifest": outcome.manifest.display().to_string(),
        }),
        false,
    );
    Ok(RunOutcome::ok())
}

fn load_labels(args: &LabelArgs) -> Result<LabelSet, Error> {
    let config_paths = [&args.config_defaults, &args.config_override]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
    let enums = enum_label_maps(&load_enum_strings(&config_paths)?);
    let note_types = match &args.constants {
        Some(path) => note_type_labels(&load_constants(path)?),
        None => EnumLabels::new(),
    };
    Ok(LabelSet { enums, note_types })
}

fn source_name(sql: &Path) -> String {
    sql.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| sql.display().to_string())
}

fn export_meta(sql: &Path) -> Value {
    json!({
        "generated_utc": timestamp_now(),
        "source_sql": source_name(sql),
    })
}

/// Writes `payload` to `output` and prints a summary, or prints `payload` itself.
fn write_or_emit(payload: Value, output: Option<&Path>, pretty: bool) -> Result<(), Error> {
    match output {
        Some(path) => {
            write_json_file(path, &payload, pretty)?;
            info!(output = %path.display(), "wrote export");
            emit_json(
                json!({
                    "output": path.display().to_string(),
                    "counts": payload["counts"],
                }),
                pretty,
            );
        }
        None => emit_json(payload, pretty),
    }
    Ok(())
}

/// Requested tables in first-seen order, or the whole catalog when none were given.
fn watched_tables(requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        return MANTIS_TABLES
            .iter()
            .map(|schema| schema.name.to_string())
            .collect();
    }
    let mut seen = HashSet::new();
    requested
        .iter()
        .filter(|table| seen.insert(table.as_str()))
        .cloned()
        .collect()
}

fn table_json(table: &str, rows: &[Row]) -> Value {
    match columns_for(table) {
        Some(columns) => Value::Array(zip_rows(columns, rows)),
        None => Value::Array(
            rows.iter()
                .map(|row| Value::Array(row.iter().map(Value::from).collect()))
                .collect(),
        ),
    }
}

fn emit_unterminated_notice(cmd: &str, sql: &Path, stats: &ExtractStats, color_mode: ColorMode) {
    emit_notice(&Notice::unterminated(cmd, &source_name(sql), stats), color_mode);
}

fn write_json_file(path: &Path, value: &Value, pretty: bool) -> Result<(), Error> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            Error::io(err, "failed to create output directory").with_path(parent)
        })?;
    }
    let file = File::create(path)
        .map_err(|err| Error::io(err, "failed to create output file").with_path(path))?;
    let mut writer = BufWriter::new(file);
    let encoded = if pretty {
        serde_json::to_writer_pretty(&mut writer, value)
    } else {
        serde_json::to_writer(&mut writer, value)
    };
    encoded.map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write output file")
            .with_path(path)
            .with_source(err)
    })?;
    writer
        .write_all(b"\n")
        .and_then(|()| writer.flush())
        .map_err(|err| Error::io(err, "failed to write output file").with_path(path))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{source_name, table_json, watched_tables};
    use mantis_extract::catalog::MANTIS_TABLES;
    use mantis_extract::core::scalar::Scalar::{Integer, Null, Text};
    use serde_json::json;

    #[test]
    fn watched_tables_default_to_catalog_and_dedup_requests() {
        assert_eq!(watched_tables(&[]).len(), MANTIS_TABLES.len());
        let requested = ["b", "a", "b"].map(String::from);
        assert_eq!(watched_tables(&requested), ["b", "a"]);
    }

    #[test]
    fn unknown_tables_render_as_positional_arrays() {
        let rows = vec![vec![Integer(1), Null, Text("x".to_string())]];
        assert_eq!(table_json("custom_table", &rows), json!([[1, null, "x"]]));
        assert_eq!(
            table_json("mantis_bugnote_text_table", &rows),
            json!([{"id": 1, "note": null}])
        );
    }

    #[test]
    fn source_name_is_the_dump_file_name() {
        assert_eq!(source_name(Path::new("/srv/backups/mantisbt.sql")), "mantisbt.sql");
        assert_eq!(source_name(Path::new("dump.sql")), "dump.sql");
        assert_eq!(source_name(Path::new("/")), "/");
    }
}
