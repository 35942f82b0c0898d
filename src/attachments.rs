//! Purpose: Export attachment blobs stored in `mantis_bug_file_table` to plain files.
//! Exports: `AttachmentConfig`, `AttachmentOutcome`, `AttachmentRow`, `export_attachments`.
//! Role: Second consumer of the shared scanner/tokenizer, next to table extraction.
//! Invariants: Rows stream through one at a time; attachment content is never buffered per table.
//! Invariants: Every written file gets exactly one manifest line; skipped rows get none.
use std::fs::{self, File};
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::debug;

use mantis_extract::core::encoding::{DumpEncoding, encode_latin1};
use mantis_extract::core::error::{Error, ErrorKind};
use mantis_extract::core::extract::{ExtractConfig, ExtractStats, for_each_row};
use mantis_extract::core::scalar::Scalar;

pub const BUG_FILE_TABLE: &str = "mantis_bug_file_table";
pub const MANIFEST_NAME: &str = "manifest.jsonl";

#[derive(Clone, Debug)]
pub struct AttachmentConfig {
    pub output_dir: PathBuf,
    pub encoding: DumpEncoding,
}

#[derive(Clone, Debug)]
pub struct AttachmentOutcome {
    pub written: u64,
    pub skipped: u64,
    pub manifest: PathBuf,
    pub stats: ExtractStats,
}

/// One `mantis_bug_file_table` row, mapped by the column layouts Mantis has shipped.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachmentRow {
    pub id: Scalar,
    pub bug_id: Scalar,
    pub title: Scalar,
    pub description: Scalar,
    pub diskfile: Scalar,
    pub filename: Scalar,
    pub folder: Scalar,
    pub filesize: Scalar,
    pub file_type: Scalar,
    pub content: Scalar,
    pub date_added: Option<Scalar>,
    pub user_id: Option<Scalar>,
}

impl AttachmentRow {
    /// Picks the layout by arity and where the text content sits; `None` for unknown shapes.
    pub fn from_row(row: &[Scalar]) -> Option<Self> {
        let is_text = |idx: usize| matches!(row.get(idx), Some(Scalar::Text(_)));
        let (content, date_added, user_id) = if row.len() >= 12 && is_text(9) {
            (9, Some(10), Some(11))
        } else if row.len() == 11 && is_text(10) {
            (10, Some(9), None)
        } else if row.len() == 10 {
            (9, None, None)
        } else {
            return None;
        };
        let at = |idx: usize| row[idx].clone();
        Some(Self {
            id: at(0),
            bug_id: at(1),
            title: at(2),
            description: at(3),
            diskfile: at(4),
            filename: at(5),
            folder: at(6),
            filesize: at(7),
            file_type: at(8),
            content: at(content),
            date_added: date_added.map(at),
            user_id: user_id.map(at),
        })
    }

    fn display_filename(&self) -> String {
        match &self.filename {
            Scalar::Null | Scalar::Integer(0) => "attachment".to_string(),
            Scalar::Text(name) if name.is_empty() => "attachment".to_string(),
            other => other.to_string(),
        }
    }
}

/// Replaces path separators, collapses whitespace runs, and never returns an empty name.
/// The result is always a single path component.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = name.replace(['\\', '/'], "_");
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "attachment".to_string()
    } else {
        collapsed
    }
}

fn content_bytes(text: &str, encoding: DumpEncoding) -> Vec<u8> {
    match encoding {
        DumpEncoding::Latin1 => encode_latin1(text).unwrap_or_else(|| text.as_bytes().to_vec()),
        DumpEncoding::Utf8 => text.as_bytes().to_vec(),
    }
}

fn write_error(err: std::io::Error, message: &str, path: &Path) -> Error {
    Error::io(err, message).with_path(path)
}

pub fn export_attachments<R: BufRead>(
    reader: R,
    config: &AttachmentConfig,
) -> Result<AttachmentOutcome, Error> {
    let output_dir = &config.output_dir;
    fs::create_dir_all(output_dir)
        .map_err(|err| write_error(err, "failed to create output directory", output_dir))?;
    let manifest_path = output_dir.join(MANIFEST_NAME);
    let manifest_file = File::create(&manifest_path)
        .map_err(|err| write_error(err, "failed to create manifest", &manifest_path))?;
    let mut manifest = BufWriter::new(manifest_file);

    let mut written = 0u64;
    let mut skipped = 0u64;
    let extract = ExtractConfig::new([BUG_FILE_TABLE], config.encoding);
    let stats = for_each_row(reader, &extract, |_, row| {
        let Some(fields) = AttachmentRow::from_row(&row) else {
            skipped += 1;
            return Ok(());
        };
        let Scalar::Text(content) = &fields.content else {
            skipped += 1;
            return Ok(());
        };

        // Every path component is sanitized, ids included.
        let subdir = format!("bug_{}", sanitize_filename(&fields.bug_id.to_string()));
        let filename = sanitize_filename(&fields.display_filename());
        let out_name = format!("{}_{filename}", sanitize_filename(&fields.id.to_string()));
        let dir = output_dir.join(&subdir);
        fs::create_dir_all(&dir)
            .map_err(|err| write_error(err, "failed to create attachment directory", &dir))?;
        let out_path = dir.join(&out_name);
        fs::write(&out_path, content_bytes(content, config.encoding))
            .map_err(|err| write_error(err, "failed to write attachment", &out_path))?;

        let relative = Path::new(&subdir).join(&out_name);
        let entry = json!({
            "file_id": fields.id,
            "bug_id": fields.bug_id,
            "filename": fields.filename,
            "diskfile": fields.diskfile,
            "filesize": fields.filesize,
            "file_type": fields.file_type,
            "title": fields.title,
            "description": fields.description,
            "folder": fields.folder,
            "date_added": fields.date_added,
            "user_id": fields.user_id,
            "path": relative.to_string_lossy(),
        });
        serde_json::to_writer(&mut manifest, &entry).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write manifest entry")
                .with_path(&manifest_path)
                .with_source(err)
        })?;
        manifest
            .write_all(b"\n")
            .map_err(|err| write_error(err, "failed to write manifest entry", &manifest_path))?;
        debug!(path = %out_path.display(), "wrote attachment");
        written += 1;
        Ok(())
    })?;
    manifest
        .flush()
        .map_err(|err| write_error(err, "failed to flush manifest", &manifest_path))?;

    Ok(AttachmentOutcome {
        written,
        skipped,
        manifest: manifest_path,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        AttachmentConfig, AttachmentRow, MANIFEST_NAME, export_attachments, sanitize_filename,
    };
    use mantis_extract::core::encoding::DumpEncoding;
    use mantis_extract::core::scalar::Scalar::{self, Integer, Null, Text};
    use serde_json::Value;

    fn text(value: &str) -> Scalar {
        Text(value.to_string())
    }

    fn base_row() -> Vec<Scalar> {
        vec![
            Integer(1),
            Integer(7),
            text("title"),
            text("desc"),
            text("abc123"),
            text("log.txt"),
            text("/var/files"),
            Integer(5),
            text("text/plain"),
        ]
    }

    #[test]
    fn layouts_are_chosen_by_arity() {
        let mut twelve = base_row();
        twelve.extend([text("hello"), Integer(1_600_000_000), Integer(3)]);
        let row = AttachmentRow::from_row(&twelve).expect("12 columns");
        assert_eq!(row.content, text("hello"));
        assert_eq!(row.date_added, Some(Integer(1_600_000_000)));
        assert_eq!(row.user_id, Some(Integer(3)));

        let mut eleven = base_row();
        eleven.extend([Integer(1_600_000_000), text("body")]);
        let row = AttachmentRow::from_row(&eleven).expect("11 columns");
        assert_eq!(row.content, text("body"));
        assert_eq!(row.date_added, Some(Integer(1_600_000_000)));
        assert_eq!(row.user_id, None);

        let mut ten = base_row();
        ten.push(Null);
        let row = AttachmentRow::from_row(&ten).expect("10 columns");
        assert_eq!(row.content, Null);

        let mut eleven_no_text = base_row();
        eleven_no_text.extend([Integer(1), Integer(2)]);
        assert!(AttachmentRow::from_row(&eleven_no_text).is_none());
        assert!(AttachmentRow::from_row(&base_row()).is_none());
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("a/b\\c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("  my \t  file\n.png "), "my file .png");
        assert_eq!(sanitize_filename("   "), "attachment");
    }

    #[test]
    fn hostile_ids_stay_inside_the_output_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("a").join("attachments");
        let dump = b"INSERT INTO `mantis_bug_file_table` VALUES \
('../../../escaped',7,'t','d','x','n.txt','',1,'text/plain','owned',1,2),\
(2,'../..','t','d','x','m.txt','',1,'text/plain','owned',1,2);\n";
        let config = AttachmentConfig {
            output_dir: out.clone(),
            encoding: DumpEncoding::Latin1,
        };

        let outcome = export_attachments(&dump[..], &config).expect("export");
        assert_eq!(outcome.written, 2);
        assert!(!temp.path().join("escaped_n.txt").exists());
        assert!(!temp.path().join("a").join("2_m.txt").exists());

        let first = out.join("bug_7").join(".._.._.._escaped_n.txt");
        assert_eq!(std::fs::read(first).expect("first file"), b"owned");
        let second = out.join("bug_.._..").join("2_m.txt");
        assert_eq!(std::fs::read(second).expect("second file"), b"owned");
    }

    #[test]
    fn export_writes_files_and_manifest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("attachments");
        let dump = b"-- dump\n\
INSERT INTO `mantis_bug_file_table` VALUES (1,7,'t','d','x1','notes.txt','','5','text/plain','hi\\n\xe9',1600000000,2),\
(2,7,'t','d','x2','','','0','text/plain',NULL,1600000000,2);\n\
INSERT INTO `mantis_bug_file_table` VALUES (3,8,'t','d','x3','a/b.bin','',3,'application/octet-stream',1600000000,'\\0\\Z\xff');\n";
        let config = AttachmentConfig {
            output_dir: out.clone(),
            encoding: DumpEncoding::Latin1,
        };

        let outcome = export_attachments(&dump[..], &config).expect("export");
        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.stats.statements, 2);

        let first = std::fs::read(out.join("bug_7").join("1_notes.txt")).expect("first file");
        assert_eq!(first, b"hi\n\xe9");
        let second = std::fs::read(out.join("bug_8").join("3_a_b.bin")).expect("second file");
        assert_eq!(second, b"\0\x1a\xff");

        let manifest = std::fs::read_to_string(out.join(MANIFEST_NAME)).expect("manifest");
        let entries: Vec<Value> = manifest
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["file_id"], 1);
        assert_eq!(entries[0]["filename"], "notes.txt");
        assert_eq!(entries[1]["filename"], "a/b.bin");
        assert_eq!(
            entries[1]["path"].as_str().map(std::path::PathBuf::from),
            Some(std::path::Path::new("bug_8").join("3_a_b.bin"))
        );
    }
}
