//! Purpose: `mantis-extract` CLI entry point.
//! Role: Binary crate root; parses args, initialises logging, runs commands, emits JSON on stdout.
//! Invariants: Command results go to stdout as JSON; diagnostics and logs go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `to_exit_code`.
use std::error::Error as StdError;
use std::fs::File;
use std::io::{self, BufReader, IsTerminal};
use std::path::{Path, PathBuf};

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod attachments;
mod command_dispatch;

use mantis_extract::core::encoding::DumpEncoding;
use mantis_extract::core::error::{Error, ErrorKind, to_exit_code};
use mantis_extract::notice::{Notice, notice_json};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `mantis-extract --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command, color_mode)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "mantis-extract",
    version,
    about = "Extract Mantis bug tracker data from a mysqldump file",
    long_about = None,
    after_help = r#"EXAMPLES
  $ mantis-extract attachments --sql mantisbt.sql --output export/attachments
  $ mantis-extract bugs --sql mantisbt.sql --output export/mantis_data.json \
      --attachments-manifest export/attachments/manifest.jsonl
  $ mantis-extract extract --sql mantisbt.sql --table mantis_bug_table --pretty
  $ mantis-extract tables

NOTES
  - Only `INSERT INTO `<table>` VALUES ...;` statements are read; everything else is skipped.
  - Set RUST_LOG=info (or debug) for scan progress on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum EncodingArg {
    Utf8,
    Latin1,
}

impl From<EncodingArg> for DumpEncoding {
    fn from(value: EncodingArg) -> Self {
        match value {
            EncodingArg::Utf8 => DumpEncoding::Utf8,
            EncodingArg::Latin1 => DumpEncoding::Latin1,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Extract table rows as JSON records",
        long_about = r#"Scan the dump for INSERT statements of the selected tables and emit JSON.

Known Mantis tables are mapped to named columns (missing trailing values become null).
Other tables passed with --table are emitted as positional arrays."#,
        after_help = r#"EXAMPLES
  $ mantis-extract extract --sql mantisbt.sql --output export/mantis_data.json
  $ mantis-extract extract --sql mantisbt.sql --table mantis_user_table \
      --config-defaults mantisbt/config_defaults_inc.php \
      --config-override mantisbt/config_inc.php \
      --constants mantisbt/core/constant_inc.php"#
    )]
    Extract(ExtractArgs),
    #[command(
        about = "Export bugs joined with their notes, history, tags and attachments",
        long_about = r#"Join the Mantis tables into one document keyed by bug.

Each bug carries its text, reporter, handler, project, category, enum labels,
bugnotes, relationships, history, tags and (with a manifest) attachments.
The flat tables are included as `*_by_id` maps and lists."#,
        after_help = r#"EXAMPLES
  $ mantis-extract bugs --sql mantisbt.sql --limit 50 --pretty
  $ mantis-extract bugs --sql mantisbt.sql --output export/mantis_data.json \
      --config-defaults mantisbt/config_defaults_inc.php \
      --constants mantisbt/core/constant_inc.php \
      --attachments-manifest export/attachments/manifest.jsonl

NOTES
  - --limit keeps the lowest bug ids and only the rows they reference
  - A missing manifest or config file is skipped"#
    )]
    Bugs(BugArgs),
    #[command(
        about = "Write attachment blobs to files plus a JSON Lines manifest",
        after_help = r#"EXAMPLES
  $ mantis-extract attachments --sql mantisbt.sql --output export/attachments

NOTES
  - Files land in <output>/bug_<bug_id>/<file_id>_<filename>
  - The manifest is <output>/manifest.jsonl, one JSON object per written file"#
    )]
    Attachments(AttachmentArgs),
    #[command(about = "List the known Mantis tables and their columns")]
    Tables,
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
struct ExtractArgs {
    #[arg(long, help = "Path to the mysqldump file", value_hint = ValueHint::FilePath)]
    sql: PathBuf,
    #[arg(
        long = "table",
        help = "Table to extract (repeatable; default: every known Mantis table)"
    )]
    tables: Vec<String>,
    #[arg(long, value_enum, default_value = "utf8", help = "Dump text encoding")]
    encoding: EncodingArg,
    #[arg(
        long,
        help = "Write the JSON document here instead of stdout",
        value_hint = ValueHint::FilePath
    )]
    output: Option<PathBuf>,
    #[command(flatten)]
    labels: LabelArgs,
    #[arg(long, help = "Pretty-print JSON output")]
    pretty: bool,
}

#[derive(Args)]
struct BugArgs {
    #[arg(long, help = "Path to the mysqldump file", value_hint = ValueHint::FilePath)]
    sql: PathBuf,
    #[arg(long, value_enum, default_value = "utf8", help = "Dump text encoding")]
    encoding: EncodingArg,
    #[arg(
        long,
        help = "Write the JSON document here instead of stdout",
        value_hint = ValueHint::FilePath
    )]
    output: Option<PathBuf>,
    #[arg(long, help = "Export only the N lowest bug ids (0 = all)")]
    limit: Option<usize>,
    #[arg(
        long,
        help = "manifest.jsonl from `attachments`; merged into each bug",
        value_hint = ValueHint::FilePath
    )]
    attachments_manifest: Option<PathBuf>,
    #[command(flatten)]
    labels: LabelArgs,
    #[arg(long, help = "Pretty-print JSON output")]
    pretty: bool,
}

#[derive(Args)]
struct LabelArgs {
    #[arg(
        long,
        help = "Mantis config_defaults_inc.php (enum labels)",
        value_hint = ValueHint::FilePath
    )]
    config_defaults: Option<PathBuf>,
    #[arg(
        long,
        help = "Mantis config_inc.php (overrides enum labels)",
        value_hint = ValueHint::FilePath
    )]
    config_override: Option<PathBuf>,
    #[arg(
        long,
        help = "Mantis core/constant_inc.php (note type labels)",
        value_hint = ValueHint::FilePath
    )]
    constants: Option<PathBuf>,
}

#[derive(Args)]
struct AttachmentArgs {
    #[arg(long, help = "Path to the mysqldump file", value_hint = ValueHint::FilePath)]
    sql: PathBuf,
    #[arg(long, help = "Output directory", value_hint = ValueHint::DirPath)]
    output: PathBuf,
    #[arg(long, value_enum, default_value = "latin1", help = "Dump text encoding")]
    encoding: EncodingArg,
}

fn open_dump(path: &Path) -> Result<BufReader<File>, Error> {
    let file = File::open(path).map_err(|err| {
        Error::io(err, "failed to open dump")
            .with_path(path)
            .with_hint("Check the --sql path.")
    })?;
    Ok(BufReader::new(file))
}

/// Read errors from the scan carry a line number but not the dump path.
fn with_dump_path(err: Error, path: &Path) -> Error {
    if err.path().is_some() {
        return err;
    }
    err.with_path(path)
}

fn emit_json(value: Value, pretty: bool) {
    let pretty = pretty || io::stdout().is_terminal();
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::NotFound => err.with_hint("Check that the path exists."),
        ErrorKind::Permission => {
            err.with_hint("Permission denied. Check file and directory permissions.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint("Unexpected internal failure. Retry with RUST_LOG=debug and RUST_BACKTRACE=1.")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} (source: {})", notice.message, notice.source);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(line) = err.line() {
        inner.insert("line".to_string(), json!(line));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(line) = err.line() {
        lines.push(format!(
            "{} {line}",
            colorize_label("line:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, ColorMode, error_json, error_text};
    use clap::CommandFactory;
    use mantis_extract::core::error::{Error, ErrorKind};
    use std::io;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn error_json_carries_context_and_causes() {
        let err = Error::io(io::Error::other("disk gone"), "failed to read dump")
            .with_path("dump.sql")
            .with_line(12)
            .with_hint("Check the --sql path.");
        let value = error_json(&err);
        let inner = &value["error"];
        assert_eq!(inner["kind"], "Io");
        assert_eq!(inner["message"], "failed to read dump");
        assert_eq!(inner["path"], "dump.sql");
        assert_eq!(inner["line"], 12);
        assert_eq!(inner["causes"][0], "disk gone");
    }

    #[test]
    fn error_text_without_color_has_plain_labels() {
        let err = Error::new(ErrorKind::Usage).with_hint("Try again.");
        let text = error_text(&err, false);
        assert_eq!(text, "error: usage error\nhint: Try again.");
        assert!(!ColorMode::Never.use_color(true));
        assert!(ColorMode::Auto.use_color(true));
    }
}
