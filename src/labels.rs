//! Purpose: Recover enum labels and constants from Mantis PHP config files.
//! Exports: `EnumLabels`, `MANTIS_ENUMS`, `load_enum_strings`, `enum_label_maps`, `parse_enum_string`,
//! `load_constants`, `note_type_labels`.
//! Role: Optional enrichment for extracted records; line-oriented scraping, not PHP parsing.
//! Invariants: Missing files are skipped; later files override earlier ones.
//! Invariants: Only single-line `$g_*_enum_string = '...';` and `define('NAME', digits);` forms match.
//! Both patterns are compiled once per process.
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::LazyLock;

use bstr::ByteSlice;
use regex::Regex;

use crate::core::error::Error;

/// Enum value to label, keyed by the canonical text of the value (`"10"`, not `"010"`).
pub type EnumLabels = BTreeMap<String, String>;

/// Output name and config variable for each labelled Mantis enum.
pub const MANTIS_ENUMS: &[(&str, &str)] = &[
    ("priority", "priority_enum_string"),
    ("severity", "severity_enum_string"),
    ("reproducibility", "reproducibility_enum_string"),
    ("status", "status_enum_string"),
    ("resolution", "resolution_enum_string"),
    ("projection", "projection_enum_string"),
    ("eta", "eta_enum_string"),
    ("view_state", "view_state_enum_string"),
    ("project_status", "project_status_enum_string"),
    ("project_view_state", "project_view_state_enum_string"),
];

/// Parses every `MANTIS_ENUMS` entry; absent variables yield empty maps.
pub fn enum_label_maps(strings: &BTreeMap<String, String>) -> BTreeMap<String, EnumLabels> {
    MANTIS_ENUMS
        .iter()
        .map(|(name, variable)| {
            let labels = strings
                .get(*variable)
                .map(|list| parse_enum_string(list))
                .unwrap_or_default();
            (name.to_string(), labels)
        })
        .collect()
}

/// Scrapes `$g_<name>_enum_string = '<list>';` assignments, keyed by `<name>_enum_string`.
pub fn load_enum_strings<P: AsRef<Path>>(
    paths: &[P],
) -> Result<BTreeMap<String, String>, Error> {
    let mut out = BTreeMap::new();
    for path in paths {
        let Some(text) = read_optional(path.as_ref())? else {
            continue;
        };
        for line in text.lines() {
            if let Some((name, value)) = match_enum_assignment(line) {
                out.insert(name.to_string(), value.to_string());
            }
        }
    }
    Ok(out)
}

/// Parses `10:new,20:feedback` into value→label pairs. Parts without `:` are ignored.
pub fn parse_enum_string(list: &str) -> EnumLabels {
    let mut out = EnumLabels::new();
    for part in list.split(',') {
        let Some((key, label)) = part.trim().split_once(':') else {
            continue;
        };
        out.insert(canonical_key(key.trim()), label.trim().to_string());
    }
    out
}

/// Scrapes `define('NAME', 123);` lines.
pub fn load_constants(path: &Path) -> Result<BTreeMap<String, i64>, Error> {
    let mut out = BTreeMap::new();
    let Some(text) = read_optional(path)? else {
        return Ok(out);
    };
    for line in text.lines() {
        if let Some((name, value)) = match_define(line) {
            out.insert(name.to_string(), value);
        }
    }
    Ok(out)
}

/// Maps the note-type constant values to their lower-case names.
pub fn note_type_labels(constants: &BTreeMap<String, i64>) -> EnumLabels {
    ["BUGNOTE", "REMINDER", "TIME_TRACKING"]
        .iter()
        .filter_map(|name| {
            constants
                .get(*name)
                .map(|value| (value.to_string(), name.to_lowercase()))
        })
        .collect()
}

fn canonical_key(key: &str) -> String {
    key.parse::<i64>()
        .map(|value| value.to_string())
        .unwrap_or_else(|_| key.to_string())
}

fn read_optional(path: &Path) -> Result<Option<String>, Error> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes.to_str_lossy().into_owned())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::io(err, "failed to read config file").with_path(path)),
    }
}

static ENUM_ASSIGNMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*\$g_(\w+_enum_string)\s*=\s*'([^']*)';").ok());

static DEFINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*define\(\s*'([^']+)'\s*,\s*([0-9]+)\s*\);\s*$").ok()
});

fn match_enum_assignment(line: &str) -> Option<(&str, &str)> {
    let caps = ENUM_ASSIGNMENT.as_ref()?.captures(line)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

fn match_define(line: &str) -> Option<(&str, i64)> {
    let caps = DEFINE.as_ref()?.captures(line)?;
    let value = caps.get(2)?.as_str().parse().ok()?;
    Some((caps.get(1)?.as_str(), value))
}

#[cfg(test)]
mod tests {
    use super::{
        DEFINE, ENUM_ASSIGNMENT, MANTIS_ENUMS, enum_label_maps, load_constants,
        load_enum_strings, match_define, match_enum_assignment, note_type_labels,
        parse_enum_string,
    };
    use std::path::PathBuf;

    #[test]
    fn enum_assignment_lines_match() {
        assert_eq!(
            match_enum_assignment("  $g_status_enum_string = '10:new,90:closed';"),
            Some(("status_enum_string", "10:new,90:closed"))
        );
        assert_eq!(
            match_enum_assignment("$g_eta_enum_string='10:none'; # trailing"),
            Some(("eta_enum_string", "10:none"))
        );
        assert_eq!(match_enum_assignment("$g_status_enum_string = \"x\";"), None);
        assert_eq!(match_enum_assignment("$g_status_colors = '10:red';"), None);
        assert_eq!(match_enum_assignment("$g_status_enum_string = '10:new'"), None);
        assert_eq!(match_enum_assignment("$g__enum_string = '1:x';"), None);
        assert_eq!(
            match_enum_assignment("$g_a_enum_string = '1:x';"),
            Some(("a_enum_string", "1:x"))
        );
    }

    #[test]
    fn scraper_patterns_compile() {
        assert!(ENUM_ASSIGNMENT.is_some());
        assert!(DEFINE.is_some());
    }

    #[test]
    fn define_lines_match() {
        assert_eq!(match_define("define( 'BUGNOTE', 0 );"), Some(("BUGNOTE", 0)));
        assert_eq!(match_define("\tdefine('REMINDER',1);  "), Some(("REMINDER", 1)));
        assert_eq!(match_define("define('X', -1);"), None);
        assert_eq!(match_define("define('X', 1); // note"), None);
        assert_eq!(match_define("define('X', FOO);"), None);
        assert_eq!(match_define("define('', 3);"), None);
        assert_eq!(match_define("define('BIG', 99999999999999999999);"), None);
    }

    #[test]
    fn enum_string_parsing_trims_and_skips_junk() {
        let labels = parse_enum_string(" 10:new , 20 : feedback,,junk,abc:letters,050:x");
        assert_eq!(labels.get("10").map(String::as_str), Some("new"));
        assert_eq!(labels.get("20").map(String::as_str), Some("feedback"));
        assert_eq!(labels.get("abc").map(String::as_str), Some("letters"));
        assert_eq!(labels.get("50").map(String::as_str), Some("x"));
        assert_eq!(labels.len(), 4);
        assert!(parse_enum_string("").is_empty());
    }

    #[test]
    fn later_config_files_override_earlier_ones() {
        let temp = tempfile::tempdir().expect("tempdir");
        let defaults = temp.path().join("config_defaults_inc.php");
        let local = temp.path().join("config_inc.php");
        std::fs::write(
            &defaults,
            "<?php\n$g_status_enum_string = '10:new,90:closed';\n$g_eta_enum_string = '10:none';\n",
        )
        .expect("write defaults");
        std::fs::write(&local, "$g_status_enum_string = '10:open';\n").expect("write local");
        let missing = temp.path().join("missing.php");

        let strings = load_enum_strings(&[defaults, local, missing]).expect("load");
        assert_eq!(strings["status_enum_string"], "10:open");
        assert_eq!(strings["eta_enum_string"], "10:none");

        let maps = enum_label_maps(&strings);
        assert_eq!(maps.len(), MANTIS_ENUMS.len());
        assert_eq!(maps["status"]["10"], "open");
        assert!(maps["priority"].is_empty());
    }

    #[test]
    fn constants_feed_note_type_labels() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("constant_inc.php");
        std::fs::write(
            &path,
            "define( 'BUGNOTE', 0 );\ndefine( 'REMINDER', 1 );\ndefine( 'TIME_TRACKING', 2 );\ndefine( 'OTHER', 9 );\n",
        )
        .expect("write constants");

        let constants = load_constants(&path).expect("load");
        assert_eq!(constants.len(), 4);
        let labels = note_type_labels(&constants);
        assert_eq!(labels.get("0").map(String::as_str), Some("bugnote"));
        assert_eq!(labels.get("2").map(String::as_str), Some("time_tracking"));
        assert!(!labels.contains_key("9"));

        let none = load_constants(&PathBuf::from("/nonexistent/constant_inc.php")).expect("load");
        assert!(none.is_empty());
    }
}
