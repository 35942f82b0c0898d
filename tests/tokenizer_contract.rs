// Contract tests for the scanner/tokenizer pair through the public library API.
use std::thread;

use mantis_extract::core::scalar::{Row, Scalar};
use mantis_extract::core::scanner::StatementScanner;
use mantis_extract::core::tokenizer::parse_values;

fn render(rows: &[Row]) -> String {
    rows.iter()
        .map(|row| {
            let values = row.iter().map(Scalar::to_literal).collect::<Vec<_>>();
            format!("({})", values.join(","))
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn sample_rows() -> Vec<Row> {
    vec![
        vec![
            Scalar::Integer(1),
            Scalar::Text("plain".to_string()),
            Scalar::Null,
            Scalar::Float(2.5),
        ],
        vec![
            Scalar::Integer(-42),
            Scalar::Text("quote ' back \\ nl \n tab \t cr \r nul \0 sub \u{1a}".to_string()),
            Scalar::Text(String::new()),
            Scalar::Float(-0.125),
        ],
        vec![
            Scalar::Integer(i64::MAX),
            Scalar::Text("NULL".to_string()),
            Scalar::Text("(a,b);".to_string()),
            Scalar::Float(1e20),
        ],
    ]
}

#[test]
fn rendered_rows_parse_back_to_the_same_values() {
    let rows = sample_rows();
    let body = render(&rows);
    assert_eq!(parse_values(&body), rows);
}

#[test]
fn parsing_is_deterministic() {
    let body = render(&sample_rows());
    let first = parse_values(&body);
    let second = parse_values(&render(&first));
    assert_eq!(first, second);
    assert_eq!(parse_values(&body), first);
}

#[test]
fn independent_bodies_parse_concurrently() {
    let handles = (0..8)
        .map(|idx| {
            thread::spawn(move || {
                let body = format!("({idx},'row {idx}'),({},NULL)", idx * 10);
                parse_values(&body)
            })
        })
        .collect::<Vec<_>>();
    for (idx, handle) in handles.into_iter().enumerate() {
        let rows = handle.join().expect("worker");
        let idx = idx as i64;
        assert_eq!(
            rows,
            vec![
                vec![Scalar::Integer(idx), Scalar::Text(format!("row {idx}"))],
                vec![Scalar::Integer(idx * 10), Scalar::Null],
            ]
        );
    }
}

#[test]
fn scanned_statement_bodies_feed_the_tokenizer() {
    let lines = [
        "-- header\n",
        "INSERT INTO `mantis_bugnote_text_table` VALUES (1,'a'),\n",
        "  (2,'b');\n",
        "INSERT INTO `mantis_bug_table` VALUES (9);\n",
        "INSERT INTO `mantis_bugnote_text_table` VALUES (3,'c');\n",
    ];
    let statements =
        StatementScanner::scan(lines, ["mantis_bugnote_text_table"]).collect::<Vec<_>>();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0].body, "(1,'a'),(2,'b')");

    let rows = statements
        .iter()
        .flat_map(|statement| parse_values(&statement.body))
        .collect::<Vec<_>>();
    let ids = rows
        .iter()
        .filter_map(|row| row.first().and_then(Scalar::as_integer))
        .collect::<Vec<_>>();
    assert_eq!(ids, [1, 2, 3]);
}

#[test]
fn input_ending_mid_statement_yields_no_rows() {
    let mut scanner = StatementScanner::new(["t"]);
    assert!(scanner.push_line("INSERT INTO `t` VALUES (1),\n").is_none());
    assert_eq!(scanner.pending(), Some("t"));
    let tail = scanner.finish().expect("unterminated");
    assert_eq!(tail.table, "t");
    assert!(tail.collected_bytes > 0);
}
