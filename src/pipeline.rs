//! Lazy line-to-record pipeline.
//!
//! Every stage is an iterator adaptor, so a record is only built when the
//! consumer pulls it and nothing is buffered between stages. Read errors
//! from the source pass through untouched; everything else that goes
//! wrong with a single line drops that line.

use std::io;

use crate::error::CoercionError;
use crate::parsers::filter::{Filter, LineFields};
use crate::parsers::log_format::Pattern;
use crate::reader::RawLine;
use crate::record::{self, Record};

type Stage = fn(&mut Record) -> Result<(), CoercionError>;

/// Normalization and derivation steps, applied in order to every match.
const STAGES: &[Stage] = &[
    normalize_status,
    derive_status_type,
    derive_bytes_sent,
    normalize_request_time,
    derive_request_path,
];

fn normalize_status(record: &mut Record) -> Result<(), CoercionError> {
    record.normalize_int("status")
}

fn derive_status_type(record: &mut Record) -> Result<(), CoercionError> {
    record.derive("status_type", record::status_type);
    Ok(())
}

fn derive_bytes_sent(record: &mut Record) -> Result<(), CoercionError> {
    record.derive("bytes_sent", |r| r.get("body_bytes_sent").cloned());
    record.normalize_int("bytes_sent")
}

fn normalize_request_time(record: &mut Record) -> Result<(), CoercionError> {
    record.normalize_float("request_time")
}

fn derive_request_path(record: &mut Record) -> Result<(), CoercionError> {
    record.derive("request_path", record::request_path);
    Ok(())
}

/// Drops lines rejected by `filter` before they are parsed.
pub fn pre_filter<'a, I>(lines: I, filter: Option<&'a Filter>) -> impl Iterator<Item = io::Result<RawLine>> + 'a
where
    I: Iterator<Item = io::Result<RawLine>> + 'a,
{
    lines.filter(move |line| match (filter, line) {
        (Some(filter), &Ok(ref line)) => filter.accepts(&LineFields(&line.text)),
        _ => true,
    })
}

/// Matches each line against `pattern` and derives the standard fields.
/// Lines that do not match, or whose numeric fields do not coerce, are
/// dropped.
pub fn parse_log<'a, I>(lines: I, pattern: &'a Pattern) -> impl Iterator<Item = io::Result<Record>> + 'a
where
    I: Iterator<Item = io::Result<RawLine>> + 'a,
{
    lines.filter_map(move |line| {
        let line = match line {
            Ok(line) => line,
            Err(err) => return Some(Err(err)),
        };
        tracing::debug!(line = line.number, text = %line.text, "read line");

        parse_line(pattern, &line).map(Ok)
    })
}

/// Runs a single line through the match and derivation stages.
pub fn parse_line(pattern: &Pattern, line: &RawLine) -> Option<Record> {
    let mut record = match pattern.captures(&line.text) {
        Some(record) => record,
        None => {
            tracing::debug!(line = line.number, "line does not match log format");
            return None;
        }
    };

    for stage in STAGES {
        if let Err(err) = stage(&mut record) {
            tracing::debug!(line = line.number, error = %err, "dropping record");
            return None;
        }
    }

    tracing::debug!(line = line.number, record = ?record, "parsed record");
    Some(record)
}

/// Drops records rejected by `filter`.
pub fn post_filter<'a, I>(records: I, filter: Option<&'a Filter>) -> impl Iterator<Item = io::Result<Record>> + 'a
where
    I: Iterator<Item = io::Result<Record>> + 'a,
{
    records.filter(move |record| match (filter, record) {
        (Some(filter), &Ok(ref record)) => filter.accepts(record),
        _ => true,
    })
}

/// The whole chain: pre-filter, parse, derive, post-filter.
pub fn records<'a, I>(
    lines: I,
    pattern: &'a Pattern,
    pre: Option<&'a Filter>,
    post: Option<&'a Filter>,
) -> impl Iterator<Item = io::Result<Record>> + 'a
where
    I: Iterator<Item = io::Result<RawLine>> + 'a,
{
    post_filter(parse_log(pre_filter(lines, pre), pattern), post)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::log_format::build_pattern;
    use crate::record::Value;

    const LINE: &str = r#"127.0.0.1 - - [10/Oct/2020:13:55:36] "GET /a?x=1 HTTP/1.1" 200 1024 "-" "UA""#;

    fn lines(texts: &[&str]) -> Vec<io::Result<RawLine>> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                Ok(RawLine {
                    number: i as u64 + 1,
                    text: text.to_string(),
                })
            })
            .collect()
    }

    fn parse_all(texts: &[&str], pre: Option<&Filter>, post: Option<&Filter>) -> Vec<Record> {
        let pattern = build_pattern("combined").unwrap();

        records(lines(texts).into_iter(), &pattern, pre, post)
            .map(|record| record.unwrap())
            .collect()
    }

    #[test]
    fn it_derives_standard_fields() {
        let records = parse_all(&[LINE], None, None);
        let record = &records[0];

        assert_eq!(record.get("status"), Some(&Value::Int(200)));
        assert_eq!(record.get("status_type"), Some(&Value::Int(2)));
        assert_eq!(record.get("bytes_sent"), Some(&Value::Int(1024)));
        assert_eq!(record.get("body_bytes_sent"), Some(&Value::Str("1024".to_owned())));
        assert_eq!(record.get("request_path"), Some(&Value::Str("/a".to_owned())));
        assert!(!record.contains("request_time"));
    }

    #[test]
    fn it_normalizes_missing_status() {
        let line = LINE.replace(" 200 ", " - ");
        let records = parse_all(&[&line], None, None);

        assert_eq!(records[0].get("status"), Some(&Value::Int(0)));
        assert_eq!(records[0].get("status_type"), Some(&Value::Int(0)));
    }

    #[test]
    fn it_skips_mismatched_lines() {
        let broken = LINE.replace("] \"GET", "]\"GET");
        let records = parse_all(&["garbage", &broken, LINE], None, None);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("status"), Some(&Value::Int(200)));
    }

    #[test]
    fn it_skips_lines_with_malformed_durations() {
        let pattern = build_pattern("$remote_addr $request_uri $request_time").unwrap();
        let texts = ["1.1.1.1 /x abc", "1.1.1.1 /y 0.5"];

        let records: Vec<Record> = parse_log(lines(&texts).into_iter(), &pattern)
            .map(|r| r.unwrap())
            .collect();

        // `abc` cannot match the duration rule, so the first line never matches
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("request_time"), Some(&Value::Float(0.5)));
        assert_eq!(records[0].get("request_path"), Some(&Value::Str("/y".to_owned())));
    }

    #[test]
    fn it_drops_generic_fields_that_fail_coercion() {
        let pattern = build_pattern("\"$status\" $remote_addr").unwrap();
        let texts = ["\"oops\" 1.1.1.1", "\"404\" 1.1.1.1"];

        let records: Vec<Record> = parse_log(lines(&texts).into_iter(), &pattern)
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("status_type"), Some(&Value::Int(4)));
        assert!(!records[0].contains("bytes_sent"));
    }

    #[test]
    fn it_applies_filters() {
        let not_found = LINE.replace(" 200 ", " 404 ");
        let post = Filter::parse("status_type == 4").unwrap();
        let pre = Filter::parse("'POST' not in line").unwrap();
        let post_line = not_found.replace("GET", "POST");

        let records = parse_all(&[LINE, &not_found, &post_line], Some(&pre), Some(&post));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("status"), Some(&Value::Int(404)));
    }

    #[test]
    fn filter_errors_drop_the_record() {
        let post = Filter::parse("upstream_status == 200").unwrap();

        assert!(parse_all(&[LINE], None, Some(&post)).is_empty());
    }

    #[test]
    fn read_errors_pass_through() {
        let pattern = build_pattern("combined").unwrap();
        let input = vec![
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire")),
            Ok(RawLine {
                number: 2,
                text: LINE.to_owned(),
            }),
        ];

        let mut records = parse_log(input.into_iter(), &pattern);

        assert!(records.next().unwrap().is_err());
        assert!(records.next().unwrap().is_ok());
    }
}
