//! Tabular transcoder: delimited text with a header line → ordered records.
//!
//! The format is deliberately simple: one header line naming the fields,
//! then one record per line, fields separated by a single delimiter
//! character. There is no quoting or escaping, so a value that contains the
//! delimiter is split in two.
//!
//! Columns are matched by position. A row shorter than the header gets empty
//! strings for the missing trailing fields; a row longer than the header has
//! its extra values dropped. Every record of a batch therefore carries the
//! same field names, in header order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Default field delimiter.
pub const DEFAULT_DELIMITER: char = ',';

/// One data row keyed by header field name, in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabularRecord(IndexMap<String, String>);

impl TabularRecord {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Field names in header order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TabularRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Parse comma-separated text. See [`parse_table_with`].
pub fn parse_table(text: &str) -> Vec<TabularRecord> {
    parse_table_with(text, DEFAULT_DELIMITER)
}

/// Parse delimited text into records.
///
/// Blank lines are ignored. Fewer than two non-empty lines (empty input, or
/// a header alone) yields an empty vector. When a header name repeats, the
/// later column's value wins.
pub fn parse_table_with(text: &str, delimiter: char) -> Vec<TabularRecord> {
    let mut lines = text.trim().lines().filter(|l| !l.trim().is_empty());

    let Some(header_line) = lines.next() else {
        return Vec::new();
    };
    let headers: Vec<&str> = header_line
        .trim()
        .split(delimiter)
        .map(str::trim)
        .collect();

    lines.map(|line| zip_row(&headers, line, delimiter)).collect()
}

fn zip_row(headers: &[&str], line: &str, delimiter: char) -> TabularRecord {
    let mut values = line.split(delimiter).map(str::trim);
    let mut record = IndexMap::with_capacity(headers.len());
    for header in headers {
        let value = values.next().unwrap_or("");
        record.insert((*header).to_string(), value.to_string());
    }
    TabularRecord(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: &[(&str, &str)]) -> TabularRecord {
        pairs.iter().copied().collect()
    }

    #[test]
    fn two_rows() {
        let records = parse_table("name,shift\nAlice,AM\nBob,PM\n");
        assert_eq!(
            records,
            vec![
                rec(&[("name", "Alice"), ("shift", "AM")]),
                rec(&[("name", "Bob"), ("shift", "PM")]),
            ]
        );
    }

    #[test]
    fn header_only_is_empty() {
        assert!(parse_table("name,shift\n").is_empty());
    }

    #[test]
    fn empty_and_blank_input_is_empty() {
        assert!(parse_table("").is_empty());
        assert!(parse_table("  \n\n \n").is_empty());
    }

    #[test]
    fn short_row_fills_with_empty_strings() {
        let records = parse_table("a,b,c\n1\n");
        assert_eq!(records, vec![rec(&[("a", "1"), ("b", ""), ("c", "")])]);
    }

    #[test]
    fn long_row_drops_extras() {
        let records = parse_table("a,b\n1,2,3,4\n");
        assert_eq!(records, vec![rec(&[("a", "1"), ("b", "2")])]);
    }

    #[test]
    fn values_and_headers_are_trimmed() {
        let records = parse_table("  date , duty \r\n Mon01 , C/I \r\n");
        assert_eq!(records, vec![rec(&[("date", "Mon01"), ("duty", "C/I")])]);
    }

    #[test]
    fn blank_lines_between_rows_are_skipped() {
        let records = parse_table("a,b\n1,2\n\n3,4\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("a"), Some("3"));
    }

    #[test]
    fn embedded_delimiter_is_mis_split() {
        let records = parse_table("name,city\n\"Doe, Jane\",Oslo\n");
        assert_eq!(records[0].get("name"), Some("\"Doe"));
        assert_eq!(records[0].get("city"), Some("Jane\""));
    }

    #[test]
    fn field_order_follows_header() {
        let records = parse_table("z,a,m\n1,2,3\n");
        let fields: Vec<&str> = records[0].fields().collect();
        assert_eq!(fields, vec!["z", "a", "m"]);
    }

    #[test]
    fn every_record_has_the_header_field_set() {
        let text = "Date,Duty,Location,Flight\nMon01,C/I,DOH\nTue02,OFF\nWed03,SBY,DOH,QR1,extra\n";
        let records = parse_table(text);
        assert_eq!(records.len(), 3);
        for r in &records {
            let fields: Vec<&str> = r.fields().collect();
            assert_eq!(fields, vec!["Date", "Duty", "Location", "Flight"]);
        }
    }

    #[test]
    fn custom_delimiter() {
        let records = parse_table_with("a;b\n1;2\n", ';');
        assert_eq!(records, vec![rec(&[("a", "1"), ("b", "2")])]);
    }

    #[test]
    fn duplicate_header_later_value_wins() {
        let records = parse_table("x,x\n1,2\n");
        assert_eq!(records[0].len(), 1);
        assert_eq!(records[0].get("x"), Some("2"));
    }

    #[test]
    fn parse_is_idempotent() {
        let text = "name,shift\nAlice,AM\nBob\n";
        assert_eq!(parse_table(text), parse_table(text));
    }

    #[test]
    fn serializes_as_ordered_object() {
        let records = parse_table("name,shift\nAlice,AM\n");
        let json = serde_json::to_string(&records).unwrap();
        assert_eq!(json, r#"[{"name":"Alice","shift":"AM"}]"#);
    }
}
