//! Parse raw model output into loosely-typed rows
//!
//! Models are asked for a TSV table but answer with whatever they like:
//! CSV, Markdown pipe tables, JSON arrays, tables preceded by commentary,
//! or tabs written out as `\t`. Everything recoverable is recovered here;
//! only text with no row structure at all is rejected.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::model::ResponseType;
use crate::model::rubric::KEY_CONCEPT_COLUMN;

static JSON_ARRAY_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\s*\{").expect("static regex"));

/// Field name given to values past the end of the header row
pub const EXTRA_FIELD: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ParseError {
    #[error("empty response")]
    Empty,

    #[error("no valid JSON data: {0}")]
    InvalidJson(String),

    #[error("no rows found in response")]
    NoRows,

    #[error("malformed table: {0}")]
    Table(String),
}

/// One parsed row: field name to raw value, in source order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set a field, replacing any existing value under the same name
    pub fn insert(&mut self, name: String, value: String) {
        match self.fields.iter_mut().find(|(key, _)| *key == name) {
            Some(field) => field.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.fields.iter().position(|(key, _)| key == name)?;
        Some(self.fields.remove(index).1)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub(crate) fn into_fields(self) -> Vec<(String, String)> {
        self.fields
    }

    fn push(&mut self, name: String, value: String) {
        self.fields.push((name, value));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Tab,
    Pipe,
    Comma,
}

impl Delimiter {
    fn byte(self) -> u8 {
        match self {
            Delimiter::Tab => b'\t',
            Delimiter::Pipe => b'|',
            Delimiter::Comma => b',',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Delimited(Delimiter),
}

/// Parse with format detection
pub fn parse_response(raw: &str) -> Result<Vec<RawRow>, ParseError> {
    parse_response_as(raw, ResponseType::Tsv)
}

/// Parse, forcing JSON decoding when `response_type` is [`ResponseType::Json`]
pub fn parse_response_as(
    raw: &str,
    response_type: ResponseType,
) -> Result<Vec<RawRow>, ParseError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    if response_type == ResponseType::Json || looks_like_json(text) {
        return parse_json(text);
    }

    let table = normalize_table(text);
    match detect_delimiter(&table) {
        Delimiter::Pipe => {
            tracing::debug!("Response is a markdown table, delimiting by '|'");
            parse_delimited(&strip_markdown(&table), Delimiter::Pipe)
        }
        delimiter => parse_delimited(&table, delimiter),
    }
}

/// Format [`parse_response`] would pick for this text
pub fn detect_format(raw: &str) -> ResponseFormat {
    let text = raw.trim();
    if looks_like_json(text) {
        ResponseFormat::Json
    } else {
        ResponseFormat::Delimited(detect_delimiter(&normalize_table(text)))
    }
}

fn detect_delimiter(table: &str) -> Delimiter {
    if table.contains('\t') {
        Delimiter::Tab
    } else if table.contains(" | ") {
        Delimiter::Pipe
    } else {
        Delimiter::Comma
    }
}

/// Drop commentary before the header, unescape and collapse tabs
fn normalize_table(text: &str) -> String {
    let mut table = strip_preamble(text).replace("\\t", "\t");
    while table.contains("\t\t") {
        table = table.replace("\t\t", "\t");
    }
    table
}

/// An array of objects that opens before any table header line
///
/// Table cells may quote code like `[{x: 1}]`, so a match after the header
/// does not count.
fn looks_like_json(text: &str) -> bool {
    let Some(array) = JSON_ARRAY_START.find(text) else {
        return false;
    };
    text.starts_with('[') || header_offset(text).is_none_or(|header| array.start() < header)
}

/// Byte offset of the first line that opens with the header token
fn header_offset(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let head = line.trim_start_matches(|c: char| c.is_whitespace() || c == '|' || c == '"');
        if head.starts_with(KEY_CONCEPT_COLUMN) {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Slice starting at the header line, or the whole text without one
fn strip_preamble(text: &str) -> &str {
    header_offset(text).map_or(text, |offset| &text[offset..])
}

/// Remove separator lines and the outer pipes of each row
fn strip_markdown(table: &str) -> String {
    table
        .lines()
        .filter(|line| !line.contains("---"))
        .map(|line| {
            let line = line.trim();
            let line = line.strip_prefix('|').unwrap_or(line);
            line.strip_suffix('|').unwrap_or(line)
        })
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_delimited(table: &str, delimiter: Delimiter) -> Result<Vec<RawRow>, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter.byte())
        .has_headers(true)
        .flexible(true)
        .from_reader(table.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::Table(e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ParseError::Table(e.to_string()))?;
        if record.iter().all(|value| value.trim().is_empty()) {
            continue;
        }

        let mut row = RawRow::default();
        for (index, value) in record.iter().enumerate() {
            let blank = value.trim().is_empty();
            match headers.get(index) {
                Some(name) if name.trim().is_empty() && blank => {}
                Some(name) => row.push(name.clone(), value.to_string()),
                // Trailing delimiters are noise; real surplus values fail the schema check
                None if blank => {}
                None => row.push(EXTRA_FIELD.to_string(), value.to_string()),
            }
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(ParseError::NoRows);
    }
    Ok(rows)
}

/// Decode the span from the first `[` to the last `]` as an array of objects
fn parse_json(text: &str) -> Result<Vec<RawRow>, ParseError> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Err(ParseError::InvalidJson("no JSON array found".to_string()));
    };
    if end < start {
        return Err(ParseError::InvalidJson("no JSON array found".to_string()));
    }

    let values: Vec<Value> = serde_json::from_str(&text[start..=end])
        .map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let mut rows = Vec::with_capacity(values.len());
    for value in values {
        let Value::Object(map) = value else {
            return Err(ParseError::InvalidJson(format!(
                "expected an object, found {value}"
            )));
        };
        rows.push(RawRow::from_pairs(
            map.into_iter().map(|(key, value)| (key, json_text(value))),
        ));
    }

    if rows.is_empty() {
        return Err(ParseError::NoRows);
    }
    Ok(rows)
}

fn json_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
