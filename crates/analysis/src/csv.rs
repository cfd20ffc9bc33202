//! CSV report rows to documents
//!
//! Flow-feature tools emit a header record followed by comma-separated rows.
//! Each row becomes a JSON object keyed by the (trimmed) header names, with
//! values cast to the narrowest fitting type. Each document gets a stable
//! `_id` derived from the raw row so re-reading the same report is
//! idempotent downstream.
//!
//! Quoted fields may contain commas, `""` escapes and line breaks, so a
//! record is not always one line of the report.

use ::csv::{Reader, ReaderBuilder, StringRecord};
use chrono::NaiveDateTime;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

/// Key holding the row-derived document id
pub const ID_KEY: &str = "_id";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %I:%M:%S %p",
];

/// One CSV record and the report text it was read from
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Record text without its terminator
    pub raw: String,
    pub fields: StringRecord,
}

/// Rows may be shorter or longer than the header
fn report_reader(text: &str, has_headers: bool) -> Reader<&[u8]> {
    ReaderBuilder::new()
        .has_headers(has_headers)
        .flexible(true)
        .from_reader(text.as_bytes())
}

fn next_record(reader: &mut Reader<&[u8]>, text: &str) -> ::csv::Result<Option<RawRecord>> {
    let mut fields = StringRecord::new();
    if !reader.read_record(&mut fields)? {
        return Ok(None);
    }
    let start = fields.position().map_or(0, |p| p.byte() as usize);
    let end = reader.position().byte() as usize;
    let raw = text
        .get(start..end)
        .unwrap_or_default()
        .trim_matches(['\r', '\n'])
        .to_string();
    Ok(Some(RawRecord { raw, fields }))
}

/// Split report text into raw records, header included
///
/// Blank lines between records are skipped.
pub fn split_records(text: &str) -> ::csv::Result<Vec<String>> {
    let mut reader = report_reader(text, false);
    let mut records = Vec::new();
    while let Some(record) = next_record(&mut reader, text)? {
        records.push(record.raw);
    }
    Ok(records)
}

/// Parse a header record followed by rows into documents
pub fn documents(text: &str) -> ::csv::Result<Vec<Value>> {
    let mut reader = report_reader(text, true);
    let header = reader.headers()?.clone();
    let mut docs = Vec::new();
    while let Some(record) = next_record(&mut reader, text)? {
        docs.push(record_to_document(&header, &record));
    }
    Ok(docs)
}

/// Cast a CSV value: empty → null, then integer, float, timestamp, string
pub fn smart_cast(raw: &str) -> Value {
    let s = raw.trim();
    if s.is_empty() {
        return Value::Null;
    }

    let digits = s.strip_prefix('-').unwrap_or(s);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = s.parse::<i64>() {
            return Value::Number(n.into());
        }
        if let Ok(n) = s.parse::<u64>() {
            return Value::Number(n.into());
        }
    }

    // More than one dot is an address, not a number
    if s.matches('.').count() <= 1
        && let Ok(f) = s.parse::<f64>()
        && let Some(n) = Number::from_f64(f)
    {
        return Value::Number(n);
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
        }
    }

    Value::String(s.to_string())
}

/// Stable document id for a raw row
pub fn row_id(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Build a document from the header and one record
///
/// Missing trailing fields become null; extra fields are ignored.
pub fn record_to_document(header: &StringRecord, record: &RawRecord) -> Value {
    let mut doc = Map::with_capacity(header.len() + 1);
    for (i, name) in header.iter().enumerate() {
        let value = record.fields.get(i).map_or(Value::Null, smart_cast);
        doc.insert(name.trim().to_string(), value);
    }
    doc.insert(ID_KEY.to_string(), Value::String(row_id(&record.raw)));
    Value::Object(doc)
}
