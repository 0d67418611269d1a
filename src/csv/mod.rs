//! Dialect-aware encode/decode of result rows and field indexing.
//!
//! Ported from `admin/dupr/src/Csv.{h,cc}`. The original's per-character
//! scan-lookup-table is collapsed into straightforward byte-at-a-time
//! encode/decode passes; the escaping and quoting *semantics* are preserved.

use crate::error::{CoreError, Result};
use std::collections::HashMap;

pub const MAX_FIELD_SIZE: usize = 64 * 1024;
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Characters that may not be used as delimiter/escape/quote when escaping
/// is enabled, since they collide with the standard escape sequences.
const PROHIBITED: &[u8] = b"0bfnrtvNZ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    null: String,
    delimiter: u8,
    escape: u8,
    quote: u8,
}

impl Dialect {
    /// `escape` or `quote` of `0` disables that feature.
    pub fn new(null: impl Into<String>, delimiter: u8, escape: u8, quote: u8) -> Result<Self> {
        let d = Self { null: null.into(), delimiter, escape, quote };
        d.validate()?;
        Ok(d)
    }

    /// Null string defaults to `"NULL"` if quoting is enabled, `"\N"` if
    /// escaping is enabled, else `""`.
    pub fn with_defaults(delimiter: u8, escape: u8, quote: u8) -> Result<Self> {
        let null = if quote != 0 {
            "NULL".to_string()
        } else if escape != 0 {
            "\\N".to_string()
        } else {
            String::new()
        };
        Self::new(null, delimiter, escape, quote)
    }

    fn validate(&self) -> Result<()> {
        for c in [self.delimiter, self.escape, self.quote] {
            if c == b'\r' || c == b'\n' {
                return Err(CoreError::Csv(
                    "delimiter, escape and quote may not be CR or LF".into(),
                ));
            }
        }
        if self.delimiter == 0 {
            return Err(CoreError::Csv("delimiter may not be NUL".into()));
        }
        let distinct = [self.delimiter, self.escape, self.quote]
            .into_iter()
            .filter(|&c| c != 0)
            .collect::<std::collections::HashSet<_>>();
        let nonzero_count = [self.delimiter, self.escape, self.quote].into_iter().filter(|&c| c != 0).count();
        if distinct.len() != nonzero_count {
            return Err(CoreError::Csv(
                "delimiter, escape and quote must be distinct".into(),
            ));
        }
        if self.escape != 0 {
            for c in [self.delimiter, self.escape, self.quote] {
                if c != 0 && PROHIBITED.contains(&c) {
                    return Err(CoreError::Csv(format!(
                        "character '{}' cannot be used as delimiter/escape/quote when escaping is enabled",
                        c as char
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn null(&self) -> &str {
        &self.null
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn escape(&self) -> u8 {
        self.escape
    }

    pub fn quote(&self) -> u8 {
        self.quote
    }

    pub fn is_null(&self, value: &[u8]) -> bool {
        value == self.null.as_bytes()
    }

    /// Decode one encoded field into its raw bytes.
    pub fn decode(&self, value: &[u8]) -> Result<Vec<u8>> {
        if value.len() > MAX_FIELD_SIZE {
            return Err(CoreError::Csv("field exceeds MAX_FIELD_SIZE".into()));
        }
        let mut v = value;
        let mut quoted = false;
        if self.quote != 0 && !v.is_empty() && v[0] == self.quote {
            if v.len() < 2 || *v.last().unwrap() != self.quote {
                return Err(CoreError::Csv("unterminated quoted field".into()));
            }
            v = &v[1..v.len() - 1];
            quoted = true;
        }
        let mut out = Vec::with_capacity(v.len());
        let mut i = 0;
        while i < v.len() {
            let c = v[i];
            if self.escape != 0 && c == self.escape && i + 1 < v.len() {
                let next = v[i + 1];
                out.push(unescape(next));
                i += 2;
                continue;
            }
            if quoted && c == self.quote && i + 1 < v.len() && v[i + 1] == self.quote {
                out.push(self.quote);
                i += 2;
                continue;
            }
            out.push(c);
            i += 1;
        }
        if out.len() > MAX_FIELD_SIZE {
            return Err(CoreError::Csv("decoded field exceeds MAX_FIELD_SIZE".into()));
        }
        Ok(out)
    }

    /// Encode a raw field value according to this dialect.
    pub fn encode(&self, value: &[u8]) -> Result<Vec<u8>> {
        if value.len() > MAX_FIELD_SIZE {
            return Err(CoreError::Csv("field exceeds MAX_FIELD_SIZE".into()));
        }
        let needs_quote_or_escape = value.iter().any(|&c| {
            c == self.delimiter
                || c == self.quote && self.quote != 0
                || c == b'\r'
                || c == b'\n'
        });
        if !needs_quote_or_escape {
            return Ok(value.to_vec());
        }
        if self.escape != 0 {
            let mut out = Vec::with_capacity(value.len() + 8);
            for &c in value {
                if let Some(code) = escape_code(c) {
                    out.push(self.escape);
                    out.push(code);
                } else if c == self.delimiter || c == self.escape || c == self.quote {
                    out.push(self.escape);
                    out.push(c);
                } else {
                    out.push(c);
                }
            }
            return Ok(out);
        }
        if self.quote != 0 {
            if value.contains(&b'\r') || value.contains(&b'\n') {
                return Err(CoreError::Csv(
                    "field with embedded CR/LF cannot be written without escaping".into(),
                ));
            }
            let mut out = Vec::with_capacity(value.len() + 2);
            out.push(self.quote);
            for &c in value {
                if c == self.quote {
                    out.push(self.quote);
                }
                out.push(c);
            }
            out.push(self.quote);
            return Ok(out);
        }
        Err(CoreError::Csv(
            "field contains delimiter/quote/CR/LF but dialect has neither escaping nor quoting".into(),
        ))
    }

}

fn unescape(c: u8) -> u8 {
    match c {
        b'0' => 0,
        b'b' => 0x08,
        b'f' => 0x0c,
        b'n' => b'\n',
        b'r' => b'\r',
        b't' => b'\t',
        b'v' => 0x0b,
        b'Z' => 0x1a,
        other => other,
    }
}

fn escape_code(c: u8) -> Option<u8> {
    match c {
        0 => Some(b'0'),
        0x08 => Some(b'b'),
        0x0c => Some(b'f'),
        b'\n' => Some(b'n'),
        b'\r' => Some(b'r'),
        b'\t' => Some(b't'),
        0x0b => Some(b'v'),
        0x1a => Some(b'Z'),
        _ => None,
    }
}

/// Splits one CSV record into raw (still-encoded) field slices, respecting
/// quoting so that a delimiter inside a quoted field is not treated as a
/// separator.
fn split_record<'a>(line: &'a [u8], dialect: &Dialect) -> Vec<&'a [u8]> {
    let mut fields = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    let mut in_quotes = false;
    while i < line.len() {
        let c = line[i];
        if dialect.escape != 0 && c == dialect.escape {
            i += 2;
            continue;
        }
        if dialect.quote != 0 && c == dialect.quote {
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if c == dialect.delimiter && !in_quotes {
            fields.push(&line[start..i]);
            start = i + 1;
            i += 1;
            continue;
        }
        i += 1;
    }
    fields.push(&line[start..]);
    fields
}

/// Produces an output CSV record from an input CSV record, mapping/renaming
/// fields between independent input/output field lists.
pub struct Editor {
    input_dialect: Dialect,
    output_dialect: Dialect,
    input_field_names: Vec<String>,
    output_field_names: Vec<String>,
    field_index: HashMap<String, usize>,
    /// Current decoded input field values (raw bytes, not yet re-encoded).
    input_values: Vec<Option<Vec<u8>>>,
    /// Output overrides set via `set`/`set_null`, keyed by output index.
    output_overrides: HashMap<usize, Option<Vec<u8>>>,
}

impl Editor {
    pub fn new(
        input_dialect: Dialect,
        output_dialect: Dialect,
        input_field_names: Vec<String>,
        output_field_names: Vec<String>,
    ) -> Self {
        let mut field_index = HashMap::new();
        for (i, name) in input_field_names.iter().enumerate() {
            field_index.insert(name.clone(), i);
        }
        let n = input_field_names.len();
        Self {
            input_dialect,
            output_dialect,
            input_field_names,
            output_field_names,
            field_index,
            input_values: vec![None; n],
            output_overrides: HashMap::new(),
        }
    }

    pub fn num_input_fields(&self) -> usize {
        self.input_field_names.len()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    pub fn is_input_field(&self, i: usize) -> bool {
        i < self.input_field_names.len()
    }

    /// Parse one line of input text, replacing the current input field set
    /// and clearing prior output edits.
    pub fn read_record(&mut self, line: &[u8]) -> Result<()> {
        if line.len() > MAX_LINE_SIZE {
            return Err(CoreError::Csv("line exceeds MAX_LINE_SIZE".into()));
        }
        let raw_fields = split_record(line, &self.input_dialect);
        if raw_fields.len() != self.input_field_names.len() {
            return Err(CoreError::Csv(format!(
                "expected {} input fields, found {}",
                self.input_field_names.len(),
                raw_fields.len()
            )));
        }
        self.input_values.clear();
        for raw in raw_fields {
            if self.input_dialect.is_null(raw) {
                self.input_values.push(None);
            } else {
                self.input_values.push(Some(self.input_dialect.decode(raw)?));
            }
        }
        self.output_overrides.clear();
        Ok(())
    }

    pub fn is_null(&self, i: usize) -> bool {
        if let Some(over) = self.output_overrides.get(&i) {
            return over.is_none();
        }
        match self.input_values.get(i) {
            Some(Some(_)) => false,
            _ => true,
        }
    }

    fn raw_value(&self, i: usize) -> Option<&[u8]> {
        if let Some(over) = self.output_overrides.get(&i) {
            return over.as_deref();
        }
        self.input_values.get(i).and_then(|v| v.as_deref())
    }

    pub fn get(&self, i: usize) -> Option<String> {
        self.raw_value(i).map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// Range-checked integer accessor.
    pub fn get_i64(&self, i: usize) -> Result<i64> {
        let v = self.get(i).ok_or_else(|| CoreError::Csv("field is NULL".into()))?;
        v.parse::<i64>()
            .map_err(|e| CoreError::Csv(format!("integer out of range or malformed: {e}")))
    }

    /// Range-checked float accessor. 17 significant digits, round-trip safe.
    pub fn get_f64(&self, i: usize) -> Result<f64> {
        let v = self.get(i).ok_or_else(|| CoreError::Csv("field is NULL".into()))?;
        v.parse::<f64>()
            .map_err(|e| CoreError::Csv(format!("float malformed: {e}")))
    }

    pub fn set_null(&mut self, i: usize) -> bool {
        if i >= self.output_field_names.len() {
            return false;
        }
        self.output_overrides.insert(i, None);
        true
    }

    pub fn set(&mut self, i: usize, value: impl ToString) -> bool {
        if i >= self.output_field_names.len() {
            return false;
        }
        self.output_overrides.insert(i, Some(value.to_string().into_bytes()));
        true
    }

    /// Render the combination of input values (mapped by name into the
    /// output field list) and any edits, in this dialect.
    pub fn write_record(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for (oi, name) in self.output_field_names.iter().enumerate() {
            if oi > 0 {
                out.push(self.output_dialect.delimiter());
            }
            let raw = if let Some(over) = self.output_overrides.get(&oi) {
                over.clone()
            } else if let Some(&ii) = self.field_index.get(name) {
                self.input_values.get(ii).cloned().flatten()
            } else {
                None
            };
            match raw {
                None => out.extend_from_slice(self.output_dialect.null().as_bytes()),
                Some(bytes) => out.extend_from_slice(&self.output_dialect.encode(&bytes)?),
            }
        }
        if out.len() > MAX_LINE_SIZE {
            return Err(CoreError::Csv("output record exceeds MAX_LINE_SIZE".into()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escaping_dialect() -> Dialect {
        Dialect::with_defaults(b',', b'\\', 0).unwrap()
    }

    fn quoting_dialect() -> Dialect {
        Dialect::with_defaults(b',', 0, b'"').unwrap()
    }

    #[test]
    fn decode_encode_round_trip_plain() {
        let d = escaping_dialect();
        let value = b"hello world";
        let encoded = d.encode(value).unwrap();
        let decoded = d.decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn decode_encode_round_trip_with_delimiter_and_newline() {
        let d = escaping_dialect();
        let value = b"a,b\nc\rd";
        let encoded = d.encode(value).unwrap();
        let decoded = d.decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn quoted_field_doubles_embedded_quotes() {
        let d = quoting_dialect();
        let value = b"say \"hi\"";
        let encoded = d.encode(value).unwrap();
        assert_eq!(encoded, b"\"say \"\"hi\"\"\"");
        let decoded = d.decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn quoting_dialect_rejects_embedded_newline() {
        let d = quoting_dialect();
        assert!(d.encode(b"a\nb").is_err());
    }

    #[test]
    fn editor_reorders_and_renames_fields() {
        let input = escaping_dialect();
        let output = escaping_dialect();
        let mut editor = Editor::new(
            input,
            output,
            vec!["a".into(), "b".into(), "c".into()],
            vec!["c".into(), "a".into(), "missing".into()],
        );
        editor.read_record(b"1,2,3").unwrap();
        let rendered = editor.write_record().unwrap();
        assert_eq!(rendered, b"3,1,\\N");
    }

    #[test]
    fn editor_set_overrides_output_field() {
        let input = escaping_dialect();
        let output = escaping_dialect();
        let mut editor = Editor::new(input, output, vec!["a".into()], vec!["a".into()]);
        editor.read_record(b"1").unwrap();
        editor.set(0, 99);
        assert_eq!(editor.write_record().unwrap(), b"99");
    }

    #[test]
    fn rejects_non_distinct_delimiter_and_quote() {
        assert!(Dialect::new("", b',', 0, b',').is_err());
    }
}
