//! The value-serialized text format for document fields.
//!
//! A compact, self-describing superset of JSON: map keys and strings stay
//! unquoted wherever that is unambiguous, quoted strings escape `"` by
//! doubling it. Document fields travel through this format as a single
//! string attribute; the codec routes them here from field metadata, never
//! by sniffing the attribute contents.
//!
//! Writing is deterministic (maps are ordered), so the same value always
//! serializes to the same text.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Chars;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::value::Value;

/// Errors produced while parsing value-serialized text.
#[derive(Debug, thiserror::Error)]
pub enum JsvError {
    /// An unexpected character was encountered.
    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedChar {
        /// The offending character.
        found: char,
        /// Byte offset into the input.
        offset: usize,
    },
    /// The input ended prematurely.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// Input remained after a complete value.
    #[error("trailing input after value at offset {offset}")]
    TrailingInput {
        /// Byte offset of the first trailing character.
        offset: usize,
    },
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Serializes a value to its compact text form.
#[must_use]
pub fn to_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&format_float(*f)),
        Value::Str(s) => write_string(out, s),
        Value::Bytes(b) => write_string(out, &BASE64.encode(b)),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Map(entries) => write_map(out, entries),
        Value::StrSet(set) => {
            out.push('[');
            for (i, s) in set.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, s);
            }
            out.push(']');
        }
        Value::NumSet(set) => {
            out.push('[');
            for (i, n) in set.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(n);
            }
            out.push(']');
        }
        Value::BinSet(set) => {
            out.push('[');
            for (i, b) in set.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, &BASE64.encode(b));
            }
            out.push(']');
        }
    }
}

fn write_map(out: &mut String, entries: &BTreeMap<String, Value>) {
    out.push('{');
    for (i, (key, value)) in entries.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        // Keep a trailing ".0" so the value reads back as a float.
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

fn write_string(out: &mut String, s: &str) {
    if needs_quoting(s) {
        out.push('"');
        for c in s.chars() {
            if c == '"' {
                out.push_str("\"\"");
            } else {
                out.push(c);
            }
        }
        out.push('"');
    } else {
        out.push_str(s);
    }
}

/// A string must be quoted when leaving it bare would be ambiguous: empty
/// strings, strings containing structural characters or edge whitespace,
/// and strings that read back as another scalar.
fn needs_quoting(s: &str) -> bool {
    if s.is_empty() {
        return true;
    }
    if s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace) {
        return true;
    }
    if s.chars().any(|c| matches!(c, ',' | ':' | '{' | '}' | '[' | ']' | '"')) {
        return true;
    }
    matches!(s, "null" | "true" | "false") || s.parse::<f64>().is_ok()
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parses value-serialized text back into a [`Value`].
///
/// Bare tokens are classified by syntax (`null`, booleans, numbers,
/// otherwise strings); the caller converts to the field's declared kind.
///
/// # Errors
///
/// Returns [`JsvError`] on malformed input.
pub fn parse(input: &str) -> Result<Value, JsvError> {
    let mut parser = Parser::new(input);
    parser.skip_whitespace();
    let value = parser.parse_value()?;
    parser.skip_whitespace();
    if parser.peek().is_some() {
        return Err(JsvError::TrailingInput {
            offset: parser.offset,
        });
    }
    Ok(value)
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    offset: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            offset: 0,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if let Some(c) = c {
            self.offset += c.len_utf8();
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), JsvError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(JsvError::UnexpectedChar {
                found: c,
                offset: self.offset,
            }),
            None => Err(JsvError::UnexpectedEof),
        }
    }

    fn parse_value(&mut self) -> Result<Value, JsvError> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => self.parse_map(),
            Some('[') => self.parse_list(),
            Some('"') => self.parse_quoted().map(Value::Str),
            Some(_) => Ok(classify_bare(&self.take_bare())),
            None => Err(JsvError::UnexpectedEof),
        }
    }

    fn parse_map(&mut self) -> Result<Value, JsvError> {
        self.expect('{')?;
        let mut entries = BTreeMap::new();
        self.skip_whitespace();
        if self.peek() == Some('}') {
            self.bump();
            return Ok(Value::Map(entries));
        }
        loop {
            self.skip_whitespace();
            let key = if self.peek() == Some('"') {
                self.parse_quoted()?
            } else {
                self.take_bare_key()
            };
            self.skip_whitespace();
            self.expect(':')?;
            let value = self.parse_value()?;
            entries.insert(key, value);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => {}
                Some('}') => return Ok(Value::Map(entries)),
                Some(c) => {
                    return Err(JsvError::UnexpectedChar {
                        found: c,
                        offset: self.offset,
                    });
                }
                None => return Err(JsvError::UnexpectedEof),
            }
        }
    }

    fn parse_list(&mut self) -> Result<Value, JsvError> {
        self.expect('[')?;
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(']') {
            self.bump();
            return Ok(Value::List(items));
        }
        loop {
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => {}
                Some(']') => return Ok(Value::List(items)),
                Some(c) => {
                    return Err(JsvError::UnexpectedChar {
                        found: c,
                        offset: self.offset,
                    });
                }
                None => return Err(JsvError::UnexpectedEof),
            }
        }
    }

    fn parse_quoted(&mut self) -> Result<String, JsvError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => {
                    // A doubled quote is an escaped quote; anything else ends
                    // the string.
                    if self.peek() == Some('"') {
                        self.bump();
                        out.push('"');
                    } else {
                        return Ok(out);
                    }
                }
                Some(c) => out.push(c),
                None => return Err(JsvError::UnexpectedEof),
            }
        }
    }

    fn take_bare(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if matches!(c, ',' | ']' | '}') {
                break;
            }
            out.push(c);
            self.bump();
        }
        out.trim_end().to_owned()
    }

    fn take_bare_key(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if matches!(c, ':' | ',' | '}') {
                break;
            }
            out.push(c);
            self.bump();
        }
        out.trim_end().to_owned()
    }
}

fn classify_bare(token: &str) -> Value {
    match token {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(i) = token.parse::<i64>() {
                Value::Int(i)
            } else if let Ok(f) = token.parse::<f64>() {
                Value::Float(f)
            } else {
                Value::Str(token.to_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Value)]) -> Value {
        Value::Map(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_should_write_bare_strings_when_unambiguous() {
        assert_eq!(to_string(&Value::Str("hello".to_owned())), "hello");
        assert_eq!(to_string(&Value::Str("two words".to_owned())), "two words");
    }

    #[test]
    fn test_should_quote_ambiguous_strings() {
        assert_eq!(to_string(&Value::Str(String::new())), "\"\"");
        assert_eq!(to_string(&Value::Str("42".to_owned())), "\"42\"");
        assert_eq!(to_string(&Value::Str("true".to_owned())), "\"true\"");
        assert_eq!(to_string(&Value::Str("a,b".to_owned())), "\"a,b\"");
        assert_eq!(to_string(&Value::Str("say \"hi\"".to_owned())), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_should_write_maps_and_lists_compactly() {
        let value = map(&[
            ("City", Value::Str("Austin".to_owned())),
            ("Zip", Value::Str("78701".to_owned())),
        ]);
        assert_eq!(to_string(&value), "{City:Austin,Zip:\"78701\"}");

        let value = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(to_string(&value), "[1,2]");
    }

    #[test]
    fn test_should_roundtrip_nested_values() {
        let value = map(&[
            ("Name", Value::Str("Widget".to_owned())),
            ("Price", Value::Float(9.5)),
            ("Count", Value::Int(3)),
            ("Active", Value::Bool(true)),
            (
                "Tags",
                Value::List(vec![
                    Value::Str("a".to_owned()),
                    Value::Str("b c".to_owned()),
                ]),
            ),
            ("Nested", map(&[("Inner", Value::Int(1))])),
        ]);
        let text = to_string(&value);
        assert_eq!(parse(&text).unwrap(), value);
    }

    #[test]
    fn test_should_roundtrip_whole_floats_as_floats() {
        let value = Value::Float(3.0);
        let text = to_string(&value);
        assert_eq!(text, "3.0");
        assert_eq!(parse(&text).unwrap(), value);
    }

    #[test]
    fn test_should_parse_quoted_strings_with_escapes() {
        assert_eq!(
            parse("\"say \"\"hi\"\"\"").unwrap(),
            Value::Str("say \"hi\"".to_owned())
        );
    }

    #[test]
    fn test_should_classify_bare_tokens() {
        assert_eq!(parse("null").unwrap(), Value::Null);
        assert_eq!(parse("false").unwrap(), Value::Bool(false));
        assert_eq!(parse("-7").unwrap(), Value::Int(-7));
        assert_eq!(parse("2.5").unwrap(), Value::Float(2.5));
        assert_eq!(parse("plain").unwrap(), Value::Str("plain".to_owned()));
    }

    #[test]
    fn test_should_parse_empty_containers() {
        assert_eq!(parse("{}").unwrap(), Value::Map(BTreeMap::new()));
        assert_eq!(parse("[]").unwrap(), Value::List(Vec::new()));
    }

    #[test]
    fn test_should_reject_malformed_input() {
        assert!(matches!(parse("{a:1"), Err(JsvError::UnexpectedEof)));
        assert!(matches!(parse("[1,2] extra"), Err(JsvError::TrailingInput { .. })));
        assert!(matches!(parse("{a 1}"), Err(JsvError::UnexpectedChar { .. })));
    }
}
