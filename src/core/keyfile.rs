//! Key-description file parsing
//!
//! Key files are a nested key-value text document (Valve KeyValues style,
//! not JSON): quoted or bare string keys, string values or brace-delimited
//! child sections, `//` line comments. The only part we consume is the
//! top-level `depots` section, one child per depot id carrying a
//! `DecryptionKey` field; everything else is tolerated and skipped.

use thiserror::Error;

use crate::core::types::DepotRecord;

#[derive(Error, Debug)]
pub enum KeyfileError {
    #[error("key file is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("unexpected end of key file")]
    UnexpectedEof,

    #[error("unexpected `{found}` at byte {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("no `depots` section present")]
    MissingDepots,

    #[error("depot `{0}` has no DecryptionKey")]
    MissingKey(String),

    #[error("depot id `{0}` is not numeric")]
    BadDepotId(String),
}

/// A KeyValues value: either a string or a nested section.
///
/// Sections are ordered pairs rather than a map so that duplicate keys and
/// source order survive parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Obj(Vec<(String, Value)>),
}

impl Value {
    fn as_obj(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Obj(items) => Some(items),
            Value::Str(_) => None,
        }
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.as_obj()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Extract one [`DepotRecord`] per entry of the `depots` section.
///
/// Any structural failure is an error for the whole file; the caller treats
/// that as "zero records from this key file" rather than aborting the
/// resolution.
pub fn parse_depot_keys(content: &[u8]) -> Result<Vec<DepotRecord>, KeyfileError> {
    let text = String::from_utf8(content.to_vec())?;
    let doc = parse(&text)?;

    let depots = doc
        .iter()
        .find(|(k, _)| k == "depots")
        .map(|(_, v)| v)
        .ok_or(KeyfileError::MissingDepots)?;

    let mut records = Vec::new();
    for (depot_id, info) in depots.as_obj().ok_or(KeyfileError::MissingDepots)? {
        let key = match info.get("DecryptionKey") {
            Some(Value::Str(key)) => key,
            _ => return Err(KeyfileError::MissingKey(depot_id.clone())),
        };
        let depot_id = depot_id
            .parse()
            .map_err(|_| KeyfileError::BadDepotId(depot_id.clone()))?;
        records.push(DepotRecord {
            depot_id,
            decryption_key: key.clone(),
        });
    }
    Ok(records)
}

/// Parse a whole KeyValues document into its top-level pairs.
pub fn parse(input: &str) -> Result<Vec<(String, Value)>, KeyfileError> {
    let mut lexer = Lexer::new(input);
    let items = parse_body(&mut lexer)?;
    match lexer.next()? {
        None => Ok(items),
        // parse_body only stops early on a stray `}`
        Some(_) => Err(KeyfileError::Unexpected {
            found: '}',
            offset: lexer.offset,
        }),
    }
}

fn parse_body(lexer: &mut Lexer<'_>) -> Result<Vec<(String, Value)>, KeyfileError> {
    let mut items = Vec::new();
    loop {
        let key = match lexer.peek()? {
            None | Some(Token::Close) => return Ok(items),
            Some(Token::Open) => {
                return Err(KeyfileError::Unexpected {
                    found: '{',
                    offset: lexer.offset,
                })
            }
            Some(Token::Str(_)) => match lexer.next()? {
                Some(Token::Str(s)) => s,
                _ => unreachable!(),
            },
        };

        match lexer.next()? {
            Some(Token::Str(value)) => items.push((key, Value::Str(value))),
            Some(Token::Open) => {
                let children = parse_body(lexer)?;
                match lexer.next()? {
                    Some(Token::Close) => items.push((key, Value::Obj(children))),
                    _ => return Err(KeyfileError::UnexpectedEof),
                }
            }
            Some(Token::Close) => {
                return Err(KeyfileError::Unexpected {
                    found: '}',
                    offset: lexer.offset,
                })
            }
            None => return Err(KeyfileError::UnexpectedEof),
        }
    }
}

#[derive(Debug)]
enum Token {
    Str(String),
    Open,
    Close,
}

struct Lexer<'a> {
    input: &'a str,
    offset: usize,
    peeked: Option<Option<Token>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            offset: 0,
            peeked: None,
        }
    }

    fn peek(&mut self) -> Result<Option<&Token>, KeyfileError> {
        if self.peeked.is_none() {
            let tok = self.lex()?;
            self.peeked = Some(tok);
        }
        Ok(self.peeked.as_ref().and_then(Option::as_ref))
    }

    fn next(&mut self) -> Result<Option<Token>, KeyfileError> {
        if let Some(tok) = self.peeked.take() {
            return Ok(tok);
        }
        self.lex()
    }

    fn lex(&mut self) -> Result<Option<Token>, KeyfileError> {
        let bytes = self.input.as_bytes();
        loop {
            // Skip whitespace
            while self.offset < bytes.len() && bytes[self.offset].is_ascii_whitespace() {
                self.offset += 1;
            }
            // Skip `//` comments to end of line
            if bytes[self.offset..].starts_with(b"//") {
                while self.offset < bytes.len() && bytes[self.offset] != b'\n' {
                    self.offset += 1;
                }
                continue;
            }
            break;
        }

        let Some(&b) = bytes.get(self.offset) else {
            return Ok(None);
        };

        match b {
            b'{' => {
                self.offset += 1;
                Ok(Some(Token::Open))
            }
            b'}' => {
                self.offset += 1;
                Ok(Some(Token::Close))
            }
            b'"' => {
                self.offset += 1;
                let mut out = String::new();
                loop {
                    let Some(&c) = bytes.get(self.offset) else {
                        return Err(KeyfileError::UnexpectedEof);
                    };
                    self.offset += 1;
                    match c {
                        b'"' => return Ok(Some(Token::Str(out))),
                        b'\\' => {
                            let Some(&esc) = bytes.get(self.offset) else {
                                return Err(KeyfileError::UnexpectedEof);
                            };
                            self.offset += 1;
                            match esc {
                                b'n' => out.push('\n'),
                                b't' => out.push('\t'),
                                b'\\' => out.push('\\'),
                                b'"' => out.push('"'),
                                other => {
                                    // Unknown escapes pass through verbatim
                                    out.push('\\');
                                    out.push(other as char);
                                }
                            }
                        }
                        _ => {
                            // Re-borrow as str to keep multi-byte chars intact
                            let start = self.offset - 1;
                            let ch_len = utf8_len(c);
                            let end = start + ch_len;
                            out.push_str(&self.input[start..end]);
                            self.offset = end;
                        }
                    }
                }
            }
            _ => {
                // Bare token: runs to whitespace, brace, or quote
                let start = self.offset;
                while let Some(&c) = bytes.get(self.offset) {
                    if c.is_ascii_whitespace() || matches!(c, b'{' | b'}' | b'"') {
                        break;
                    }
                    self.offset += 1;
                }
                Ok(Some(Token::Str(self.input[start..self.offset].to_string())))
            }
        }
    }
}

fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b < 0xE0 => 2,
        b if b < 0xF0 => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
"depots"
{
    "228990"
    {
        "DecryptionKey" "cafe0123456789abcdef"
    }
    "228991"
    {
        // community dumps carry extra fields; ignored
        "SomeOtherField" "1"
        "DecryptionKey" "deadbeef"
    }
}
"#;

    #[test]
    fn test_parse_depot_keys() {
        let records = parse_depot_keys(SAMPLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].depot_id, 228990);
        assert_eq!(records[0].decryption_key, "cafe0123456789abcdef");
        assert_eq!(records[1].depot_id, 228991);
        assert_eq!(records[1].decryption_key, "deadbeef");
    }

    #[test]
    fn test_missing_decryption_key_fails_whole_file() {
        let input = r#"
"depots"
{
    "1" { "DecryptionKey" "aa" }
    "2" { "Unrelated" "x" }
}
"#;
        let err = parse_depot_keys(input.as_bytes()).unwrap_err();
        assert!(matches!(err, KeyfileError::MissingKey(id) if id == "2"));
    }

    #[test]
    fn test_missing_depots_section() {
        let err = parse_depot_keys(b"\"other\" { }").unwrap_err();
        assert!(matches!(err, KeyfileError::MissingDepots));
    }

    #[test]
    fn test_bare_tokens_and_escapes() {
        let doc = parse("key \"a \\\"quoted\\\" value\"\nother { nested 1 }").unwrap();
        assert_eq!(doc[0].1, Value::Str("a \"quoted\" value".to_string()));
        let nested = doc[1].1.get("nested").unwrap();
        assert_eq!(*nested, Value::Str("1".to_string()));
    }

    #[test]
    fn test_unbalanced_braces() {
        assert!(parse("\"depots\" {").is_err());
        assert!(parse("}").is_err());
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        assert!(parse_depot_keys(&[0x22, 0xFF, 0x22]).is_err());
    }
}
