//! GVariant text format parser.
//!
//! Values print through zvariant's `Display`, which annotates whatever a
//! bare literal would not convey (`uint32 5`, `@as []`, `@ms "x"`). This
//! parser reads that output back, and also the single-quoted form GLib's
//! own tools print. An optional expected type lets bare literals such as
//! `5` or `'x'` be read as `uint32` or `ms` when the caller knows the key's
//! type.

use zvariant::{Array, Dict, Maybe, ObjectPath, Signature, Value};

use super::{parse_signature, signature_of, tuple, Variant};
use crate::error::VariantError;

const NUMERIC: &[&str] = &["y", "n", "q", "i", "u", "x", "t", "d"];
const BASIC: &[u8] = b"bynqiuxtdsog";

/// Parses `input`; `hint` constrains (and disambiguates) the result type.
pub fn parse(input: &str, hint: Option<&Signature<'_>>) -> Result<Variant, VariantError> {
    let mut parser = Parser { src: input, pos: 0 };
    let value = parser.value(hint.map(Signature::as_str))?;
    parser.skip_ws();
    if parser.pos != input.len() {
        return Err(parser.error("unexpected trailing characters"));
    }
    Ok(value)
}

/// Length of the first complete type at the start of `sig`.
fn type_len(sig: &[u8]) -> Option<usize> {
    match sig.first()? {
        b'b' | b'y' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'h' | b'd' | b's' | b'o' | b'g' | b'v' => Some(1),
        b'a' | b'm' => Some(1 + type_len(&sig[1..])?),
        b'(' => {
            let mut pos = 1;
            while *sig.get(pos)? != b')' {
                pos += type_len(&sig[pos..])?;
            }
            Some(pos + 1)
        }
        b'{' => {
            let key = type_len(&sig[1..])?;
            let value = type_len(&sig[1 + key..])?;
            (sig.get(1 + key + value) == Some(&b'}')).then_some(2 + key + value)
        }
        _ => None,
    }
}

/// Splits the member types of a tuple type.
fn tuple_members(sig: &str) -> Option<Vec<String>> {
    let inner = sig.strip_prefix('(')?.strip_suffix(')')?;
    let mut members = Vec::new();
    let mut rest = inner;
    while !rest.is_empty() {
        let len = type_len(rest.as_bytes())?;
        members.push(rest[..len].to_string());
        rest = &rest[len..];
    }
    Some(members)
}

/// Key and value types of an `a{kv}` type.
fn dict_types(sig: &str) -> Option<(String, String)> {
    let inner = sig.strip_prefix("a{")?.strip_suffix('}')?;
    let key = type_len(inner.as_bytes())?;
    let value = &inner[key..];
    (type_len(value.as_bytes())? == value.len()).then(|| (inner[..key].to_string(), value.to_string()))
}

fn mismatch(expected: &str, actual: &str) -> VariantError {
    VariantError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> VariantError {
        VariantError::Parse {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), VariantError> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            _ => Err(self.error(format!("expected '{expected}'"))),
        }
    }

    fn peek_word(&self) -> &'a str {
        let rest = self.rest();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        &rest[..end]
    }

    fn value(&mut self, hint: Option<&str>) -> Result<Variant, VariantError> {
        self.skip_ws();
        if let Some(element) = hint.and_then(|h| h.strip_prefix('m')) {
            let word = self.peek_word();
            if word != "nothing" && word != "just" && self.peek() != Some('@') {
                let inner = self.value(Some(element))?;
                return Ok(Value::Maybe(Maybe::just(inner)));
            }
        }
        let start = self.pos;
        let value = self.value_inner(hint)?;
        if let Some(expected) = hint {
            let actual = value.value_signature();
            if actual.as_str() != expected {
                self.pos = start;
                return Err(mismatch(expected, actual.as_str()));
            }
        }
        Ok(value)
    }

    fn value_inner(&mut self, hint: Option<&str>) -> Result<Variant, VariantError> {
        let rest = self.rest();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('@') => {
                self.bump();
                let annotated = self.rest();
                let len = type_len(annotated.as_bytes()).ok_or_else(|| self.error("invalid type annotation"))?;
                let annotated = &annotated[..len];
                parse_signature(annotated)?;
                self.pos += len;
                if let Some(expected) = hint {
                    if expected != annotated {
                        return Err(mismatch(expected, annotated));
                    }
                }
                self.value(Some(annotated))
            }
            Some('[') => self.array(hint),
            Some('{') => self.dict(hint),
            Some('(') => self.tuple(hint),
            Some('<') => {
                self.bump();
                let inner = self.value(None)?;
                self.expect('>')?;
                Ok(Value::Value(Box::new(inner)))
            }
            Some('\'') | Some('"') => {
                let text = self.quoted()?;
                match hint {
                    Some("o") => {
                        let path = ObjectPath::try_from(text)?;
                        Ok(Value::ObjectPath(path))
                    }
                    Some("g") => Ok(Value::Signature(parse_signature(&text)?)),
                    _ => Ok(Value::from(text)),
                }
            }
            Some('b') if rest.starts_with("b'") || rest.starts_with("b\"") => {
                self.bump();
                let mut bytes = self.quoted()?.into_bytes();
                bytes.push(0);
                Ok(Value::from(bytes))
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(hint),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(hint),
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
        }
    }

    fn keyword(&mut self, hint: Option<&str>) -> Result<Variant, VariantError> {
        let word = self.peek_word();
        let annotated = match word {
            "true" | "false" => {
                self.pos += word.len();
                return Ok(Value::Bool(word == "true"));
            }
            w if w.eq_ignore_ascii_case("nan") || w.eq_ignore_ascii_case("inf") => return self.number(hint),
            "nothing" => {
                self.pos += word.len();
                return match hint.and_then(|h| h.strip_prefix('m')) {
                    Some(element) => Ok(Value::Maybe(Maybe::nothing(parse_signature(element)?))),
                    None => Err(self.error("cannot infer the type of 'nothing'")),
                };
            }
            "just" => {
                self.pos += word.len();
                let inner = self.value(hint.and_then(|h| h.strip_prefix('m')))?;
                return Ok(Value::Maybe(Maybe::just(inner)));
            }
            "boolean" => "b",
            "byte" => "y",
            "int16" => "n",
            "uint16" => "q",
            "int32" => "i",
            "uint32" => "u",
            "int64" => "x",
            "uint64" => "t",
            "double" => "d",
            "objectpath" => "o",
            "signature" => "g",
            "handle" => return Err(self.error("handles are not supported")),
            _ => return Err(self.error(format!("unknown keyword '{word}'"))),
        };
        self.pos += word.len();
        if let Some(expected) = hint {
            if expected != annotated {
                return Err(mismatch(expected, annotated));
            }
        }
        self.value(Some(annotated))
    }

    fn number(&mut self, hint: Option<&str>) -> Result<Variant, VariantError> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.')))
            .unwrap_or(rest.len());
        let token = &rest[..end];
        let start = self.pos;
        self.pos += end;

        let unsigned = token.trim_start_matches(['-', '+']);
        let is_hex = unsigned.starts_with("0x") || unsigned.starts_with("0X");
        let is_float = !is_hex
            && (token.contains(['.', 'e', 'E'])
                || unsigned.eq_ignore_ascii_case("nan")
                || unsigned.eq_ignore_ascii_case("inf"));

        let target = match hint {
            Some(ty) if NUMERIC.contains(&ty) => ty,
            Some(ty) => return Err(mismatch(ty, if is_float { "d" } else { "i" })),
            None if is_float => "d",
            None => "i",
        };

        let bad = |reason: &str| VariantError::Parse {
            offset: start,
            reason: format!("{reason}: '{token}'"),
        };
        if target == "d" {
            let parsed = if is_hex { parse_integer(token).map(|n| n as f64) } else { token.parse::<f64>().ok() };
            return parsed.map(Value::F64).ok_or_else(|| bad("invalid number"));
        }
        if is_float {
            return Err(bad("expected an integer"));
        }
        let n = parse_integer(token).ok_or_else(|| bad("invalid integer"))?;
        let out_of_range = |_| bad("integer out of range");
        Ok(match target {
            "y" => Value::U8(u8::try_from(n).map_err(out_of_range)?),
            "n" => Value::I16(i16::try_from(n).map_err(out_of_range)?),
            "q" => Value::U16(u16::try_from(n).map_err(out_of_range)?),
            "i" => Value::I32(i32::try_from(n).map_err(out_of_range)?),
            "u" => Value::U32(u32::try_from(n).map_err(out_of_range)?),
            "x" => Value::I64(i64::try_from(n).map_err(out_of_range)?),
            _ => Value::U64(u64::try_from(n).map_err(out_of_range)?),
        })
    }

    fn quoted(&mut self) -> Result<String, VariantError> {
        let quote = self.bump().ok_or_else(|| self.error("expected a string"))?;
        let mut text = String::new();
        loop {
            let c = self.bump().ok_or_else(|| self.error("unterminated string"))?;
            match c {
                c if c == quote => return Ok(text),
                '\\' => {
                    let escaped = self.bump().ok_or_else(|| self.error("unterminated escape"))?;
                    match escaped {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        'r' => text.push('\r'),
                        'b' => text.push('\u{8}'),
                        'f' => text.push('\u{c}'),
                        'v' => text.push('\u{b}'),
                        '0' => text.push('\0'),
                        'u' if self.peek() == Some('{') => text.push(self.braced_escape()?),
                        'u' => text.push(self.unicode_escape(4)?),
                        'U' => text.push(self.unicode_escape(8)?),
                        other => text.push(other),
                    }
                }
                c => text.push(c),
            }
        }
    }

    fn unicode_escape(&mut self, digits: usize) -> Result<char, VariantError> {
        let hex = self.rest().get(..digits).ok_or_else(|| self.error("truncated unicode escape"))?;
        let c = char_from_hex(hex).ok_or_else(|| self.error("invalid unicode escape"))?;
        self.pos += digits;
        Ok(c)
    }

    /// `\u{1b}`, as written by Rust's `Debug` for strings.
    fn braced_escape(&mut self) -> Result<char, VariantError> {
        self.bump();
        let rest = self.rest();
        let close = rest.find('}').ok_or_else(|| self.error("unterminated unicode escape"))?;
        let c = char_from_hex(&rest[..close]).ok_or_else(|| self.error("invalid unicode escape"))?;
        self.pos += close + 1;
        Ok(c)
    }

    fn array(&mut self, hint: Option<&str>) -> Result<Variant, VariantError> {
        self.bump();
        let mut element = match hint {
            Some(h) => Some(h.strip_prefix('a').ok_or_else(|| mismatch(h, "array"))?.to_string()),
            None => None,
        };
        self.skip_ws();
        if let Some((key, value)) = hint.and_then(dict_types) {
            // `[]` is also how an empty dictionary may be written.
            self.expect(']')?;
            return Ok(Value::Dict(Dict::new(parse_signature(&key)?, parse_signature(&value)?)));
        }

        let mut items = Vec::new();
        if self.peek() == Some(']') {
            self.bump();
        } else {
            loop {
                let item = self.value(element.as_deref())?;
                if element.is_none() {
                    element = Some(signature_of(&item).as_str().to_string());
                }
                items.push(item);
                self.skip_ws();
                match self.bump() {
                    Some(',') => continue,
                    Some(']') => break,
                    _ => return Err(self.error("expected ',' or ']'")),
                }
            }
        }
        let element = element.ok_or_else(|| self.error("cannot infer the element type of an empty array"))?;
        let mut array = Array::new(parse_signature(&element)?);
        for item in items {
            array.append(item)?;
        }
        Ok(Value::Array(array))
    }

    fn dict(&mut self, hint: Option<&str>) -> Result<Variant, VariantError> {
        self.bump();
        let (mut key_type, mut value_type) = match hint {
            Some(h) => {
                let (key, value) = dict_types(h).ok_or_else(|| mismatch(h, "dictionary"))?;
                (Some(key), Some(value))
            }
            None => (None, None),
        };

        let mut entries = Vec::new();
        self.skip_ws();
        if self.peek() == Some('}') {
            self.bump();
        } else {
            loop {
                let key = self.value(key_type.as_deref())?;
                if key_type.is_none() {
                    key_type = Some(signature_of(&key).as_str().to_string());
                }
                self.skip_ws();
                if self.peek() == Some(',') {
                    return Err(self.error("dictionary entries are only supported inside dictionaries"));
                }
                self.expect(':')?;
                let entry_value = self.value(value_type.as_deref())?;
                if value_type.is_none() {
                    value_type = Some(signature_of(&entry_value).as_str().to_string());
                }
                entries.push((key, entry_value));
                self.skip_ws();
                match self.bump() {
                    Some(',') => continue,
                    Some('}') => break,
                    _ => return Err(self.error("expected ',' or '}'")),
                }
            }
        }

        let (Some(key_type), Some(value_type)) = (key_type, value_type) else {
            return Err(self.error("cannot infer the type of an empty dictionary"));
        };
        if !(key_type.len() == 1 && BASIC.contains(&key_type.as_bytes()[0])) {
            return Err(self.error("dictionary keys must be basic values"));
        }
        let mut dict = Dict::new(parse_signature(&key_type)?, parse_signature(&value_type)?);
        for (key, entry_value) in entries {
            dict.append(key, entry_value)?;
        }
        Ok(Value::Dict(dict))
    }

    fn tuple(&mut self, hint: Option<&str>) -> Result<Variant, VariantError> {
        self.bump();
        let members = match hint {
            Some(h) => Some(tuple_members(h).ok_or_else(|| mismatch(h, "tuple"))?),
            None => None,
        };
        self.skip_ws();
        if self.peek() == Some(')') {
            return Err(self.error("the empty tuple is not supported"));
        }
        let mut items = Vec::new();
        loop {
            let member_hint = match &members {
                Some(members) => Some(
                    members
                        .get(items.len())
                        .ok_or_else(|| self.error("too many tuple members"))?
                        .as_str(),
                ),
                None => None,
            };
            items.push(self.value(member_hint)?);
            self.skip_ws();
            match self.bump() {
                Some(',') => {
                    self.skip_ws();
                    if self.peek() == Some(')') {
                        self.bump();
                        break;
                    }
                }
                Some(')') => break,
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
        Ok(tuple(items))
    }
}

fn char_from_hex(hex: &str) -> Option<char> {
    char::from_u32(u32::from_str_radix(hex, 16).ok()?)
}

fn parse_integer(token: &str) -> Option<i128> {
    let (negative, digits) = match token.as_bytes().first()? {
        b'-' => (true, &token[1..]),
        b'+' => (false, &token[1..]),
        _ => (false, token),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::string_dict;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn sig(signature: &str) -> Signature<'static> {
        parse_signature(signature).unwrap()
    }

    #[rstest]
    #[case(Value::Bool(true), "true")]
    #[case(Value::I32(-4), "-4")]
    #[case(Value::U32(5), "uint32 5")]
    #[case(Value::U8(10), "byte 0x0a")]
    #[case(Value::F64(2.0), "2.")]
    #[case(Value::from("it's"), "\"it's\"")]
    #[case(Value::from(vec!["a", "b"]), "[\"a\", \"b\"]")]
    #[case(Value::from(Vec::<String>::new()), "@as []")]
    #[case(Value::Maybe(Maybe::nothing(sig("s"))), "@ms nothing")]
    #[case(tuple(vec![Value::I32(1)]), "(1,)")]
    #[case(Value::Value(Box::new(Value::U64(9))), "<uint64 9>")]
    fn test_display_is_parseable_text(#[case] value: Variant, #[case] expected: &str) {
        let printed = value.to_string();
        assert_eq!(printed, expected);
        assert_eq!(parse(&printed, None).unwrap(), value);
    }

    #[test]
    fn test_printed_values_parse_back_without_hint() {
        let values = vec![
            string_dict(
                "v",
                [
                    ("GNOME".to_string(), Value::Value(Box::new(Value::from("adwaita")))),
                    ("KDE".to_string(), Value::Value(Box::new(Value::I16(-2)))),
                ],
            )
            .unwrap(),
            tuple(vec![
                Value::ObjectPath(ObjectPath::try_from("/org/novade").unwrap()),
                Value::Maybe(Maybe::just(Value::F64(0.25))),
                Value::from(vec![1u32, 2]),
            ]),
            Value::from("tab\there\nnewline \\ backslash \u{1b} escape"),
            Value::from(b"raw\0".to_vec()),
            Value::Maybe(Maybe::just(Value::Maybe(Maybe::nothing(sig("i"))))),
        ];
        for value in values {
            let printed = value.to_string();
            assert_eq!(parse(&printed, None).unwrap(), value, "round trip of {printed}");
        }
    }

    #[test]
    fn test_glib_single_quoted_form_is_accepted() {
        assert_eq!(parse(r"'it\'s'", None).unwrap(), Value::from("it's"));
        assert_eq!(parse(r"'é'", None).unwrap(), Value::from("é"));
        assert_eq!(
            parse("{'KDE': <'breeze'>}", None).unwrap(),
            string_dict("v", [("KDE".to_string(), Value::Value(Box::new(Value::from("breeze"))))]).unwrap()
        );
    }

    #[test]
    fn test_hint_selects_numeric_and_maybe_types() {
        assert_eq!(parse("5", Some(&sig("u"))).unwrap(), Value::U32(5));
        assert_eq!(parse("0x10", Some(&sig("y"))).unwrap(), Value::U8(16));
        assert_eq!(parse("3", Some(&sig("d"))).unwrap(), Value::F64(3.0));
        assert_eq!(parse("'x'", Some(&sig("ms"))).unwrap(), Value::Maybe(Maybe::just(Value::from("x"))));
        assert_eq!(parse("nothing", Some(&sig("ms"))).unwrap(), Value::Maybe(Maybe::nothing(sig("s"))));
        assert_eq!(parse("[]", Some(&sig("as"))).unwrap(), Value::from(Vec::<String>::new()));
        assert_eq!(parse("[]", Some(&sig("a{sv}"))).unwrap(), string_dict("v", []).unwrap());
        assert_eq!(
            parse("'/org/novade'", Some(&sig("o"))).unwrap(),
            Value::ObjectPath(ObjectPath::try_from("/org/novade").unwrap())
        );
    }

    #[test]
    fn test_hint_mismatch_is_reported() {
        assert!(matches!(
            parse("'text'", Some(&sig("i"))),
            Err(VariantError::TypeMismatch { .. })
        ));
        assert!(matches!(parse("256", Some(&sig("y"))), Err(VariantError::Parse { .. })));
        assert!(matches!(
            parse("@as ['a']", Some(&sig("ai"))),
            Err(VariantError::TypeMismatch { .. })
        ));
        assert!(matches!(parse("'not a path'", Some(&sig("o"))), Err(VariantError::Encoding(_))));
    }

    #[rstest]
    #[case("[]")]
    #[case("nothing")]
    #[case("[1, 'a']")]
    #[case("'open")]
    #[case("(1, 2")]
    #[case("()")]
    #[case("handle 3")]
    #[case("{'a', 1}")]
    #[case("true false")]
    fn test_malformed_text_is_rejected(#[case] input: &str) {
        assert!(parse(input, None).is_err(), "{input} should not parse");
    }
}
