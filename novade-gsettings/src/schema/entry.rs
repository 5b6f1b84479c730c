//! Decoding of compiled schema keys.
//!
//! A key is stored as a tuple whose first member is the default value and
//! whose remaining members are `(y payload)` metadata blocks:
//!
//! | tag | payload                         | decoded into            |
//! |-----|---------------------------------|-------------------------|
//! | `l` | `(ys)` category, text           | [`SchemaEntry::l10n`]   |
//! | `f` | `au` (or a tuple ending in one) | words, [`WordsKind::Flags`]  |
//! | `e` | `au` (or a tuple ending in one) | words, [`WordsKind::Enum`]   |
//! | `c` | `au` (or a tuple ending in one) | words, [`WordsKind::Choice`] |
//! | `r` | `(min, max)`                    | minimum/maximum value   |
//! | `d` | `a{sv}`                         | desktop overrides       |
//!
//! Other tags are skipped. A tag seen twice keeps its last payload.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use tracing::trace;
use zvariant::Value;

use super::SchemaTable;
use crate::error::{Result, SettingsError};
use crate::variant::{self, Signature, Variant};

/// Which kind of word list a key carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WordsKind {
    Flags,
    Enum,
    Choice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalizationCategory {
    Messages,
    Time,
}

/// Translation hints for a key's default. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Localization {
    pub category: LocalizationCategory,
    /// The gettext message context, when the schema declares one.
    pub context: Option<String>,
    /// The default as written in the schema source, before translation.
    pub untranslated: String,
}

/// The decoded metadata of one schema key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaEntry {
    #[serde(serialize_with = "as_text")]
    pub default_value: Variant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words_kind: Option<WordsKind>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "optional_as_text")]
    pub minimum_value: Option<Variant>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "optional_as_text")]
    pub maximum_value: Option<Variant>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "overrides_as_text")]
    pub desktop_overrides: Option<BTreeMap<String, Variant>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l10n: Option<Localization>,
}

fn as_text<S: Serializer>(value: &Variant, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn optional_as_text<S: Serializer>(value: &Option<Variant>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.collect_str(value),
        None => serializer.serialize_none(),
    }
}

fn overrides_as_text<S: Serializer>(
    value: &Option<BTreeMap<String, Variant>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(map) => serializer.collect_map(map.iter().map(|(desktop, value)| (desktop, value.to_string()))),
        None => serializer.serialize_none(),
    }
}

impl SchemaEntry {
    /// Decodes `key` from `table`.
    ///
    /// # Errors
    ///
    /// `UnknownKey` if the table does not declare `key`, `CorruptDatabase` if
    /// the stored entry does not have the expected shape.
    pub fn decode(table: &SchemaTable, key: &str) -> Result<Self> {
        let raw = table.lookup(key)?.ok_or_else(|| SettingsError::UnknownKey {
            schema: table.id().to_string(),
            key: key.to_string(),
        })?;
        Self::from_raw(&raw).map_err(|reason| {
            SettingsError::corrupt(
                table.source(),
                format!("key '{key}' of schema '{}': {reason}", table.id()),
            )
        })
    }

    fn from_raw(raw: &Variant) -> std::result::Result<Self, String> {
        let members = match raw {
            Value::Structure(structure) if !structure.fields().is_empty() => structure.fields(),
            other => return Err(format!("expected a non-empty tuple, found '{}'", other.value_signature())),
        };

        let mut entry = SchemaEntry {
            default_value: members[0].clone(),
            words: None,
            words_kind: None,
            minimum_value: None,
            maximum_value: None,
            desktop_overrides: None,
            l10n: None,
        };

        for block in &members[1..] {
            let (tag, payload) = match block {
                Value::Structure(structure) => match structure.fields() {
                    [Value::U8(tag), payload] => (*tag, payload),
                    _ => return Err(format!("malformed metadata block '{}'", block.value_signature())),
                },
                _ => return Err(format!("malformed metadata block '{}'", block.value_signature())),
            };
            match tag {
                b'l' => entry.l10n = decode_localization(payload),
                b'f' | b'e' | b'c' => {
                    entry.words = Some(decode_words(payload)?);
                    entry.words_kind = Some(match tag {
                        b'f' => WordsKind::Flags,
                        b'e' => WordsKind::Enum,
                        _ => WordsKind::Choice,
                    });
                }
                b'r' => {
                    let (minimum, maximum) = match payload {
                        Value::Structure(bounds) if bounds.fields().len() == 2 => {
                            (&bounds.fields()[0], &bounds.fields()[1])
                        }
                        other => return Err(format!("range payload has type '{}'", other.value_signature())),
                    };
                    entry.minimum_value = Some(minimum.clone());
                    entry.maximum_value = Some(maximum.clone());
                }
                b'd' => {
                    let overrides = variant::string_map(payload)
                        .ok_or_else(|| format!("desktop overrides have type '{}'", payload.value_signature()))?;
                    entry.desktop_overrides = Some(
                        overrides
                            .into_iter()
                            .map(|(desktop, value)| (desktop, variant::unboxed(&value).clone()))
                            .collect(),
                    );
                }
                other => trace!("Skipping metadata tag {:?}", char::from(other)),
            }
        }
        Ok(entry)
    }

    /// The default after applying the first matching desktop override.
    pub fn resolve_default(&self, desktops: &[String]) -> &Variant {
        if let Some(overrides) = &self.desktop_overrides {
            if let Some(value) = desktops.iter().find_map(|desktop| overrides.get(desktop)) {
                return value;
            }
        }
        &self.default_value
    }

    /// The type every stored value of this key must have.
    pub fn value_type(&self) -> Signature<'static> {
        variant::signature_of(&self.default_value)
    }

    /// Checks `value` against the declared type and range.
    pub fn check_value(&self, key: &str, value: &Variant) -> Result<()> {
        let expected = self.value_type();
        let actual = value.value_signature();
        if actual.as_str() != expected.as_str() {
            return Err(SettingsError::TypeMismatch {
                key: key.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        if let (Some(minimum), Some(maximum)) = (&self.minimum_value, &self.maximum_value) {
            let below = variant::numeric_cmp(value, minimum).is_some_and(|o| o.is_lt());
            let above = variant::numeric_cmp(value, maximum).is_some_and(|o| o.is_gt());
            if below || above {
                return Err(SettingsError::OutOfRange {
                    key: key.to_string(),
                    value: value.to_string(),
                    minimum: minimum.to_string(),
                    maximum: maximum.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn decode_words(payload: &Variant) -> std::result::Result<Vec<u32>, String> {
    let words = match payload {
        Value::Structure(members) if members.fields().len() >= 2 => &members.fields()[1],
        other => other,
    };
    match words {
        Value::Array(items) if items.element_signature().as_str() == "u" => Ok(items
            .iter()
            .filter_map(|item| match item {
                Value::U32(word) => Some(*word),
                _ => None,
            })
            .collect()),
        other => Err(format!("word list has type '{}'", other.value_signature())),
    }
}

/// Reads a `(ys)` hint. The string is the untranslated default, prefixed
/// with `context` and a `\x04` separator when the schema gives a context.
/// Hints that cannot be read are dropped, since they never affect values.
fn decode_localization(payload: &Variant) -> Option<Localization> {
    let fields = match payload {
        Value::Structure(structure) => structure.fields(),
        other => {
            trace!("Ignoring localization hint of type '{}'", other.value_signature());
            return None;
        }
    };
    let (category, text) = match fields {
        [Value::U8(category), Value::Str(text)] => (*category, text.as_str()),
        _ => {
            trace!("Ignoring localization hint of type '{}'", payload.value_signature());
            return None;
        }
    };
    let category = match category {
        b'm' => LocalizationCategory::Messages,
        b't' => LocalizationCategory::Time,
        other => {
            trace!("Ignoring localization hint with category {:?}", char::from(other));
            return None;
        }
    };
    let (context, untranslated) = match text.split_once('\x04') {
        Some((context, untranslated)) => (Some(context.to_string()), untranslated),
        None => (None, text),
    };
    Some(Localization {
        category,
        context,
        untranslated: untranslated.to_string(),
    })
}
