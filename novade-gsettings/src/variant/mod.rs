//! GVariant values.
//!
//! Settings values, schema defaults and range bounds are GVariant values,
//! held as [`zvariant::Value`]. This module adds what the settings engine
//! needs on top of zvariant:
//!
//! - the serialized `v` form found inside `gschemas.compiled`, dconf
//!   databases and dconf change blobs ([`from_gvariant_bytes`],
//!   [`to_gvariant_bytes`]);
//! - [`text`]: a parser for the human readable form used in keyfiles and on
//!   the command line (`'hello'`, `uint32 5`, `@as []`, `{'a': <1>}`). The
//!   printing side is zvariant's own `Display`.

pub mod text;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use byteorder::LE;
use zvariant::{EncodingContext, StructureBuilder, Value};

use crate::error::VariantError;

pub use zvariant::{Array, Dict, Maybe, OwnedValue, Signature};

/// A GVariant value that owns its data.
pub type Variant = Value<'static>;

/// Little-endian GVariant framing, as used by GLib on every supported host.
pub(crate) fn gvariant_context() -> EncodingContext<LE> {
    EncodingContext::<LE>::new_gvariant(0)
}

/// Detaches a borrowed value from the buffer it was decoded from.
pub fn into_owned(value: &Value<'_>) -> Variant {
    Variant::from(value.to_owned())
}

/// Decodes a serialized `v`: the value, a NUL byte, then its type string.
pub fn from_gvariant_bytes(data: &[u8]) -> Result<Variant, VariantError> {
    let value: Value<'_> = zvariant::from_slice(data, gvariant_context())?;
    Ok(into_owned(&value))
}

/// Serializes `value` boxed in a `v`, in little-endian normal form.
pub fn to_gvariant_bytes(value: &Value<'_>) -> Result<Vec<u8>, VariantError> {
    Ok(zvariant::to_bytes(gvariant_context(), value)?)
}

/// Parses a type string such as `a{sv}`.
pub fn parse_signature(text: &str) -> Result<Signature<'static>, VariantError> {
    Signature::try_from(text.to_string()).map_err(|_| VariantError::InvalidSignature(text.to_string()))
}

/// The complete type of `value`, detached from it.
pub fn signature_of(value: &Value<'_>) -> Signature<'static> {
    value.value_signature().to_owned()
}

/// Builds a tuple from already typed members.
pub fn tuple(members: Vec<Variant>) -> Variant {
    let builder = members
        .into_iter()
        .fold(StructureBuilder::new(), |builder, member| builder.append_field(member));
    Value::Structure(builder.build())
}

/// Builds a string-keyed dictionary whose values all have type `value_type`.
pub fn string_dict<I>(value_type: &str, entries: I) -> Result<Variant, VariantError>
where
    I: IntoIterator<Item = (String, Variant)>,
{
    let mut dict = Dict::new(Signature::from_static_str_unchecked("s"), parse_signature(value_type)?);
    for (key, value) in entries {
        dict.append(Value::from(key), value)?;
    }
    Ok(Value::Dict(dict))
}

/// Strips any number of `v` boxes.
pub fn unboxed<'a, 'b>(mut value: &'a Value<'b>) -> &'a Value<'b> {
    while let Value::Value(inner) = value {
        value = inner;
    }
    value
}

/// Any integer type widened to `i128`.
pub fn as_integer(value: &Value<'_>) -> Option<i128> {
    match value {
        Value::U8(n) => Some(i128::from(*n)),
        Value::I16(n) => Some(i128::from(*n)),
        Value::U16(n) => Some(i128::from(*n)),
        Value::I32(n) => Some(i128::from(*n)),
        Value::U32(n) => Some(i128::from(*n)),
        Value::I64(n) => Some(i128::from(*n)),
        Value::U64(n) => Some(i128::from(*n)),
        _ => None,
    }
}

/// Orders two values of the same numeric type.
pub fn numeric_cmp(a: &Value<'_>, b: &Value<'_>) -> Option<Ordering> {
    if a.value_signature() != b.value_signature() {
        return None;
    }
    match (a, b) {
        (Value::F64(x), Value::F64(y)) => x.partial_cmp(y),
        _ => Some(as_integer(a)?.cmp(&as_integer(b)?)),
    }
}

/// Collects a string-keyed dictionary, unboxing `v` values one level.
/// Other shapes yield `None`.
pub fn string_map(value: &Variant) -> Option<BTreeMap<String, Variant>> {
    let Value::Dict(dict) = value else {
        return None;
    };
    let map = HashMap::<String, Variant>::try_from(dict.clone()).ok()?;
    Some(map.into_iter().collect())
}
