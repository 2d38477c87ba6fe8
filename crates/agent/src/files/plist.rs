//! Property-list reader.
//!
//! Parses XML or binary plists into a `serde_json::Value` tree so they can
//! travel through the protocol unchanged.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Failure to read a structured file.
#[derive(Debug, Error)]
#[error(
    "unable to parse file {} as plist, please make sure it does exist and is in valid format ({source})",
    .path.display()
)]
pub struct ParseError {
    /// File that was being read.
    pub path: PathBuf,
    /// Underlying cause.
    #[source]
    pub source: PlistFailure,
}

/// Why a plist could not be turned into a tree.
#[derive(Debug, Error)]
pub enum PlistFailure {
    /// Missing file or malformed content.
    #[error("{0}")]
    Decode(#[from] plist::Error),

    /// Parsed, but the root is not a dictionary.
    #[error("root object is {0}, expected a dictionary")]
    NotADictionary(&'static str),
}

/// Parse the plist at `path`. The root must be a dictionary.
pub fn read_plist(path: &Path) -> Result<Value, ParseError> {
    let fail = |source: PlistFailure| ParseError {
        path: path.to_path_buf(),
        source,
    };

    let value = plist::Value::from_file(path).map_err(|e| fail(e.into()))?;
    if !matches!(value, plist::Value::Dictionary(_)) {
        return Err(fail(PlistFailure::NotADictionary(kind_name(&value))));
    }

    Ok(to_json(value))
}

/// Convert a plist value into a JSON tree.
///
/// Data becomes base64 text, dates their RFC 3339 form, UIDs integers.
pub fn to_json(value: plist::Value) -> Value {
    match value {
        plist::Value::Dictionary(dict) => Value::Object(
            dict.into_iter()
                .map(|(key, value)| (key, to_json(value)))
                .collect::<Map<String, Value>>(),
        ),
        plist::Value::Array(items) => Value::Array(items.into_iter().map(to_json).collect()),
        plist::Value::Boolean(flag) => Value::Bool(flag),
        plist::Value::Data(bytes) => Value::String(STANDARD.encode(bytes)),
        plist::Value::Date(date) => Value::String(date.to_xml_format()),
        plist::Value::Real(real) => Number::from_f64(real).map_or(Value::Null, Value::Number),
        plist::Value::Integer(integer) => integer
            .as_signed()
            .map(Value::from)
            .or_else(|| integer.as_unsigned().map(Value::from))
            .unwrap_or(Value::Null),
        plist::Value::String(text) => Value::String(text),
        plist::Value::Uid(uid) => Value::from(uid.get()),
        _ => Value::Null,
    }
}

fn kind_name(value: &plist::Value) -> &'static str {
    match value {
        plist::Value::Dictionary(_) => "a dictionary",
        plist::Value::Array(_) => "an array",
        plist::Value::Boolean(_) => "a boolean",
        plist::Value::Data(_) => "data",
        plist::Value::Date(_) => "a date",
        plist::Value::Real(_) => "a real",
        plist::Value::Integer(_) => "an integer",
        plist::Value::String(_) => "a string",
        plist::Value::Uid(_) => "a uid",
        _ => "an unsupported value",
    }
}
