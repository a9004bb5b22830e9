//! Measurement schemas and the codec turning a point's encoded value into
//! named, typed fields.
//!
//! An encoded value is a sequence of `(field id, value)` pairs. The id is a
//! single byte assigned when the field is first created for the measurement,
//! the value layout depends on the field's type:
//!
//! | type    | bytes                            |
//! |---------|----------------------------------|
//! | float   | 8, IEEE-754 big-endian           |
//! | integer | 8, two's complement big-endian   |
//! | boolean | 1, `0` or `1`                    |
//! | string  | 2 byte big-endian length, UTF-8  |
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

/// Largest number of fields a single measurement can hold.
pub const MAX_FIELDS: usize = u8::MAX as usize;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("field {name:?} is not defined for the measurement")]
    UnknownField { name: String },

    #[error("field id {id} is not defined for the measurement")]
    UnknownFieldId { id: u8 },

    #[error("field {name:?} has type {expected} but the value is a {actual}")]
    TypeMismatch {
        name: String,
        expected: FieldType,
        actual: FieldType,
    },

    #[error("measurement already holds the maximum of 255 fields")]
    TooManyFields,

    #[error("string value for field {name:?} is {len} bytes, longer than {max}", max = u16::MAX)]
    StringTooLong { name: String, len: usize },

    #[error("field {name:?} holds invalid UTF-8: {source}")]
    InvalidUtf8 {
        name: String,
        source: std::string::FromUtf8Error,
    },

    #[error("truncated value: {0}")]
    Truncated(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FieldSetError {
    #[error("error reading field set {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error writing field set {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("field set {} is malformed: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Float,
    Integer,
    Boolean,
    String,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::String => "string",
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Float(_) => FieldType::Float,
            Self::Integer(_) => FieldType::Integer,
            Self::Boolean(_) => FieldType::Boolean,
            Self::String(_) => FieldType::String,
        }
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// A single field definition of a measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: u8,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// The fields defined for one measurement, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementFields {
    pub fields: Vec<Field>,
}

impl MeasurementFields {
    /// Returns the field called `name`, creating it with the next free id if
    /// it does not exist yet.
    pub fn create_field_if_not_exists(
        &mut self,
        name: &str,
        field_type: FieldType,
    ) -> Result<&Field, CodecError> {
        if let Some(idx) = self.fields.iter().position(|f| f.name == name) {
            let field = &self.fields[idx];
            if field.field_type != field_type {
                return Err(CodecError::TypeMismatch {
                    name: name.into(),
                    expected: field.field_type,
                    actual: field_type,
                });
            }
            return Ok(field);
        }

        if self.fields.len() >= MAX_FIELDS {
            return Err(CodecError::TooManyFields);
        }
        self.fields.push(Field {
            id: self.fields.len() as u8 + 1,
            name: name.into(),
            field_type,
        });
        Ok(self.fields.last().expect("field was just pushed"))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_id(&self, id: u8) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Measurement name to field definitions for every measurement in a shard.
///
/// Persisted as JSON next to the shard's data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementFieldSet(BTreeMap<String, MeasurementFields>);

impl MeasurementFieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, measurement: &str) -> Option<&MeasurementFields> {
        self.0.get(measurement)
    }

    pub fn entry(&mut self, measurement: &str) -> &mut MeasurementFields {
        self.0.entry(measurement.to_string()).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MeasurementFields)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A codec for `measurement`, if the set knows its fields.
    pub fn codec(&self, measurement: &str) -> Option<FieldCodec> {
        self.get(measurement).map(|fields| FieldCodec::new(fields.clone()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FieldSetError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| FieldSetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_slice(&bytes).map_err(|source| FieldSetError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FieldSetError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_vec()).map_err(|source| FieldSetError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("field sets always serialize")
    }
}

/// Encodes and decodes point values for a single measurement.
#[derive(Debug, Clone)]
pub struct FieldCodec {
    fields: MeasurementFields,
}

impl FieldCodec {
    pub fn new(fields: MeasurementFields) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &MeasurementFields {
        &self.fields
    }

    pub fn encode_fields(&self, values: &BTreeMap<String, FieldValue>) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(values.len() * 9);
        for (name, value) in values {
            let field = self
                .fields
                .field(name)
                .ok_or_else(|| CodecError::UnknownField { name: name.clone() })?;
            if field.field_type != value.field_type() {
                return Err(CodecError::TypeMismatch {
                    name: name.clone(),
                    expected: field.field_type,
                    actual: value.field_type(),
                });
            }

            buf.push(field.id);
            match value {
                FieldValue::Float(v) => buf.write_f64::<BigEndian>(*v)?,
                FieldValue::Integer(v) => buf.write_i64::<BigEndian>(*v)?,
                FieldValue::Boolean(v) => buf.push(u8::from(*v)),
                FieldValue::String(v) => {
                    let len = u16::try_from(v.len()).map_err(|_| CodecError::StringTooLong {
                        name: name.clone(),
                        len: v.len(),
                    })?;
                    buf.write_u16::<BigEndian>(len)?;
                    buf.extend_from_slice(v.as_bytes());
                }
            }
        }
        Ok(buf)
    }

    /// Decode an encoded value into its named fields.
    pub fn decode_fields_with_names(
        &self,
        bytes: &[u8],
    ) -> Result<BTreeMap<String, FieldValue>, CodecError> {
        let mut r = Cursor::new(bytes);
        let mut values = BTreeMap::new();

        while (r.position() as usize) < bytes.len() {
            let id = r.read_u8()?;
            let field = self
                .fields
                .field_by_id(id)
                .ok_or(CodecError::UnknownFieldId { id })?;

            let value = match field.field_type {
                FieldType::Float => FieldValue::Float(r.read_f64::<BigEndian>()?),
                FieldType::Integer => FieldValue::Integer(r.read_i64::<BigEndian>()?),
                FieldType::Boolean => FieldValue::Boolean(r.read_u8()? != 0),
                FieldType::String => {
                    let len = r.read_u16::<BigEndian>()? as usize;
                    let mut raw = vec![0; len];
                    r.read_exact(&mut raw)?;
                    let s = String::from_utf8(raw).map_err(|source| CodecError::InvalidUtf8 {
                        name: field.name.clone(),
                        source,
                    })?;
                    FieldValue::String(s)
                }
            };
            values.insert(field.name.clone(), value);
        }

        Ok(values)
    }
}
