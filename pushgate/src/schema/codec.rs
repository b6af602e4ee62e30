//! Tag-driven binary encoding of JSON values against a [`SchemaTable`].

use crate::schema::{Cardinality, FieldDef, MessageSchema, Result, SchemaError, SchemaTable};
use crate::wire::{self, Reader, Truncated};
use serde_json::{Map, Value};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LENGTH_DELIMITED: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Deepest message nesting accepted in either direction, the route message included.
pub const MAX_NESTING_DEPTH: usize = 64;

impl From<Truncated> for SchemaError {
    fn from(_: Truncated) -> Self {
        SchemaError::Truncated
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scalar {
    UInt32,
    UInt64,
    Int32,
    Int64,
    SInt32,
    SInt64,
    Bool,
    Float,
    Double,
    String,
}

impl Scalar {
    fn from_type_name(type_name: &str) -> Option<Self> {
        match type_name {
            "uInt32" => Some(Self::UInt32),
            "uInt64" => Some(Self::UInt64),
            "int32" => Some(Self::Int32),
            "int64" => Some(Self::Int64),
            "sInt32" => Some(Self::SInt32),
            "sInt64" => Some(Self::SInt64),
            "bool" => Some(Self::Bool),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    fn wire_type(self) -> u8 {
        match self {
            Self::Float => WIRE_FIXED32,
            Self::Double => WIRE_FIXED64,
            Self::String => WIRE_LENGTH_DELIMITED,
            _ => WIRE_VARINT,
        }
    }

    fn packable(self) -> bool {
        self != Self::String
    }

    fn expected(self) -> &'static str {
        match self {
            Self::UInt32 => "an unsigned 32-bit integer",
            Self::UInt64 => "an unsigned 64-bit integer",
            Self::Int32 | Self::SInt32 => "a signed 32-bit integer",
            Self::Int64 | Self::SInt64 => "a signed 64-bit integer",
            Self::Bool => "a boolean",
            Self::Float | Self::Double => "a number",
            Self::String => "a string",
        }
    }
}

enum FieldKind<'a> {
    Scalar(Scalar),
    Message(&'a MessageSchema),
}

/// Nested lookups search enclosing schemas innermost first, then shared top-level messages.
fn resolve_kind<'a>(
    table: &'a SchemaTable,
    scopes: &[&'a MessageSchema],
    field_name: &str,
    field: &FieldDef,
) -> Result<FieldKind<'a>> {
    if let Some(scalar) = Scalar::from_type_name(&field.type_name) {
        return Ok(FieldKind::Scalar(scalar));
    }
    scopes
        .iter()
        .rev()
        .copied()
        .find_map(|scope| scope.messages.get(&field.type_name))
        .or_else(|| table.shared_message(&field.type_name))
        .map(FieldKind::Message)
        .ok_or_else(|| SchemaError::UnknownType {
            field: field_name.to_string(),
            type_name: field.type_name.clone(),
        })
}

fn mismatch(field: &str, expected: &str) -> SchemaError {
    SchemaError::TypeMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
    }
}

fn write_key(out: &mut Vec<u8>, tag: u32, wire_type: u8) {
    wire::write_varint(out, (u64::from(tag) << 3) | u64::from(wire_type));
}

pub(crate) fn encode(table: &SchemaTable, route: &str, value: &Value) -> Result<Vec<u8>> {
    let schema = table
        .get(route)
        .ok_or_else(|| SchemaError::UnknownRoute(route.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| mismatch(route, "an object"))?;

    let mut out = Vec::new();
    let mut scopes = Vec::new();
    encode_message(table, &mut scopes, schema, object, &mut out)?;
    Ok(out)
}

fn encode_message<'a>(
    table: &'a SchemaTable,
    scopes: &mut Vec<&'a MessageSchema>,
    schema: &'a MessageSchema,
    object: &Map<String, Value>,
    out: &mut Vec<u8>,
) -> Result<()> {
    if scopes.len() >= MAX_NESTING_DEPTH {
        return Err(SchemaError::TooDeep(MAX_NESTING_DEPTH));
    }
    scopes.push(schema);
    for (name, field) in &schema.fields {
        let value = match object.get(name) {
            Some(Value::Null) | None => {
                if field.cardinality == Cardinality::Required {
                    return Err(SchemaError::MissingRequired(name.clone()));
                }
                continue;
            }
            Some(value) => value,
        };

        let kind = resolve_kind(table, scopes, name, field)?;
        match field.cardinality {
            Cardinality::Repeated => {
                let items = value
                    .as_array()
                    .ok_or_else(|| mismatch(name, "an array"))?;
                encode_repeated(table, scopes, name, field.tag, &kind, items, out)?;
            }
            _ => encode_single(table, scopes, name, field.tag, &kind, value, out)?,
        }
    }
    scopes.pop();
    Ok(())
}

fn encode_repeated<'a>(
    table: &'a SchemaTable,
    scopes: &mut Vec<&'a MessageSchema>,
    name: &str,
    tag: u32,
    kind: &FieldKind<'a>,
    items: &[Value],
    out: &mut Vec<u8>,
) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    match kind {
        FieldKind::Scalar(scalar) if scalar.packable() => {
            let mut packed = Vec::new();
            for item in items {
                encode_scalar(name, *scalar, item, &mut packed)?;
            }
            write_key(out, tag, WIRE_LENGTH_DELIMITED);
            wire::write_varint(out, packed.len() as u64);
            out.extend_from_slice(&packed);
        }
        _ => {
            for item in items {
                encode_single(table, scopes, name, tag, kind, item, out)?;
            }
        }
    }
    Ok(())
}

fn encode_single<'a>(
    table: &'a SchemaTable,
    scopes: &mut Vec<&'a MessageSchema>,
    name: &str,
    tag: u32,
    kind: &FieldKind<'a>,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<()> {
    match kind {
        FieldKind::Scalar(scalar) => {
            write_key(out, tag, scalar.wire_type());
            encode_scalar(name, *scalar, value, out)
        }
        FieldKind::Message(nested) => {
            let object = value
                .as_object()
                .ok_or_else(|| mismatch(name, "an object"))?;
            let mut body = Vec::new();
            encode_message(table, scopes, *nested, object, &mut body)?;
            write_key(out, tag, WIRE_LENGTH_DELIMITED);
            wire::write_varint(out, body.len() as u64);
            out.extend_from_slice(&body);
            Ok(())
        }
    }
}

fn encode_scalar(name: &str, scalar: Scalar, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let fail = || mismatch(name, scalar.expected());
    match scalar {
        Scalar::UInt32 => {
            let v = value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(fail)?;
            wire::write_varint(out, u64::from(v));
        }
        Scalar::UInt64 => wire::write_varint(out, value.as_u64().ok_or_else(fail)?),
        Scalar::Int32 => {
            let v = value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(fail)?;
            wire::write_varint(out, i64::from(v) as u64);
        }
        Scalar::Int64 => wire::write_varint(out, value.as_i64().ok_or_else(fail)? as u64),
        Scalar::SInt32 => {
            let v = value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(fail)?;
            wire::write_varint(out, wire::zigzag_encode(i64::from(v)));
        }
        Scalar::SInt64 => {
            wire::write_varint(out, wire::zigzag_encode(value.as_i64().ok_or_else(fail)?))
        }
        Scalar::Bool => wire::write_varint(out, u64::from(value.as_bool().ok_or_else(fail)?)),
        Scalar::Float => {
            let v = value.as_f64().ok_or_else(fail)? as f32;
            out.extend_from_slice(&v.to_le_bytes());
        }
        Scalar::Double => out.extend_from_slice(&value.as_f64().ok_or_else(fail)?.to_le_bytes()),
        Scalar::String => {
            let s = value.as_str().ok_or_else(fail)?;
            wire::write_varint(out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
    }
    Ok(())
}

pub(crate) fn decode(table: &SchemaTable, route: &str, bytes: &[u8]) -> Result<Value> {
    let schema = table
        .get(route)
        .ok_or_else(|| SchemaError::UnknownRoute(route.to_string()))?;
    let mut scopes = Vec::new();
    decode_message(table, &mut scopes, schema, bytes).map(Value::Object)
}

fn decode_message<'a>(
    table: &'a SchemaTable,
    scopes: &mut Vec<&'a MessageSchema>,
    schema: &'a MessageSchema,
    bytes: &[u8],
) -> Result<Map<String, Value>> {
    if scopes.len() >= MAX_NESTING_DEPTH {
        return Err(SchemaError::TooDeep(MAX_NESTING_DEPTH));
    }
    scopes.push(schema);
    let mut object = Map::new();
    let mut reader = Reader::new(bytes);

    while !reader.is_empty() {
        let key = reader.read_varint()?;
        let wire_type = (key & 0x7) as u8;
        let tag = u32::try_from(key >> 3).map_err(|_| SchemaError::Truncated)?;

        let Some((name, field)) = schema.field_by_tag(tag) else {
            skip_field(&mut reader, wire_type)?;
            continue;
        };
        let kind = resolve_kind(table, scopes, name, field)?;

        if field.cardinality == Cardinality::Repeated {
            let slot = object
                .entry(name.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(items) = slot else {
                return Err(mismatch(name, "an array"));
            };
            match &kind {
                FieldKind::Scalar(scalar)
                    if scalar.packable() && wire_type == WIRE_LENGTH_DELIMITED =>
                {
                    let len = reader.read_varint()? as usize;
                    let mut packed = Reader::new(reader.read_bytes(len)?);
                    while !packed.is_empty() {
                        items.push(decode_scalar(*scalar, &mut packed)?);
                    }
                }
                _ => items.push(decode_single(table, scopes, &kind, &mut reader)?),
            }
        } else {
            let value = decode_single(table, scopes, &kind, &mut reader)?;
            object.insert(name.to_string(), value);
        }
    }

    // Empty repeated fields put nothing on the wire.
    for (name, field) in &schema.fields {
        if field.cardinality == Cardinality::Repeated && !object.contains_key(name) {
            object.insert(name.clone(), Value::Array(Vec::new()));
        }
    }

    scopes.pop();
    Ok(object)
}

fn decode_single<'a>(
    table: &'a SchemaTable,
    scopes: &mut Vec<&'a MessageSchema>,
    kind: &FieldKind<'a>,
    reader: &mut Reader<'_>,
) -> Result<Value> {
    match kind {
        FieldKind::Scalar(scalar) => decode_scalar(*scalar, reader),
        FieldKind::Message(nested) => {
            let len = reader.read_varint()? as usize;
            let body = reader.read_bytes(len)?;
            decode_message(table, scopes, *nested, body).map(Value::Object)
        }
    }
}

fn decode_scalar(scalar: Scalar, reader: &mut Reader<'_>) -> Result<Value> {
    let value = match scalar {
        Scalar::UInt32 | Scalar::UInt64 => Value::from(reader.read_varint()?),
        Scalar::Int32 => Value::from(i64::from(reader.read_varint()? as i64 as i32)),
        Scalar::Int64 => Value::from(reader.read_varint()? as i64),
        Scalar::SInt32 | Scalar::SInt64 => Value::from(wire::zigzag_decode(reader.read_varint()?)),
        Scalar::Bool => Value::from(reader.read_varint()? != 0),
        Scalar::Float => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(reader.read_bytes(4)?);
            Value::from(f64::from(f32::from_le_bytes(raw)))
        }
        Scalar::Double => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(reader.read_bytes(8)?);
            Value::from(f64::from_le_bytes(raw))
        }
        Scalar::String => {
            let len = reader.read_varint()? as usize;
            let bytes = reader.read_bytes(len)?;
            let s = std::str::from_utf8(bytes).map_err(|_| mismatch("string", "valid UTF-8"))?;
            Value::from(s)
        }
    };
    Ok(value)
}

fn skip_field(reader: &mut Reader<'_>, wire_type: u8) -> Result<()> {
    match wire_type {
        WIRE_VARINT => {
            reader.read_varint()?;
        }
        WIRE_FIXED64 => {
            reader.read_bytes(8)?;
        }
        WIRE_LENGTH_DELIMITED => {
            let len = reader.read_varint()? as usize;
            reader.read_bytes(len)?;
        }
        WIRE_FIXED32 => {
            reader.read_bytes(4)?;
        }
        _ => return Err(SchemaError::Truncated),
    }
    Ok(())
}
