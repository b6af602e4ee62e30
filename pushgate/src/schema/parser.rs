//! Textual schema definition parser.
//!
//! Each level of a definition is an object whose keys follow one of two shapes:
//! `message <Name>` (a nested sub-schema) or `<required|optional|repeated> <type> <name>`
//! whose value is the wire tag. Anything else is skipped without error.

use crate::schema::{Cardinality, FieldDef, MessageSchema, Result, SchemaError, SchemaTable};
use serde_json::{Map, Value};
use tracing::debug;

const COMPONENT: &str = "schema_parser";

/// Synthetic correlation field injected into push-message bodies.
pub const MSG_ID_FIELD: &str = "msgID";
const MSG_ID_DEFINITION: &str = "optional uInt32 msgID";

/// `a.b.c` handler routes and `message Name` definitions are not push bodies.
pub(crate) fn is_qualified_key(key: &str) -> bool {
    key.split('.').count() == 3 || key.split(' ').count() == 2
}

pub fn parse_schema(raw: &Value) -> Result<SchemaTable> {
    let Some(definitions) = raw.as_object() else {
        return Err(SchemaError::InvalidDefinition(
            "schema root must be an object keyed by route".to_string(),
        ));
    };

    let mut table = SchemaTable::default();
    for (key, definition) in definitions {
        let Some(body) = definition.as_object() else {
            debug!(
                component = COMPONENT,
                key = key.as_str(),
                "skipping non-object schema entry"
            );
            continue;
        };

        let schema = if is_qualified_key(key) {
            parse_object(body)
        } else {
            let mut body = body.clone();
            let tag = body.len() as u64 + 1;
            body.insert(MSG_ID_DEFINITION.to_string(), Value::from(tag));
            parse_object(&body)
        };
        table.insert(key.clone(), schema);
    }
    Ok(table)
}

fn parse_object(body: &Map<String, Value>) -> MessageSchema {
    let mut schema = MessageSchema::default();

    for (entry, value) in body {
        let params: Vec<&str> = entry.split(' ').collect();

        if params[0] == "message" {
            if params.len() != 2 {
                continue;
            }
            if let Some(nested) = value.as_object() {
                schema
                    .messages
                    .insert(params[1].to_string(), parse_object(nested));
            }
            continue;
        }

        let Some(cardinality) = Cardinality::parse(params[0]) else {
            continue;
        };
        if params.len() != 3 {
            continue;
        }
        let Some(tag) = value.as_u64().and_then(|tag| u32::try_from(tag).ok()) else {
            continue;
        };
        if tag == 0 || schema.tags.contains_key(&tag) || schema.fields.contains_key(params[2]) {
            debug!(
                component = COMPONENT,
                entry = entry.as_str(),
                tag,
                "skipping duplicate field definition"
            );
            continue;
        }

        schema.fields.insert(
            params[2].to_string(),
            FieldDef {
                cardinality,
                type_name: params[1].to_string(),
                tag,
            },
        );
        schema.tags.insert(tag, params[2].to_string());
    }
    schema
}
