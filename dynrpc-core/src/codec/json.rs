use super::CodecError;
use prost_reflect::{
    DeserializeOptions, DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor,
    ReflectMessage, SerializeOptions, Value as ProtoValue,
};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Messages with a dedicated JSON representation. Their JSON form is not an object of fields,
/// so field-level checks stop at their boundary.
const WELL_KNOWN_TYPES: &[&str] = &[
    "google.protobuf.Any",
    "google.protobuf.BoolValue",
    "google.protobuf.BytesValue",
    "google.protobuf.DoubleValue",
    "google.protobuf.Duration",
    "google.protobuf.FieldMask",
    "google.protobuf.FloatValue",
    "google.protobuf.Int32Value",
    "google.protobuf.Int64Value",
    "google.protobuf.ListValue",
    "google.protobuf.StringValue",
    "google.protobuf.Struct",
    "google.protobuf.Timestamp",
    "google.protobuf.UInt32Value",
    "google.protobuf.UInt64Value",
    "google.protobuf.Value",
];

const ROOT: &str = "<root>";

/// Knobs for the JSON mapping. Everything is off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonOptions {
    /// Silently drop JSON fields the descriptor does not define instead of failing.
    pub allow_unknown_fields: bool,
    /// Emit unset scalar, repeated and map fields with their zero value.
    pub emit_defaults: bool,
    /// Emit the original proto field names instead of lowerCamelCase JSON names.
    pub use_proto_field_names: bool,
    /// Emit enum numbers that have no symbolic name instead of failing.
    pub tolerate_unknown_enums: bool,
}

impl JsonOptions {
    pub fn allow_unknown_fields(mut self, yes: bool) -> Self {
        self.allow_unknown_fields = yes;
        self
    }

    pub fn emit_defaults(mut self, yes: bool) -> Self {
        self.emit_defaults = yes;
        self
    }

    pub fn use_proto_field_names(mut self, yes: bool) -> Self {
        self.use_proto_field_names = yes;
        self
    }

    pub fn tolerate_unknown_enums(mut self, yes: bool) -> Self {
        self.tolerate_unknown_enums = yes;
        self
    }

    fn key_for<'a>(&self, field: &'a FieldDescriptor) -> &'a str {
        if self.use_proto_field_names {
            field.name()
        } else {
            field.json_name()
        }
    }
}

/// Parses JSON text into a message of type `desc`.
pub fn from_json(
    desc: MessageDescriptor,
    json: &str,
    options: &JsonOptions,
) -> Result<DynamicMessage, CodecError> {
    let value: Value = serde_json::from_str(json).map_err(|e| CodecError::JsonParse {
        path: ROOT.to_string(),
        message: e.to_string(),
    })?;

    from_json_value(desc, value, options)
}

/// Builds a message of type `desc` from an already parsed JSON value.
pub fn from_json_value(
    desc: MessageDescriptor,
    mut value: Value,
    options: &JsonOptions,
) -> Result<DynamicMessage, CodecError> {
    normalize_message(&desc, &mut value, "", options)?;

    // Unknown names were already rejected or dropped above.
    let deserialize_options = DeserializeOptions::new().deny_unknown_fields(true);

    let mut track = serde_path_to_error::Track::new();
    let deserializer = serde_path_to_error::Deserializer::new(value, &mut track);

    DynamicMessage::deserialize_with_options(desc, deserializer, &deserialize_options).map_err(
        |e| CodecError::JsonParse {
            path: display_path(&track.path().to_string()),
            message: e.to_string(),
        },
    )
}

/// Renders a message as compact JSON text.
pub fn to_json(message: &DynamicMessage, options: &JsonOptions) -> Result<String, CodecError> {
    let value = to_json_value(message, options)?;
    serde_json::to_string(&value).map_err(|e| CodecError::JsonEncode {
        message: e.to_string(),
    })
}

/// Renders a message as a JSON value.
pub fn to_json_value(message: &DynamicMessage, options: &JsonOptions) -> Result<Value, CodecError> {
    if !options.tolerate_unknown_enums {
        check_enums(message, "")?;
    }

    let serialize_options = SerializeOptions::new()
        .stringify_64_bit_integers(true)
        .use_enum_numbers(false)
        .use_proto_field_name(options.use_proto_field_names)
        .skip_default_fields(!options.emit_defaults);

    let mut value = message
        .serialize_with_options(serde_json::value::Serializer, &serialize_options)
        .map_err(|e| CodecError::JsonEncode {
            message: e.to_string(),
        })?;

    if options.emit_defaults {
        prune_unset(message, &mut value, options);
    }

    Ok(value)
}

fn is_well_known(desc: &MessageDescriptor) -> bool {
    WELL_KNOWN_TYPES.contains(&desc.full_name())
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn display_path(path: &str) -> String {
    match path.trim_start_matches('.') {
        "" => ROOT.to_string(),
        path => path.to_string(),
    }
}

/// Checks field names against the descriptor and resolves oneof groups, recursing into
/// message-typed fields. Type mismatches are left for the deserializer to report.
fn normalize_message(
    desc: &MessageDescriptor,
    value: &mut Value,
    path: &str,
    options: &JsonOptions,
) -> Result<(), CodecError> {
    if is_well_known(desc) {
        return Ok(());
    }
    let Value::Object(object) = value else {
        return Ok(());
    };

    let mut dropped = Vec::new();
    // oneof full name -> JSON key of the member written last
    let mut oneof_writers: HashMap<String, String> = HashMap::new();

    for (key, entry) in object.iter_mut() {
        let field_path = child_path(path, key);

        let Some(field) = desc
            .get_field_by_name(key)
            .or_else(|| desc.get_field_by_json_name(key))
        else {
            if options.allow_unknown_fields {
                dropped.push(key.clone());
                continue;
            }
            return Err(CodecError::UnknownField { path: field_path });
        };

        if let Some(oneof) = field.containing_oneof()
            && !is_unset_marker(&field, entry)
            && let Some(previous) = oneof_writers.insert(oneof.full_name().to_string(), key.clone())
        {
            dropped.push(previous);
        }

        normalize_field(&field, entry, &field_path, options)?;
    }

    for key in dropped {
        object.remove(&key);
    }

    Ok(())
}

fn normalize_field(
    field: &FieldDescriptor,
    value: &mut Value,
    path: &str,
    options: &JsonOptions,
) -> Result<(), CodecError> {
    let Kind::Message(message) = field.kind() else {
        return Ok(());
    };

    if field.is_map() {
        let value_field = message.map_entry_value_field();
        if let (Kind::Message(inner), Value::Object(entries)) = (value_field.kind(), value) {
            for (key, item) in entries.iter_mut() {
                normalize_message(&inner, item, &child_path(path, key), options)?;
            }
        }
    } else if field.is_list() {
        if let Value::Array(items) = value {
            for (index, item) in items.iter_mut().enumerate() {
                normalize_message(&message, item, &format!("{path}[{index}]"), options)?;
            }
        }
    } else {
        normalize_message(&message, value, path, options)?;
    }

    Ok(())
}

/// `null` leaves a field unset, except for `google.protobuf.Value` where it is a real value.
fn is_unset_marker(field: &FieldDescriptor, value: &Value) -> bool {
    value.is_null()
        && !matches!(field.kind(), Kind::Message(m) if m.full_name() == "google.protobuf.Value")
}

fn check_enums(message: &DynamicMessage, path: &str) -> Result<(), CodecError> {
    for (field, value) in message.fields() {
        check_enum_value(&field.kind(), value, &child_path(path, field.name()))?;
    }
    Ok(())
}

fn check_enum_value(kind: &Kind, value: &ProtoValue, path: &str) -> Result<(), CodecError> {
    match (kind, value) {
        (Kind::Enum(desc), ProtoValue::EnumNumber(number)) => {
            if desc.get_value(*number).is_none() {
                return Err(CodecError::UnknownEnumValue {
                    path: path.to_string(),
                    value: *number,
                });
            }
        }
        (Kind::Message(_), ProtoValue::Message(inner)) => check_enums(inner, path)?,
        (Kind::Message(entry), ProtoValue::Map(entries)) => {
            let value_kind = entry.map_entry_value_field().kind();
            for (key, item) in entries {
                check_enum_value(&value_kind, item, &child_path(path, &map_key_string(key)))?;
            }
        }
        (kind, ProtoValue::List(items)) => {
            for (index, item) in items.iter().enumerate() {
                check_enum_value(kind, item, &format!("{path}[{index}]"))?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Removes fields that track presence but were never set. Emitting defaults only concerns
/// fields without presence; an unset message field stays absent.
fn prune_unset(message: &DynamicMessage, value: &mut Value, options: &JsonOptions) {
    let desc = message.descriptor();
    if is_well_known(&desc) {
        return;
    }
    let Value::Object(object) = value else {
        return;
    };

    for field in desc.fields() {
        let key = options.key_for(&field);

        if !message.has_field(&field) {
            if field.supports_presence() {
                object.remove(key);
            }
            continue;
        }

        if let Some(json) = object.get_mut(key) {
            prune_nested(&message.get_field(&field), json, options);
        }
    }
}

fn prune_nested(value: &ProtoValue, json: &mut Value, options: &JsonOptions) {
    match (value, json) {
        (ProtoValue::Message(inner), json) => prune_unset(inner, json, options),
        (ProtoValue::List(items), Value::Array(array)) => {
            for (item, json) in items.iter().zip(array.iter_mut()) {
                prune_nested(item, json, options);
            }
        }
        (ProtoValue::Map(entries), Value::Object(object)) => prune_map(entries, object, options),
        _ => {}
    }
}

fn prune_map(
    entries: &HashMap<MapKey, ProtoValue>,
    object: &mut Map<String, Value>,
    options: &JsonOptions,
) {
    for (key, item) in entries {
        if let Some(json) = object.get_mut(&map_key_string(key)) {
            prune_nested(item, json, options);
        }
    }
}

/// The JSON object key protobuf uses for a map key.
fn map_key_string(key: &MapKey) -> String {
    match key {
        MapKey::Bool(v) => v.to_string(),
        MapKey::I32(v) => v.to_string(),
        MapKey::I64(v) => v.to_string(),
        MapKey::U32(v) => v.to_string(),
        MapKey::U64(v) => v.to_string(),
        MapKey::String(v) => v.clone(),
    }
}
