use crate::{
    error::InternalError,
    value::{EntityId, Value},
};
use serde::{Deserialize, Serialize};

///
/// Row
///
/// Ordered named values for one entity instance. Field order follows the
/// caller's construction order; lookups are by name.
///

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    values: Vec<(String, Value)>,
}

impl Row {
    #[must_use]
    pub const fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Append or overwrite a field value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field value, replacing any previous value for the same name.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();

        if let Some(slot) = self.values.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.values.push((name, value));
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    /// Look up a field that must be present, for `from_row` decoders.
    pub fn try_get(&self, name: &str) -> Result<&Value, InternalError> {
        self.get(name).ok_or_else(|| {
            InternalError::serialize_internal(format!("row is missing field '{name}'"))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Primary-key value, when present and id-typed.
    #[must_use]
    pub fn id(&self, primary_key: &str) -> Option<EntityId> {
        self.get(primary_key).and_then(Value::as_ulid)
    }
}

///
/// RowEnvelope
///
/// Stored form of a row: payload plus the optimistic-concurrency version.
/// Versions start at 1 on first insert and increase by 1 per committed save.
///

#[derive(Clone, Debug, PartialEq)]
pub struct RowEnvelope {
    pub version: u64,
    pub row: Row,
}

impl RowEnvelope {
    #[must_use]
    pub const fn new(version: u64, row: Row) -> Self {
        Self { version, row }
    }
}

/// Encode a row payload to its JSON wire form.
pub(crate) fn encode_row(row: &Row) -> Result<Vec<u8>, InternalError> {
    serde_json::to_vec(row)
        .map_err(|err| InternalError::serialize_internal(format!("failed to encode row: {err}")))
}

/// Decode a row payload from its JSON wire form.
pub(crate) fn decode_row(bytes: &[u8]) -> Result<Row, InternalError> {
    serde_json::from_slice(bytes)
        .map_err(|err| InternalError::serialize_internal(format!("failed to decode row: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_existing_field_in_place() {
        let mut row = Row::new().with("name", Value::Text("before".to_string()));
        row.set("name", Value::Text("after".to_string()));

        assert_eq!(row.len(), 1);
        assert_eq!(
            row.get("name"),
            Some(&Value::Text("after".to_string())),
            "second set should replace the first value"
        );
    }

    #[test]
    fn wire_round_trip_preserves_field_order() {
        let row = Row::new()
            .with("b", Value::Int(2))
            .with("a", Value::Int(1));

        let bytes = encode_row(&row).expect("encode should succeed");
        let decoded = decode_row(&bytes).expect("decode should succeed");

        assert_eq!(decoded, row);
        let names: Vec<&str> = decoded.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"], "field order is part of the payload");
    }

    #[test]
    fn try_get_reports_missing_field() {
        let row = Row::new();
        let err = row.try_get("ghost").expect_err("missing field should fail");

        assert!(err.message.contains("ghost"));
    }
}
