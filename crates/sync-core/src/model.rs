//! Row and document types that flow between pipeline components.
//!
//! `Row` is the shape a [`crate::SourceReader`] hands to a
//! [`crate::Transformer`]; `Document` is what a [`crate::SinkWriter`]
//! bulk-upserts. Both are plain, serializable data — no behavior lives
//! here beyond named-field access.

use serde_json::{Map, Value};
use std::fmt;

/// A single source row, addressed only by column name.
///
/// Deliberately exposes no positional indexing: an older draft of this
/// pipeline indexed person records by list position in one place and by
/// key in another, which is the kind of bug this type rules out by
/// construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(Map<String, Value>);

impl Row {
    /// Build a row from a JSON object map, as produced by a source reader.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Returns the raw JSON value for `field`, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns `field` as a string slice.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Returns `field` as an `f64`.
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    /// Returns `field` as a JSON array, if present.
    pub fn get_array(&self, field: &str) -> Option<&Vec<Value>> {
        self.0.get(field).and_then(Value::as_array)
    }

    /// Consumes the row and returns the underlying map.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Row {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A document ready to be bulk-upserted into the search backend.
///
/// `index` and `id` are addressing metadata; `source` is the document
/// body. `id` is always the source entity's stable identifier so
/// re-delivery overwrites idempotently.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub index: String,
    pub id: String,
    pub source: Value,
}

impl Document {
    pub fn new(index: impl Into<String>, id: impl Into<String>, source: Value) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
            source,
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/_doc/{}", self.index, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_row() -> Row {
        let Value::Object(map) = json!({
            "person_id": "p-1",
            "person_name": "X",
            "person_role": "director",
        }) else {
            unreachable!()
        };
        Row::new(map)
    }

    #[test]
    fn named_access_reads_known_fields() {
        let row = sample_row();
        assert_eq!(row.get_str("person_role"), Some("director"));
        assert_eq!(row.get_str("person_name"), Some("X"));
    }

    #[test]
    fn missing_field_is_none_not_panic() {
        let row = sample_row();
        assert_eq!(row.get_str("nonexistent"), None);
    }

    #[test]
    fn document_display_is_index_slash_doc_slash_id() {
        let doc = Document::new("genres", "Drama", json!({"id": "g-1", "name": "Drama"}));
        assert_eq!(doc.to_string(), "genres/_doc/Drama");
    }
}
