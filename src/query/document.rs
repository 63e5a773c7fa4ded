//! Request document: the in-memory description of one logical operation.
//!
//! A document accumulates builder state and serializes to the schema-less
//! wire shape the server expects (`request`, `table`, `filters`, ...).
//! Exactly one operation per document; the payload fields used depend on
//! the operation kind.

use serde_json::{json, Map, Value};

use super::filter::FilterNode;
use crate::error::Result;

/// Operation kind carried in the `request` wire key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Count,
    Insert,
    Update,
    Replace,
    Destroy,
    DeleteKey,
    ListTables,
    CreateTable,
    DropTable,
    RenameTable,
    Authenticate,
}

impl Operation {
    /// The operation name as written on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Count => "count",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Replace => "replace",
            Operation::Destroy => "destroy",
            Operation::DeleteKey => "deleteKey",
            Operation::ListTables => "listTables",
            Operation::CreateTable => "createTable",
            Operation::DropTable => "dropTable",
            Operation::RenameTable => "renameTable",
            Operation::Authenticate => "authenticate",
        }
    }
}

/// Sort direction for an `order` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One logical request before serialization.
///
/// Created empty when a fluent chain starts or after `queue`, mutated in
/// place by builder calls, consumed by `run`.
#[derive(Debug, Clone, Default)]
pub struct RequestDocument {
    pub(crate) operation: Option<Operation>,
    pub(crate) table: Option<String>,
    pub(crate) id: Option<Value>,
    pub(crate) projection: Option<Value>,
    pub(crate) filter: Option<FilterNode>,
    pub(crate) includes: Vec<Value>,
    pub(crate) order: Vec<Value>,
    pub(crate) limit: Option<u64>,
    pub(crate) rows: Option<Vec<Value>>,
    pub(crate) data: Option<Value>,
    pub(crate) key: Option<String>,
    pub(crate) table_name: Option<String>,
    pub(crate) old_table_name: Option<String>,
    pub(crate) new_table_name: Option<String>,
    pub(crate) table_type: Option<String>,
    pub(crate) label: Option<String>,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    /// Local-only filters evaluated against fetched rows after decode.
    pub(crate) prefilters: Vec<FilterNode>,
}

impl RequestDocument {
    /// Whether no builder call has touched this document yet. Every field
    /// counts; a document holding nothing but a `limit` or an include is
    /// still a document.
    pub fn is_empty(&self) -> bool {
        self.operation.is_none()
            && self.table.is_none()
            && self.id.is_none()
            && self.projection.is_none()
            && self.filter.is_none()
            && self.includes.is_empty()
            && self.order.is_empty()
            && self.limit.is_none()
            && self.rows.is_none()
            && self.data.is_none()
            && self.key.is_none()
            && self.table_name.is_none()
            && self.old_table_name.is_none()
            && self.new_table_name.is_none()
            && self.table_type.is_none()
            && self.label.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.prefilters.is_empty()
    }

    /// Stamp the operation kind. Last write wins; validating a double set
    /// is the caller's responsibility.
    pub(crate) fn set_operation(&mut self, op: Operation) {
        self.operation = Some(op);
    }

    /// Append a compiled filter with implicit AND accumulation.
    pub(crate) fn push_filter(&mut self, node: FilterNode) {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and_with(node),
            None => node,
        });
    }

    /// Append an order entry. `true` means ascending.
    pub(crate) fn push_order(&mut self, field: &str, direction: Direction) {
        self.order
            .push(json!({ field: direction == Direction::Ascending }));
    }

    /// A projection given as a sequence of names expands to an inclusion
    /// map; a map passes through (supporting renames and nesting).
    pub(crate) fn set_projection(&mut self, spec: Value) {
        self.projection = Some(match spec {
            Value::Array(names) => {
                let mut map = Map::new();
                for name in names {
                    if let Value::String(name) = name {
                        map.insert(name, Value::Bool(true));
                    }
                }
                Value::Object(map)
            }
            other => other,
        });
    }

    /// Serialize to the wire shape.
    ///
    /// # Errors
    ///
    /// Fails if the wire filter contains a local-only predicate node.
    pub fn to_wire(&self) -> Result<Value> {
        let mut map = Map::new();

        if let Some(op) = self.operation {
            map.insert("request".to_string(), json!(op.wire_name()));
        }
        if let Some(table) = &self.table {
            map.insert("table".to_string(), json!(table));
        }
        if let Some(id) = &self.id {
            map.insert("id".to_string(), id.clone());
        }
        if let Some(projection) = &self.projection {
            map.insert("fields".to_string(), projection.clone());
        }
        if let Some(filter) = &self.filter {
            map.insert("filters".to_string(), filter.to_wire()?);
        }
        if !self.includes.is_empty() {
            map.insert("includes".to_string(), Value::Array(self.includes.clone()));
        }
        if !self.order.is_empty() {
            map.insert("order".to_string(), Value::Array(self.order.clone()));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".to_string(), json!(limit));
        }
        if let Some(rows) = &self.rows {
            map.insert("rows".to_string(), Value::Array(rows.clone()));
        }
        if let Some(data) = &self.data {
            map.insert("data".to_string(), data.clone());
        }
        if let Some(key) = &self.key {
            map.insert("key".to_string(), json!(key));
        }
        if let Some(name) = &self.table_name {
            map.insert("tableName".to_string(), json!(name));
        }
        if let Some(name) = &self.old_table_name {
            map.insert("oldTableName".to_string(), json!(name));
        }
        if let Some(name) = &self.new_table_name {
            map.insert("newTableName".to_string(), json!(name));
        }
        if let Some(ty) = &self.table_type {
            map.insert("type".to_string(), json!(ty));
        }
        if let Some(label) = &self.label {
            map.insert("requestName".to_string(), json!(label));
        }
        if let Some(username) = &self.username {
            map.insert("username".to_string(), json!(username));
        }
        if let Some(password) = &self.password {
            map.insert("password".to_string(), json!(password));
        }

        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compile;

    #[test]
    fn test_empty_document() {
        let doc = RequestDocument::default();
        assert!(doc.is_empty());
        assert_eq!(doc.to_wire().unwrap(), json!({}));
    }

    #[test]
    fn test_any_single_field_marks_document_non_empty() {
        let mut doc = RequestDocument::default();
        doc.limit = Some(5);
        assert!(!doc.is_empty());

        let mut doc = RequestDocument::default();
        doc.includes.push(json!({"band": "bands"}));
        assert!(!doc.is_empty());

        let mut doc = RequestDocument::default();
        doc.set_projection(json!(["fruit"]));
        assert!(!doc.is_empty());

        let mut doc = RequestDocument::default();
        doc.push_order("fruit", Direction::Ascending);
        assert!(!doc.is_empty());

        let mut doc = RequestDocument::default();
        doc.id = Some(json!("apple"));
        assert!(!doc.is_empty());

        let mut doc = RequestDocument::default();
        doc.key = Some("stale".to_string());
        assert!(!doc.is_empty());
    }

    #[test]
    fn test_get_document() {
        let mut doc = RequestDocument::default();
        doc.table = Some("fruits".to_string());
        doc.set_operation(Operation::Get);
        doc.id = Some(json!("apple"));

        assert_eq!(
            doc.to_wire().unwrap(),
            json!({"request": "get", "table": "fruits", "id": "apple"})
        );
    }

    #[test]
    fn test_projection_sequence_expands_to_inclusion_map() {
        let mut doc = RequestDocument::default();
        doc.set_projection(json!(["fruit", "size"]));
        assert_eq!(
            doc.projection,
            Some(json!({"fruit": true, "size": true}))
        );
    }

    #[test]
    fn test_projection_map_passes_through() {
        let mut doc = RequestDocument::default();
        doc.set_projection(json!({"fruit": "name", "about": {"model": true}}));
        assert_eq!(
            doc.projection,
            Some(json!({"fruit": "name", "about": {"model": true}}))
        );
    }

    #[test]
    fn test_filter_accumulates_with_implicit_and() {
        let mut doc = RequestDocument::default();
        doc.push_filter(compile(&json!({"size": "Medium"})).unwrap());
        doc.push_filter(compile(&json!({"color": "Red"})).unwrap());

        let wire = doc.to_wire().unwrap();
        assert_eq!(
            wire["filters"],
            json!({
                "size": {"__operator": "==", "__value": "Medium"},
                "color": {"__operator": "==", "__value": "Red"}
            })
        );
    }

    #[test]
    fn test_order_accumulates_in_sequence() {
        let mut doc = RequestDocument::default();
        doc.push_order("published", Direction::Ascending);
        doc.push_order("name", Direction::Descending);

        assert_eq!(
            doc.to_wire().unwrap()["order"],
            json!([{"published": true}, {"name": false}])
        );
    }

    #[test]
    fn test_rename_table_document() {
        let mut doc = RequestDocument::default();
        doc.set_operation(Operation::RenameTable);
        doc.old_table_name = Some("fruits".to_string());
        doc.new_table_name = Some("produce".to_string());

        assert_eq!(
            doc.to_wire().unwrap(),
            json!({
                "request": "renameTable",
                "oldTableName": "fruits",
                "newTableName": "produce"
            })
        );
    }

    #[test]
    fn test_create_table_with_type_option() {
        let mut doc = RequestDocument::default();
        doc.set_operation(Operation::CreateTable);
        doc.table_name = Some("users".to_string());
        doc.table_type = Some("memory".to_string());

        assert_eq!(
            doc.to_wire().unwrap(),
            json!({"request": "createTable", "tableName": "users", "type": "memory"})
        );
    }

    #[test]
    fn test_label_serializes_as_request_name() {
        let mut doc = RequestDocument::default();
        doc.set_operation(Operation::ListTables);
        doc.label = Some("first".to_string());

        assert_eq!(
            doc.to_wire().unwrap(),
            json!({"request": "listTables", "requestName": "first"})
        );
    }
}
