//! Fluent query builder.
//!
//! A `Query` accumulates exactly one request document at a time; `queue`
//! moves the current document into a batch list and starts a fresh one, and
//! `run` consumes the builder, sends everything, and awaits the response.
//!
//! Builder calls never fail mid-chain. A filter that does not compile is
//! recorded and reported by `run` before anything reaches the wire.

use std::mem;
use std::sync::Arc;

use serde_json::{json, Value};

use super::document::{Direction, Operation, RequestDocument};
use super::filter::{self, FilterNode};
use crate::client::Client;
use crate::error::{JoedbError, Result};
use crate::response::Response;

/// One fluent chain of builder calls ending in `run`.
///
/// ```no_run
/// # async fn demo(client: joedb_client::Client) -> joedb_client::Result<()> {
/// let response = client
///     .table("fruits")
///     .filter(serde_json::json!({"size": "Medium"}))
///     .order("fruit")
///     .run()
///     .await?;
/// # Ok(()) }
/// ```
pub struct Query {
    client: Client,
    current: RequestDocument,
    queued: Vec<RequestDocument>,
    deferred: Option<JoedbError>,
}

impl Query {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            current: RequestDocument::default(),
            queued: Vec::new(),
            deferred: None,
        }
    }

    fn defer(&mut self, result: Result<()>) {
        if let Err(err) = result {
            // First error wins; later ones are likely cascades.
            self.deferred.get_or_insert(err);
        }
    }

    /// Target table for the current document. The operation defaults to a
    /// row fetch until a later call picks another one.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.current.table = Some(name.into());
        if self.current.operation.is_none() {
            self.current.set_operation(Operation::Get);
        }
        self
    }

    /// Restrict returned columns. Accepts an array of names or a map
    /// supporting renames and nested selection.
    pub fn fields(mut self, spec: Value) -> Self {
        self.current.set_projection(spec);
        self
    }

    /// Add a filter. Repeated calls AND together.
    pub fn filter(mut self, spec: Value) -> Self {
        let result = filter::compile(&spec).map(|node| self.current.push_filter(node));
        self.defer(result);
        self
    }

    /// Add a disjunction of filter specs, ANDed with any existing filter.
    pub fn or_filter<I>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let spec = filter::or(specs);
        let result = filter::compile(&spec).map(|node| self.current.push_filter(node));
        self.defer(result);
        self
    }

    /// Add a filter evaluated locally against the fetched rows instead of
    /// being sent to the server.
    pub fn prefilter(mut self, spec: Value) -> Self {
        let result = filter::compile(&spec).map(|node| self.current.prefilters.push(node));
        self.defer(result);
        self
    }

    /// Add a local row predicate on one field. The closure sees the field's
    /// value and the row is kept when it returns true. Rows missing the
    /// field are dropped.
    pub fn prefilter_fn<F>(mut self, field: impl Into<String>, test: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.current.prefilters.push(FilterNode::Predicate {
            field: field.into(),
            test: Arc::new(test),
        });
        self
    }

    /// Join rows from a related table into each result row.
    pub fn include(mut self, spec: Value) -> Self {
        self.current.includes.push(spec);
        self
    }

    /// Fetch rows. With an id, fetches that row; filters narrow the rest.
    pub fn get(mut self, id: impl Into<Value>) -> Self {
        self.current.set_operation(Operation::Get);
        let id = id.into();
        if !id.is_null() {
            self.current.id = Some(id);
        }
        self
    }

    /// Fetch every row the filters allow.
    pub fn get_all(mut self) -> Self {
        self.current.set_operation(Operation::Get);
        self
    }

    /// Count matching rows instead of returning them.
    pub fn count(mut self) -> Self {
        self.current.set_operation(Operation::Count);
        self
    }

    /// Sort ascending by a field. Repeated calls add tiebreakers in order.
    pub fn order(mut self, field: &str) -> Self {
        self.current.push_order(field, Direction::Ascending);
        self
    }

    /// Sort by a field with an explicit direction.
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.current.push_order(field, direction);
        self
    }

    /// Cap the number of returned rows.
    pub fn limit(mut self, n: u64) -> Self {
        self.current.limit = Some(n);
        self
    }

    /// Insert one row (an object) or several (an array of objects).
    pub fn insert(mut self, rows: Value) -> Self {
        self.current.set_operation(Operation::Insert);
        self.current.rows = Some(match rows {
            Value::Array(rows) => rows,
            single => vec![single],
        });
        self
    }

    /// Merge fields into every matching row. A `null` field value removes
    /// that field from the row.
    pub fn update(mut self, data: Value) -> Self {
        self.current.set_operation(Operation::Update);
        self.current.data = Some(data);
        self
    }

    /// Replace every matching row wholesale with `data`.
    pub fn replace(mut self, data: Value) -> Self {
        self.current.set_operation(Operation::Replace);
        self.current.data = Some(data);
        self
    }

    /// Delete every matching row.
    pub fn destroy(mut self) -> Self {
        self.current.set_operation(Operation::Destroy);
        self
    }

    /// Remove one field from every matching row.
    pub fn delete_key(mut self, key: impl Into<String>) -> Self {
        self.current.set_operation(Operation::DeleteKey);
        self.current.key = Some(key.into());
        self
    }

    /// List table names.
    pub fn list_tables(mut self) -> Self {
        self.current.set_operation(Operation::ListTables);
        self
    }

    /// Create a table. Combine with [`table_type`](Self::table_type) to
    /// choose the storage kind.
    pub fn create_table(mut self, name: impl Into<String>) -> Self {
        self.current.set_operation(Operation::CreateTable);
        self.current.table_name = Some(name.into());
        self
    }

    /// Storage kind for `create_table`, e.g. `"memory"` or `"disk"`.
    pub fn table_type(mut self, kind: impl Into<String>) -> Self {
        self.current.table_type = Some(kind.into());
        self
    }

    /// Drop a table.
    pub fn drop_table(mut self, name: impl Into<String>) -> Self {
        self.current.set_operation(Operation::DropTable);
        self.current.table_name = Some(name.into());
        self
    }

    /// Rename a table.
    pub fn rename_table(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.current.set_operation(Operation::RenameTable);
        self.current.old_table_name = Some(old.into());
        self.current.new_table_name = Some(new.into());
        self
    }

    /// Name the current document so its slot in a batch response is easy to
    /// find (serialized as `requestName`).
    pub fn label(mut self, name: impl Into<String>) -> Self {
        self.current.label = Some(name.into());
        self
    }

    /// Park the current document in the batch and start a fresh one. All
    /// queued documents go to the server in one envelope when `run` is
    /// called, and the response carries one entry per document in the same
    /// order.
    pub fn queue(mut self) -> Self {
        let doc = mem::take(&mut self.current);
        self.queued.push(doc);
        self
    }

    /// Send everything and await the response.
    ///
    /// A single un-queued document goes out as-is. Once anything has been
    /// queued, the whole batch goes out as a `{"requests": [...]}` envelope
    /// even when the batch holds only one document, so the response keeps
    /// the positional `responses` shape. The current document joins the
    /// batch first unless no builder call ever touched it (so
    /// `…queue().run()` sends exactly the queued documents, without a
    /// trailing empty request).
    ///
    /// # Errors
    ///
    /// Surfaces the first filter compile error recorded during the chain,
    /// plus any transport or serialization failure.
    pub async fn run(mut self) -> Result<Response> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        let (envelope, prefilters) = self.build_envelope()?;
        self.client.dispatch(envelope, prefilters).await
    }

    fn build_envelope(&mut self) -> Result<(Value, Vec<Vec<FilterNode>>)> {
        if !self.queued.is_empty() && !self.current.is_empty() {
            let doc = mem::take(&mut self.current);
            self.queued.push(doc);
        }

        let batched = !self.queued.is_empty();
        let docs = if batched {
            mem::take(&mut self.queued)
        } else {
            vec![mem::take(&mut self.current)]
        };

        let mut prefilters = Vec::with_capacity(docs.len());
        let mut wires = Vec::with_capacity(docs.len());
        for doc in &docs {
            wires.push(doc.to_wire()?);
            prefilters.push(doc.prefilters.clone());
        }

        let envelope = if batched {
            json!({ "requests": wires })
        } else {
            wires.pop().unwrap_or(Value::Null)
        };

        Ok((envelope, prefilters))
    }

    #[cfg(test)]
    pub(crate) fn current_wire(&self) -> Result<Value> {
        self.current.to_wire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn detached_client() -> Client {
        let (near, _far) = tokio::io::duplex(4096);
        Client::from_transport(near)
    }

    #[tokio::test]
    async fn test_chain_builds_get_document() {
        let client = detached_client().await;
        let query = client
            .table("fruits")
            .fields(json!(["fruit", "size"]))
            .filter(json!({"size": "Medium"}))
            .order("fruit")
            .limit(10)
            .get_all();

        assert_eq!(
            query.current_wire().unwrap(),
            json!({
                "request": "get",
                "table": "fruits",
                "fields": {"fruit": true, "size": true},
                "filters": {"size": {"__operator": "==", "__value": "Medium"}},
                "order": [{"fruit": true}],
                "limit": 10
            })
        );
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let client = detached_client().await;
        let query = client.table("fruits").get("apple");
        assert_eq!(
            query.current_wire().unwrap(),
            json!({"request": "get", "table": "fruits", "id": "apple"})
        );
    }

    #[tokio::test]
    async fn test_insert_wraps_single_object() {
        let client = detached_client().await;
        let query = client.table("fruits").insert(json!({"fruit": "Mango"}));
        assert_eq!(
            query.current_wire().unwrap()["rows"],
            json!([{"fruit": "Mango"}])
        );
    }

    #[tokio::test]
    async fn test_insert_keeps_array() {
        let client = detached_client().await;
        let query = client
            .table("fruits")
            .insert(json!([{"fruit": "Mango"}, {"fruit": "Fig"}]));
        assert_eq!(
            query.current_wire().unwrap()["rows"],
            json!([{"fruit": "Mango"}, {"fruit": "Fig"}])
        );
    }

    #[tokio::test]
    async fn test_or_filter_encodes_disjunction() {
        let client = detached_client().await;
        let query = client
            .table("fruits")
            .or_filter([json!({"size": "Small"}), json!({"size": "Large"})])
            .get_all();
        assert_eq!(
            query.current_wire().unwrap()["filters"],
            json!({"__or": [
                {"size": {"__operator": "==", "__value": "Small"}},
                {"size": {"__operator": "==", "__value": "Large"}}
            ]})
        );
    }

    #[tokio::test]
    async fn test_filters_and_together() {
        let client = detached_client().await;
        let query = client
            .table("fruits")
            .filter(json!({"size": "Medium"}))
            .filter(json!({"quantity >": 5}))
            .get_all();
        assert_eq!(
            query.current_wire().unwrap()["filters"],
            json!({
                "size": {"__operator": "==", "__value": "Medium"},
                "quantity": {"__operator": ">", "__value": 5}
            })
        );
    }

    #[tokio::test]
    async fn test_bad_filter_reported_by_run_not_mid_chain() {
        let client = detached_client().await;
        // An unknown operator must not panic or error until run().
        let query = client
            .table("fruits")
            .filter(json!({"size !!": "Medium"}))
            .get_all();
        assert!(query.deferred.is_some());

        let err = query.run().await.unwrap_err();
        assert!(matches!(err, JoedbError::Filter(_)));
    }

    #[tokio::test]
    async fn test_prefilter_stays_off_the_wire() {
        let client = detached_client().await;
        let query = client
            .table("fruits")
            .prefilter(json!({"quantity >": 10}))
            .get_all();

        let wire = query.current_wire().unwrap();
        assert_eq!(wire, json!({"request": "get", "table": "fruits"}));
        assert_eq!(query.current.prefilters.len(), 1);
    }

    #[tokio::test]
    async fn test_prefilter_fn_records_predicate() {
        let client = detached_client().await;
        let query = client
            .table("fruits")
            .prefilter_fn("quantity", |v| v.as_u64().unwrap_or(0) > 10)
            .get_all();
        assert!(matches!(
            query.current.prefilters[0],
            FilterNode::Predicate { .. }
        ));
    }

    #[tokio::test]
    async fn test_queue_moves_document_and_resets() {
        let client = detached_client().await;
        let query = client
            .table("fruits")
            .get("apple")
            .label("first")
            .queue()
            .table("vegetables")
            .count()
            .label("second");

        assert_eq!(query.queued.len(), 1);
        assert_eq!(
            query.queued[0].to_wire().unwrap(),
            json!({"request": "get", "table": "fruits", "id": "apple", "requestName": "first"})
        );
        assert_eq!(
            query.current_wire().unwrap(),
            json!({"request": "count", "table": "vegetables", "requestName": "second"})
        );
    }

    #[tokio::test]
    async fn test_single_queued_document_keeps_batch_envelope() {
        let client = detached_client().await;
        let mut query = client
            .table("fruits")
            .insert(json!({"id": "orange"}))
            .queue();

        let (envelope, prefilters) = query.build_envelope().unwrap();
        assert_eq!(
            envelope,
            json!({"requests": [
                {"request": "insert", "table": "fruits", "rows": [{"id": "orange"}]}
            ]})
        );
        assert_eq!(prefilters.len(), 1);
    }

    #[tokio::test]
    async fn test_unqueued_document_goes_out_bare() {
        let client = detached_client().await;
        let mut query = client.table("fruits").get("apple");

        let (envelope, _) = query.build_envelope().unwrap();
        assert_eq!(
            envelope,
            json!({"request": "get", "table": "fruits", "id": "apple"})
        );
    }

    #[tokio::test]
    async fn test_touched_current_document_joins_batch() {
        // A trailing document carrying nothing but a limit must not be
        // dropped from the batch.
        let client = detached_client().await;
        let mut query = client.table("fruits").get_all().queue().limit(5);

        let (envelope, _) = query.build_envelope().unwrap();
        let requests = envelope["requests"].as_array().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], json!({"limit": 5}));
    }

    #[tokio::test]
    async fn test_untouched_current_document_stays_out_of_batch() {
        let client = detached_client().await;
        let mut query = client.table("fruits").get_all().queue();

        let (envelope, _) = query.build_envelope().unwrap();
        assert_eq!(envelope["requests"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_include_directives_accumulate_in_order() {
        let client = detached_client().await;
        let query = client
            .table("meals")
            .include(json!({"dessert": "fruits"}))
            .include(json!({"side": "fruits"}));

        assert_eq!(
            query.current_wire().unwrap()["includes"],
            json!([{"dessert": "fruits"}, {"side": "fruits"}])
        );
    }

    #[tokio::test]
    async fn test_include_on_already_included_rows() {
        let client = detached_client().await;
        let query = client
            .table("meals")
            .include(json!({"side": "fruits"}))
            .include(json!({"side": {"after": "meals"}}))
            .get("Breakfast");

        let wire = query.current_wire().unwrap();
        assert_eq!(
            wire["includes"],
            json!([{"side": "fruits"}, {"side": {"after": "meals"}}])
        );
        assert_eq!(wire["id"], json!("Breakfast"));
    }

    #[tokio::test]
    async fn test_queued_documents_do_not_share_filters() {
        let client = detached_client().await;
        let query = client
            .table("fruits")
            .filter(json!({"size": "Small"}))
            .queue()
            .table("fruits")
            .filter(json!({"size": "Large"}));

        assert_eq!(
            query.queued[0].to_wire().unwrap()["filters"],
            json!({"size": {"__operator": "==", "__value": "Small"}})
        );
        assert_eq!(
            query.current_wire().unwrap()["filters"],
            json!({"size": {"__operator": "==", "__value": "Large"}})
        );
    }

    #[tokio::test]
    async fn test_schema_operations() {
        let client = detached_client().await;

        let create = Query::new(client.clone())
            .create_table("users")
            .table_type("memory");
        assert_eq!(
            create.current_wire().unwrap(),
            json!({"request": "createTable", "tableName": "users", "type": "memory"})
        );

        let rename = Query::new(client.clone()).rename_table("users", "people");
        assert_eq!(
            rename.current_wire().unwrap(),
            json!({"request": "renameTable", "oldTableName": "users", "newTableName": "people"})
        );

        let drop = Query::new(client.clone()).drop_table("people");
        assert_eq!(
            drop.current_wire().unwrap(),
            json!({"request": "dropTable", "tableName": "people"})
        );

        let list = Query::new(client).list_tables();
        assert_eq!(
            list.current_wire().unwrap(),
            json!({"request": "listTables"})
        );
    }

    #[tokio::test]
    async fn test_update_and_delete_key() {
        let client = detached_client().await;
        let update = client
            .table("fruits")
            .filter(json!({"fruit": "Apple"}))
            .update(json!({"quantity": 7, "stale": null}));
        assert_eq!(
            update.current_wire().unwrap()["data"],
            json!({"quantity": 7, "stale": null})
        );

        let delete = detached_client().await.table("fruits").delete_key("stale");
        let wire = delete.current_wire().unwrap();
        assert_eq!(wire["request"], json!("deleteKey"));
        assert_eq!(wire["key"], json!("stale"));
    }
}
