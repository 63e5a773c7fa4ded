//! Decoded server response with typed accessors.

use serde_json::{json, Value};

use crate::query::FilterNode;

/// Conventional status value for a successful operation.
pub const STATUS_OK: &str = "OK";

/// One decoded response, augmented with the driver-measured request time.
///
/// Server-reported failures (`status != "OK"`) are data, not errors: they
/// are surfaced verbatim and never retried or reinterpreted by the driver.
#[derive(Debug, Clone)]
pub struct Response {
    value: Value,
    request_time: f64,
}

impl Response {
    /// Wrap a decoded payload, stamping `requestTime` (milliseconds,
    /// rounded to two significant digits) into the top-level map.
    pub(crate) fn new(mut value: Value, elapsed_ms: f64) -> Self {
        let request_time = round_to_sig_digits(elapsed_ms, 2);
        if let Some(map) = value.as_object_mut() {
            map.insert("requestTime".to_string(), json!(request_time));
        }
        Self {
            value,
            request_time,
        }
    }

    /// The `status` field, if present.
    pub fn status(&self) -> Option<&str> {
        self.value.get("status").and_then(Value::as_str)
    }

    /// Whether the server reported success.
    pub fn is_ok(&self) -> bool {
        self.status() == Some(STATUS_OK)
    }

    /// Human-readable outcome for mutations and schema operations.
    pub fn message(&self) -> Option<&str> {
        self.value.get("message").and_then(Value::as_str)
    }

    /// Result rows for read operations.
    pub fn rows(&self) -> Option<&Vec<Value>> {
        self.value.get("rows").and_then(Value::as_array)
    }

    /// Per-document results of a batch, in request order.
    pub fn responses(&self) -> Option<&Vec<Value>> {
        self.value.get("responses").and_then(Value::as_array)
    }

    /// Elapsed time between send and receive, in milliseconds.
    pub fn request_time(&self) -> f64 {
        self.request_time
    }

    /// Arbitrary field access on the raw document.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    /// Borrow the raw decoded document.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume into the raw decoded document.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Apply local-only prefilters to the fetched rows.
    ///
    /// `prefilters[i]` holds the predicates of the i-th queued document;
    /// a single (non-batch) request uses index 0 against the top-level
    /// `rows`. Rows failing any predicate are dropped client-side.
    pub(crate) fn apply_prefilters(&mut self, prefilters: &[Vec<FilterNode>]) {
        if prefilters.iter().all(|p| p.is_empty()) {
            return;
        }

        if let Some(responses) = self
            .value
            .get_mut("responses")
            .and_then(Value::as_array_mut)
        {
            for (entry, filters) in responses.iter_mut().zip(prefilters) {
                retain_matching(entry, filters);
            }
        } else if let Some(filters) = prefilters.first() {
            retain_matching(&mut self.value, filters);
        }
    }
}

fn retain_matching(doc: &mut Value, filters: &[FilterNode]) {
    if filters.is_empty() {
        return;
    }
    if let Some(rows) = doc.get_mut("rows").and_then(Value::as_array_mut) {
        rows.retain(|row| filters.iter().all(|f| f.matches(row)));
    }
}

/// Round to the given number of significant digits (not decimal places).
fn round_to_sig_digits(value: f64, digits: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return 0.0;
    }
    let shift = digits - 1 - value.abs().log10().floor() as i32;
    let scale = 10f64.powi(shift);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compile;

    #[test]
    fn test_accessors() {
        let response = Response::new(
            json!({
                "status": "OK",
                "message": "1 row(s) inserted",
                "rows": [{"id": "apple"}]
            }),
            1.234,
        );

        assert!(response.is_ok());
        assert_eq!(response.status(), Some("OK"));
        assert_eq!(response.message(), Some("1 row(s) inserted"));
        assert_eq!(response.rows().unwrap().len(), 1);
        assert!(response.responses().is_none());
    }

    #[test]
    fn test_request_time_stamped_into_document() {
        let response = Response::new(json!({"status": "OK"}), 1.267);
        assert_eq!(response.request_time(), 1.3);
        assert_eq!(response.get("requestTime"), Some(&json!(1.3)));
    }

    #[test]
    fn test_server_error_is_data_not_err() {
        let response = Response::new(json!({"status": "Table missing"}), 0.5);
        assert!(!response.is_ok());
        assert_eq!(response.status(), Some("Table missing"));
    }

    #[test]
    fn test_round_to_two_significant_digits() {
        assert_eq!(round_to_sig_digits(1234.0, 2), 1200.0);
        assert_eq!(round_to_sig_digits(0.012345, 2), 0.012);
        assert_eq!(round_to_sig_digits(9.96, 2), 10.0);
        assert_eq!(round_to_sig_digits(0.0, 2), 0.0);
    }

    #[test]
    fn test_prefilters_drop_non_matching_rows() {
        let mut response = Response::new(
            json!({"status": "OK", "rows": [
                {"id": "apple", "size": "Medium"},
                {"id": "cherry", "size": "Small"}
            ]}),
            1.0,
        );

        let filters = vec![vec![compile(&json!({"size": "Medium"})).unwrap()]];
        response.apply_prefilters(&filters);

        let rows = response.rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("apple"));
    }

    #[test]
    fn test_prefilters_pair_positionally_with_batch_responses() {
        let mut response = Response::new(
            json!({"responses": [
                {"status": "OK", "rows": [{"n": 1}, {"n": 2}]},
                {"status": "OK", "rows": [{"n": 1}, {"n": 2}]}
            ]}),
            1.0,
        );

        let filters = vec![
            vec![compile(&json!({"n": 1})).unwrap()],
            vec![],
        ];
        response.apply_prefilters(&filters);

        let responses = response.responses().unwrap();
        assert_eq!(responses[0]["rows"], json!([{"n": 1}]));
        assert_eq!(responses[1]["rows"], json!([{"n": 1}, {"n": 2}]));
    }
}
