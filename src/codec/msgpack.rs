//! MsgPack codec using `rmp-serde`.
//!
//! Always `to_vec_named`, never `to_vec`: the server expects struct-as-map
//! format, and positional arrays would not round-trip through the dynamic
//! document model on the other end.

use serde_json::Value;

use crate::error::Result;

/// MessagePack codec for structured data.
///
/// Uses `rmp_serde::to_vec_named` so structs serialize as maps with field
/// names. Plain `serde_json::Value` maps and arrays are unaffected either
/// way, but typed payloads in caller code must keep the map format.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Decode MsgPack bytes into the dynamic document model.
    #[inline]
    pub fn decode_value(bytes: &[u8]) -> Result<Value> {
        Self::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestStruct {
            id: 42,
            name: "test".to_string(),
            active: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: TestStruct = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_struct_encodes_as_map() {
        let test = TestStruct {
            id: 1,
            name: "x".to_string(),
            active: false,
        };

        let encoded = MsgPackCodec::encode(&test).unwrap();

        // MsgPack fixmap starts with 0x8X; fixarray would be 0x9X.
        assert_eq!(
            encoded[0] & 0xF0,
            0x80,
            "Expected map format (0x8X), got {:02X}",
            encoded[0]
        );
    }

    #[test]
    fn test_value_roundtrip() {
        let doc = json!({
            "request": "get",
            "table": "fruits",
            "limit": 10,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "nested": {"inner": null, "flag": true}
        });

        let encoded = MsgPackCodec::encode(&doc).unwrap();
        let decoded = MsgPackCodec::decode_value(&encoded).unwrap();

        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_null_roundtrip() {
        let val: Option<i32> = None;
        let encoded = MsgPackCodec::encode(&val).unwrap();

        // MsgPack nil is 0xc0.
        assert_eq!(encoded, vec![0xc0]);

        let decoded = MsgPackCodec::decode_value(&encoded).unwrap();
        assert_eq!(decoded, Value::Null);
    }

    #[test]
    fn test_scalar_types_survive() {
        for doc in [
            json!("string"),
            json!(12345),
            json!(-7),
            json!(3.14159),
            json!(true),
            json!(null),
        ] {
            let encoded = MsgPackCodec::encode(&doc).unwrap();
            assert_eq!(MsgPackCodec::decode_value(&encoded).unwrap(), doc);
        }
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        // 0xc1 is the one reserved byte in the MsgPack format.
        let invalid = [0xc1u8];
        let result: Result<Value> = MsgPackCodec::decode(&invalid);
        assert!(result.is_err());
    }
}
