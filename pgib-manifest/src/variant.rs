//! Dynamic-typed variant (Design Notes: "Dynamic-typed variants → tagged
//! union"). Backs `[backup:option]` values and `[backup:annotation]`
//! entries, which in the original are polymorphic (bool|int|uint|uint64|
//! string|kv|list). Modeled here as a discriminated union with typed,
//! fail-closed accessors - `as_bool()` etc. return `None` rather than
//! panicking on a type mismatch, mirroring pgBackRest's
//! `src/common/type/variant.c`.

use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub enum Variant {
    Bool(bool),
    Int(i64),
    UInt(u64),
    UInt64(u64),
    Str(String),
    KeyValue(BTreeMap<String, Variant>),
    List(Vec<Variant>),
}

impl Variant {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Variant::UInt(v) | Variant::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Variant::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Variant]> {
        match self {
            Variant::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_kv(&self) -> Option<&BTreeMap<String, Variant>> {
        match self {
            Variant::KeyValue(v) => Some(v),
            _ => None,
        }
    }

    /// Renders to the JSON scalar the text serializer writes (§4.4
    /// "Every scalar value is JSON-encoded at write").
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Variant::Bool(v) => serde_json::json!(v),
            Variant::Int(v) => serde_json::json!(v),
            Variant::UInt(v) | Variant::UInt64(v) => serde_json::json!(v),
            Variant::Str(v) => serde_json::json!(v),
            Variant::KeyValue(kv) => {
                let map: serde_json::Map<String, serde_json::Value> =
                    kv.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                serde_json::Value::Object(map)
            }
            Variant::List(list) => {
                serde_json::Value::Array(list.iter().map(Variant::to_json).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessor_is_fail_closed_on_mismatch() {
        let v = Variant::Str("hello".to_string());
        assert_eq!(v.as_str(), Some("hello"));
        assert_eq!(v.as_bool(), None);
        assert_eq!(v.as_uint(), None);
    }

    #[test]
    fn keyvalue_renders_sorted_json_object() {
        let mut kv = BTreeMap::new();
        kv.insert("z".to_string(), Variant::Bool(true));
        kv.insert("a".to_string(), Variant::UInt(3));
        let v = Variant::KeyValue(kv);
        assert_eq!(v.to_json().to_string(), r#"{"a":3,"z":true}"#);
    }
}
