use crate::collection::{Document, ObjectId};
use crate::common::Value;
use crate::errors::{BizError, BizResult, ErrorKind};

/// Conversion between a Rust type and a stored [Value].
///
/// Entities that live in their own collection (talks, messages, users)
/// convert to and from [Value::Document]; field types convert to the
/// matching scalar variant.
pub trait Convertible {
    type Output;

    fn to_value(&self) -> BizResult<Value>;
    fn from_value(value: &Value) -> BizResult<Self::Output>;
}

fn mismatch(value: &Value, expected: &str) -> BizError {
    log::error!("Value {:?} is not {}", value, expected);
    BizError::new(
        &format!("Value is not {}", expected),
        ErrorKind::EncodingError,
    )
}

impl Convertible for bool {
    type Output = bool;

    fn to_value(&self) -> BizResult<Value> {
        Ok(Value::Bool(*self))
    }

    fn from_value(value: &Value) -> BizResult<Self> {
        value.as_bool().ok_or_else(|| mismatch(value, "a bool"))
    }
}

impl Convertible for i64 {
    type Output = i64;

    fn to_value(&self) -> BizResult<Value> {
        Ok(Value::I64(*self))
    }

    fn from_value(value: &Value) -> BizResult<Self> {
        value.as_i64().ok_or_else(|| mismatch(value, "an i64"))
    }
}

impl Convertible for u64 {
    type Output = u64;

    fn to_value(&self) -> BizResult<Value> {
        Ok(Value::U64(*self))
    }

    fn from_value(value: &Value) -> BizResult<Self> {
        value.as_u64().ok_or_else(|| mismatch(value, "a u64"))
    }
}

impl Convertible for String {
    type Output = String;

    fn to_value(&self) -> BizResult<Value> {
        Ok(Value::String(self.clone()))
    }

    fn from_value(value: &Value) -> BizResult<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch(value, "a string"))
    }
}

impl Convertible for Vec<u8> {
    type Output = Vec<u8>;

    fn to_value(&self) -> BizResult<Value> {
        Ok(Value::Bytes(self.clone()))
    }

    fn from_value(value: &Value) -> BizResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            // absent binary payloads read back as empty
            Value::Null => Ok(Vec::new()),
            _ => Err(mismatch(value, "bytes")),
        }
    }
}

impl Convertible for ObjectId {
    type Output = ObjectId;

    fn to_value(&self) -> BizResult<Value> {
        Ok(Value::ObjectId(*self))
    }

    fn from_value(value: &Value) -> BizResult<Self> {
        value
            .as_object_id()
            .copied()
            .ok_or_else(|| mismatch(value, "an object id"))
    }
}

impl Convertible for Document {
    type Output = Document;

    fn to_value(&self) -> BizResult<Value> {
        Ok(Value::Document(self.clone()))
    }

    fn from_value(value: &Value) -> BizResult<Self> {
        match value {
            Value::Document(d) => Ok(d.clone()),
            Value::Null => Ok(Document::new()),
            _ => Err(mismatch(value, "a document")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_from_non_negative_i64() {
        assert_eq!(u64::from_value(&Value::I64(5)).unwrap(), 5);
    }

    #[test]
    fn u64_from_string_fails() {
        let err = u64::from_value(&Value::from("5")).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::EncodingError);
    }

    #[test]
    fn null_reads_as_empty_bytes_and_document() {
        assert!(Vec::<u8>::from_value(&Value::Null).unwrap().is_empty());
        assert!(Document::from_value(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn object_id_value() {
        let id = ObjectId::new();
        let value = id.to_value().unwrap();
        assert_eq!(ObjectId::from_value(&value).unwrap(), id);
    }
}
