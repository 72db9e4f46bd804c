use im::OrdMap;

use crate::common::{Convertible, Value, DOC_ID};
use crate::errors::{BizError, BizResult, ErrorKind};
use std::borrow::Cow;
use std::fmt::{Debug, Display};

/// A stored document: an ordered map of field names to [Value]s.
///
/// `_id` is the primary key of the collection the document lives in. The
/// map is an `im::OrdMap`, so cloning a document (which the gateways do
/// on every read) shares structure instead of copying it.
#[derive(Clone, Eq, PartialEq, Default, Ord, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct Document {
    data: OrdMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Document {
            data: OrdMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Associates `value` with `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the key is empty.
    pub fn put<'a, T: Into<Value>>(&mut self, key: impl Into<Cow<'a, str>>, value: T) -> BizResult<()> {
        let key = key.into();
        if key.is_empty() {
            log::error!("Document does not support empty key");
            return Err(BizError::new(
                "Document does not support empty key",
                ErrorKind::InvalidArgument,
            ));
        }
        self.data.insert(key.into_owned(), value.into());
        Ok(())
    }

    /// Returns the value of `key`, or [Value::Null] when absent.
    pub fn get(&self, key: &str) -> Value {
        self.data.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn get_ref(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Reads `key` and converts it with [Convertible::from_value].
    pub fn get_as<T: Convertible>(&self, key: &str) -> BizResult<T::Output> {
        T::from_value(self.data.get(key).unwrap_or(&Value::Null)).map_err(|err| {
            BizError::new_with_cause(
                &format!("Field '{}' has an unexpected type", key),
                ErrorKind::EncodingError,
                err,
            )
        })
    }

    /// The `_id` of the document, if set.
    pub fn id(&self) -> Option<&Value> {
        self.data.get(DOC_ID)
    }

    pub fn has_id(&self) -> bool {
        self.data.contains_key(DOC_ID)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Copies every field of `other` into this document.
    pub fn merge(&mut self, other: &Document) {
        for (key, value) in other.data.iter() {
            self.data.insert(key.clone(), value.clone());
        }
    }

    pub fn fields(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Document {
            data: iter.into_iter().collect(),
        }
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.data.iter()).finish()
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        write!(f, "}}")
    }
}

pub fn normalize(value: &str) -> String {
    value.trim_matches('"').to_string()
}

/// Creates a [Document] with JSON-like syntax.
///
/// Keys may be bare identifiers or string literals; values may be nested
/// documents, arrays or any expression convertible into a [Value].
///
/// ```rust
/// use bizstore::doc;
///
/// let counter = doc! {
///     _id: "users",
///     value: 5u64,
/// };
/// let talk = doc! {
///     Status: 1i64,
///     "Title": "hello",
///     tags: ["a", "b"],
///     meta: { source: "web" },
/// };
/// assert_eq!(counter.get("value").as_u64(), Some(5));
/// assert_eq!(talk.get("Title").as_str(), Some("hello"));
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::collection::Document::new()
    };

    ($($key:tt : $value:tt),* $(,)?) => {
        {
            let mut doc = $crate::collection::Document::new();
            $(
                doc.put($crate::collection::normalize(stringify!($key)), $crate::doc_value!($value))
                    .expect("document keys in doc! are never empty");
            )*
            doc
        }
    };
}

/// Converts one `doc!` value position into a [Value].
#[macro_export]
macro_rules! doc_value {
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::common::Value::Document($crate::doc!{ $($key : $value),* })
    };

    ([ $($value:tt),* $(,)? ]) => {
        $crate::common::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    ($value:expr) => {
        $crate::common::Value::from($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn put_rejects_empty_key() {
        let mut doc = Document::new();
        let err = doc.put("", 1u64).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
    }

    #[test]
    fn get_missing_is_null() {
        let doc = doc! { a: 1i64 };
        assert!(doc.get("b").is_null());
        assert_eq!(doc.get("a"), Value::I64(1));
    }

    #[test]
    fn doc_macro_handles_nesting() {
        let base = 100i64;
        let doc = doc! {
            _id: "users",
            "quoted": true,
            score: (base * 2),
            nested: { inner: "x" },
            list: [1i64, 2i64],
        };
        assert_eq!(doc.get("_id").as_str(), Some("users"));
        assert_eq!(doc.get("quoted"), Value::Bool(true));
        assert_eq!(doc.get("score"), Value::I64(200));
        assert_eq!(
            doc.get("nested").as_document().map(|d| d.get("inner")),
            Some(Value::from("x"))
        );
        assert_eq!(doc.get("list").as_array().map(|a| a.len()), Some(2));
        assert!(doc.has_id());
    }

    #[test]
    fn merge_overwrites_and_adds() {
        let mut left = doc! { a: 1i64, b: 2i64 };
        let right = doc! { b: 3i64, c: 4i64 };
        left.merge(&right);
        assert_eq!(left.size(), 3);
        assert_eq!(left.get("b"), Value::I64(3));
    }

    #[test]
    fn get_as_reports_field_name() {
        let doc = doc! { value: "not a number" };
        let err = doc.get_as::<u64>("value").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::EncodingError);
        assert!(err.message().contains("value"));
    }

    #[test]
    fn clones_are_independent() {
        let original = doc! { a: 1i64 };
        let mut copy = original.clone();
        copy.put("a", 2i64).unwrap();
        assert_eq!(original.get("a"), Value::I64(1));
        assert_eq!(copy.get("a"), Value::I64(2));
    }
}
