use crate::collection::Document;
use crate::common::{Value, DOC_ID};
use crate::errors::{BizError, BizResult, ErrorKind};

/// Update operators applied by `find_one_and_update`.
///
/// `$setOnInsert` fields only take effect when the update inserts a new
/// document; they are written before `$set` and `$inc`, so an increment
/// always starts from the seeded value.
///
/// # Examples
///
/// ```rust
/// use bizstore::store::Update;
///
/// let update = Update::new()
///     .inc("value", 1)
///     .set_on_insert("value", 0u64);
/// assert!(!update.is_empty());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    set: Vec<(String, Value)>,
    inc: Vec<(String, i64)>,
    set_on_insert: Vec<(String, Value)>,
}

impl Update {
    pub fn new() -> Self {
        Update::default()
    }

    /// `$set`
    pub fn set<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.set.push((field.to_string(), value.into()));
        self
    }

    /// `$inc`
    pub fn inc(mut self, field: &str, delta: i64) -> Self {
        self.inc.push((field.to_string(), delta));
        self
    }

    /// `$setOnInsert`
    pub fn set_on_insert<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.set_on_insert.push((field.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.inc.is_empty() && self.set_on_insert.is_empty()
    }

    /// Applies the operators to `document` in place.
    ///
    /// On failure `document` may be partially modified; callers apply the
    /// update to a copy and only store it on success.
    pub fn apply(&self, document: &mut Document, inserting: bool) -> BizResult<()> {
        if inserting {
            for (field, value) in &self.set_on_insert {
                document.put(field.as_str(), value.clone())?;
            }
        }

        for (field, value) in &self.set {
            if field == DOC_ID && !inserting && document.get_ref(DOC_ID) != Some(value) {
                log::error!("Update would modify the immutable field '_id'");
                return Err(BizError::new(
                    "Update would modify the immutable field '_id'",
                    ErrorKind::InvalidArgument,
                ));
            }
            document.put(field.as_str(), value.clone())?;
        }

        for (field, delta) in &self.inc {
            let current = document.get(field);
            let next = increment(field, &current, *delta)?;
            document.put(field.as_str(), next)?;
        }
        Ok(())
    }
}

fn increment(field: &str, current: &Value, delta: i64) -> BizResult<Value> {
    let result = match current {
        Value::Null => Some(Value::I64(delta)),
        Value::U64(v) => {
            if delta >= 0 {
                v.checked_add(delta as u64).map(Value::U64)
            } else {
                v.checked_sub(delta.unsigned_abs()).map(Value::U64)
            }
        }
        Value::I64(v) => v.checked_add(delta).map(Value::I64),
        Value::F64(v) => Some(Value::F64(v + delta as f64)),
        other => {
            log::error!("Cannot apply $inc to non-numeric field '{}' ({:?})", field, other);
            return Err(BizError::new(
                &format!("Cannot apply $inc to non-numeric field '{}'", field),
                ErrorKind::InvalidArgument,
            ));
        }
    };

    result.ok_or_else(|| {
        log::error!("$inc on field '{}' overflows", field);
        BizError::new(
            &format!("$inc on field '{}' overflows", field),
            ErrorKind::InvalidArgument,
        )
    })
}

/// Which image `find_one_and_update` returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    Before,
    #[default]
    After,
}

/// Options of `find_one_and_update`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    upsert: bool,
    return_document: ReturnDocument,
}

impl UpdateOptions {
    pub fn new(upsert: bool, return_document: ReturnDocument) -> Self {
        UpdateOptions {
            upsert,
            return_document,
        }
    }

    pub fn is_upsert(&self) -> bool {
        self.upsert
    }

    pub fn return_document(&self) -> ReturnDocument {
        self.return_document
    }
}

/// Insert when nothing matches, return the post-image.
pub fn upsert() -> UpdateOptions {
    UpdateOptions::new(true, ReturnDocument::After)
}

/// Update an existing document only, return the post-image.
pub fn update_only() -> UpdateOptions {
    UpdateOptions::new(false, ReturnDocument::After)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn set_on_insert_seeds_before_inc() {
        let update = Update::new().inc("value", 1).set_on_insert("value", 4u64);
        let mut doc = doc! { _id: "users" };
        update.apply(&mut doc, true).unwrap();
        assert_eq!(doc.get("value"), Value::U64(5));
    }

    #[test]
    fn set_on_insert_ignored_on_update() {
        let update = Update::new().inc("value", 1).set_on_insert("value", 100u64);
        let mut doc = doc! { _id: "users", value: 7u64 };
        update.apply(&mut doc, false).unwrap();
        assert_eq!(doc.get("value"), Value::U64(8));
    }

    #[test]
    fn inc_keeps_unsigned_type() {
        let mut doc = doc! { value: 0u64 };
        Update::new().inc("value", 1).apply(&mut doc, false).unwrap();
        assert!(matches!(doc.get("value"), Value::U64(1)));
    }

    #[test]
    fn inc_missing_field_starts_from_zero() {
        let mut doc = Document::new();
        Update::new().inc("value", 3).apply(&mut doc, false).unwrap();
        assert_eq!(doc.get("value").as_u64(), Some(3));
    }

    #[test]
    fn inc_overflow_fails() {
        let mut doc = doc! { value: (u64::MAX) };
        let err = Update::new().inc("value", 1).apply(&mut doc, false).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
    }

    #[test]
    fn inc_non_numeric_fails() {
        let mut doc = doc! { value: "x" };
        let err = Update::new().inc("value", 1).apply(&mut doc, false).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
    }

    #[test]
    fn set_cannot_change_id() {
        let mut doc = doc! { _id: 1u64 };
        let err = Update::new().set("_id", 2u64).apply(&mut doc, false).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidArgument);
        Update::new().set("_id", 1u64).apply(&mut doc, false).unwrap();
    }

    #[test]
    fn options_shorthands() {
        assert!(upsert().is_upsert());
        assert!(!update_only().is_upsert());
        assert_eq!(upsert().return_document(), ReturnDocument::After);
    }
}
