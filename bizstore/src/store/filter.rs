use crate::collection::Document;
use crate::common::{Value, DOC_ID};
use std::fmt::{Display, Formatter};

/// Document predicate understood by every store gateway.
///
/// Only the shapes the repositories and the allocator need exist: field
/// equality, membership and conjunction. Build them with [field], [and] and
/// [all].
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    And(Vec<Filter>),
}

/// Matches every document.
pub fn all() -> Filter {
    Filter::All
}

/// Starts a filter on `field_name`.
pub fn field(field_name: &str) -> FluentFilter {
    FluentFilter {
        field_name: field_name.to_string(),
    }
}

/// Conjunction of `filters`. An empty list matches everything.
pub fn and(filters: Vec<Filter>) -> Filter {
    match filters.len() {
        0 => Filter::All,
        1 => filters.into_iter().next().unwrap_or(Filter::All),
        _ => Filter::And(filters),
    }
}

/// Shorthand for `field("_id").eq(id)`.
pub fn by_id<T: Into<Value>>(id: T) -> Filter {
    Filter::Eq(DOC_ID.to_string(), id.into())
}

pub struct FluentFilter {
    field_name: String,
}

impl FluentFilter {
    pub fn eq<T: Into<Value>>(self, value: T) -> Filter {
        Filter::Eq(self.field_name, value.into())
    }

    pub fn is_in<T: Into<Value>>(self, values: Vec<T>) -> Filter {
        Filter::In(self.field_name, values.into_iter().map(Into::into).collect())
    }
}

impl Filter {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => match document.get_ref(field) {
                Some(actual) => actual == value,
                None => value.is_null(),
            },
            Filter::In(field, values) => {
                let actual = document.get(field);
                values.iter().any(|v| *v == actual)
            }
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
        }
    }

    /// Field/value pairs fixed by top-level equality clauses.
    ///
    /// An upsert seeds the inserted document with these before applying the
    /// update operators.
    pub fn equality_fields(&self) -> Vec<(String, Value)> {
        match self {
            Filter::Eq(field, value) => vec![(field.clone(), value.clone())],
            Filter::And(filters) => filters.iter().flat_map(|f| f.equality_fields()).collect(),
            _ => Vec::new(),
        }
    }

    /// The `_id` this filter pins, allowing a primary-key lookup instead of
    /// a scan.
    pub fn id_value(&self) -> Option<&Value> {
        match self {
            Filter::Eq(field, value) if field == DOC_ID => Some(value),
            Filter::And(filters) => filters.iter().find_map(|f| f.id_value()),
            _ => None,
        }
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Filter::All => write!(f, "{{}}"),
            Filter::Eq(field, value) => write!(f, "{{{}: {:?}}}", field, value),
            Filter::In(field, values) => write!(f, "{{{}: {{$in: {:?}}}}}", field, values),
            Filter::And(filters) => {
                write!(f, "{{$and: [")?;
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", filter)?;
                }
                write!(f, "]}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn eq_matches_across_integer_types() {
        let doc = doc! { ServiceID: 0u64 };
        assert!(field("ServiceID").eq(0i64).matches(&doc));
        assert!(!field("ServiceID").eq(1i64).matches(&doc));
    }

    #[test]
    fn eq_null_matches_missing_field() {
        let doc = doc! { a: 1i64 };
        assert!(field("b").eq(Value::Null).matches(&doc));
    }

    #[test]
    fn in_matches_any_member() {
        let doc = doc! { Status: 2i64 };
        assert!(field("Status").is_in(vec![1i64, 2i64]).matches(&doc));
        assert!(!field("Status").is_in(vec![1i64]).matches(&doc));
        assert!(!field("Status").is_in(Vec::<i64>::new()).matches(&doc));
    }

    #[test]
    fn and_requires_all() {
        let doc = doc! { Status: 1i64, ServiceID: 0u64 };
        let filter = and(vec![field("Status").eq(1i64), field("ServiceID").eq(0u64)]);
        assert!(filter.matches(&doc));
        let filter = and(vec![field("Status").eq(1i64), field("ServiceID").eq(7u64)]);
        assert!(!filter.matches(&doc));
    }

    #[test]
    fn and_collapses_trivial_lists() {
        assert_eq!(and(vec![]), Filter::All);
        assert_eq!(and(vec![by_id("x")]), by_id("x"));
    }

    #[test]
    fn equality_fields_and_id() {
        let filter = and(vec![by_id("users"), field("Status").is_in(vec![1i64])]);
        assert_eq!(
            filter.equality_fields(),
            vec![("_id".to_string(), Value::from("users"))]
        );
        assert_eq!(filter.id_value(), Some(&Value::from("users")));
        assert_eq!(all().id_value(), None);
    }
}
