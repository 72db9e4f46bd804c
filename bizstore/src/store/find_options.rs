/// Pagination of a `find`.
///
/// Results come back in insertion order; `skip` drops the first matches and
/// `limit` caps how many are returned.
///
/// ```rust
/// use bizstore::store::{skip_by, FindOptions};
///
/// let page = skip_by(20).limit(10);
/// assert_eq!(page.skip_count(), 20);
/// assert_eq!(page.limit_count(), Some(10));
/// assert_eq!(FindOptions::new().limit_count(), None);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FindOptions {
    skip: Option<u64>,
    limit: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        FindOptions::default()
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip_count(&self) -> u64 {
        self.skip.unwrap_or(0)
    }

    pub fn limit_count(&self) -> Option<u64> {
        self.limit
    }

    /// Applies skip and limit to an already filtered, ordered iterator.
    pub fn paginate<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        let items = items.skip(self.skip_count() as usize);
        match self.limit {
            Some(limit) => items.take(limit as usize).collect(),
            None => items.collect(),
        }
    }
}

pub fn skip_by(skip: u64) -> FindOptions {
    FindOptions::new().skip(skip)
}

pub fn limit_to(limit: u64) -> FindOptions {
    FindOptions::new().limit(limit)
}
