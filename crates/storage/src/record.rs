//! The record contract.

/// A value stored in an [`IndexedBucket`](crate::IndexedBucket).
///
/// A record names itself by a primary key and states, per index name, the
/// values it is filed under. Both must be pure functions of the record's
/// contents: the bucket recomputes index values from the stored copy when
/// records are updated or deleted.
///
/// # Example
///
/// ```
/// use cairn_storage::Record;
///
/// struct Task {
///     id: String,
///     status: String,
///     tags: Vec<String>,
/// }
///
/// impl Record for Task {
///     fn key(&self) -> &[u8] {
///         self.id.as_bytes()
///     }
///
///     fn index_values(&self, index: &str) -> Vec<Vec<u8>> {
///         match index {
///             "by_status" => vec![self.status.clone().into_bytes()],
///             "by_tag" => self.tags.iter().map(|t| t.clone().into_bytes()).collect(),
///             _ => Vec::new(),
///         }
///     }
/// }
/// ```
pub trait Record {
    /// Primary key. Must be non-empty and unique within the bucket.
    fn key(&self) -> &[u8];

    /// Values this record is filed under for `index`.
    ///
    /// An empty list leaves the record out of that index. Repeated values
    /// collapse into one entry.
    fn index_values(&self, index: &str) -> Vec<Vec<u8>>;
}
