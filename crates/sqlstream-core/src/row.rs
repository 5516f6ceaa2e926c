//! Raw streamed row representation.
//!
//! Rows flow out of the driver as byte payloads; decoding into typed
//! values happens in higher layers. [`RowFields`] is shared via `Arc` so
//! every row of a result set points at the same column metadata.

use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows of one result set.
#[derive(Debug, Clone)]
pub struct RowFields {
    /// Column names in order
    names: Vec<String>,
    /// Name -> index mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
}

impl RowFields {
    /// Create field metadata from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Number of columns.
    pub fn num_fields(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Name of a column by index.
    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// All column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One row of a streamed result set.
///
/// The row owns its payload bytes and is moved, not copied; consuming it
/// from a `RowStream` invalidates the stream's prefetch slot. A `None`
/// column is SQL NULL.
#[derive(Debug)]
pub struct EphemeralRow {
    values: Vec<Option<Vec<u8>>>,
    fields: Arc<RowFields>,
}

impl EphemeralRow {
    pub fn new(values: Vec<Option<Vec<u8>>>, fields: Arc<RowFields>) -> Self {
        debug_assert_eq!(values.len(), fields.num_fields());
        Self { values, fields }
    }

    /// Number of columns in the row.
    pub fn num_fields(&self) -> usize {
        self.values.len()
    }

    /// Shared column metadata.
    pub fn fields(&self) -> &Arc<RowFields> {
        &self.fields
    }

    /// Raw bytes of one column; `None` for SQL NULL.
    pub fn value_at(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    /// True if the column at `index` is SQL NULL.
    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.values.get(index), Some(None))
    }

    /// Column bytes interpreted as UTF-8, for text-protocol values.
    pub fn text_at(&self, index: usize) -> Option<&str> {
        self.value_at(index).and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Best-effort payload size: the sum of column byte lengths, with no
    /// metadata or packet overhead counted.
    pub fn byte_size(&self) -> u64 {
        self.values
            .iter()
            .map(|v| v.as_ref().map_or(0, |b| b.len() as u64))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> EphemeralRow {
        let fields = Arc::new(RowFields::new(vec!["id".to_string(), "name".to_string()]));
        EphemeralRow::new(
            vec![Some(b"42".to_vec()), Some(b"alice".to_vec())],
            fields,
        )
    }

    #[test]
    fn field_lookup_by_name_and_index() {
        let fields = RowFields::new(vec!["id".to_string(), "name".to_string()]);
        assert_eq!(fields.num_fields(), 2);
        assert_eq!(fields.index_of("name"), Some(1));
        assert_eq!(fields.index_of("missing"), None);
        assert_eq!(fields.field_name(0), Some("id"));
    }

    #[test]
    fn row_access_and_size() {
        let row = sample_row();
        assert_eq!(row.text_at(0), Some("42"));
        assert_eq!(row.text_at(1), Some("alice"));
        assert!(!row.is_null(0));
        assert_eq!(row.byte_size(), 7);
    }

    #[test]
    fn null_columns_count_zero_bytes() {
        let fields = Arc::new(RowFields::new(vec!["a".to_string(), "b".to_string()]));
        let row = EphemeralRow::new(vec![None, Some(b"x".to_vec())], fields);
        assert!(row.is_null(0));
        assert_eq!(row.value_at(0), None);
        assert_eq!(row.byte_size(), 1);
    }
}
