use std::collections::{BTreeMap, HashMap};

use crate::database::postgres::{schema::FieldDescriptor, sql_type_wrapper::SqlValue};

/// A caller-owned record whose values are read one field at a time.
///
/// Returning `None` means the record has no value for the field, which fails
/// the upsert before anything is sent. Return `Some(SqlValue::Null)` for SQL `NULL`.
pub trait UpsertRecord {
    fn field_value(&self, field: &FieldDescriptor) -> Option<SqlValue>;
}

impl UpsertRecord for HashMap<String, SqlValue> {
    fn field_value(&self, field: &FieldDescriptor) -> Option<SqlValue> {
        self.get(&field.name).cloned()
    }
}

impl UpsertRecord for BTreeMap<String, SqlValue> {
    fn field_value(&self, field: &FieldDescriptor) -> Option<SqlValue> {
        self.get(&field.name).cloned()
    }
}

impl<T: UpsertRecord + ?Sized> UpsertRecord for &T {
    fn field_value(&self, field: &FieldDescriptor) -> Option<SqlValue> {
        (**self).field_value(field)
    }
}
