//! Static table descriptions.
//!
//! A [`FieldMap`] is the allow-list that turns caller-facing field names
//! (`createdAt`) into column identifiers (`created_at`). Anything built from
//! user input, such as order-by tokens, must pass through it.

use crate::error::{DbError, DbResult};

/// One exposed field of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// External name, as it appears in API payloads.
    pub name: &'static str,
    /// SQL column identifier.
    pub column: &'static str,
}

impl Field {
    pub const fn new(name: &'static str, column: &'static str) -> Self {
        Self { name, column }
    }
}

/// Allow-list of fields for one table.
#[derive(Debug, Clone, Copy)]
pub struct FieldMap {
    fields: &'static [Field],
}

impl FieldMap {
    pub const fn new(fields: &'static [Field]) -> Self {
        Self { fields }
    }

    /// Look a field up by external name or by column.
    pub fn resolve(&self, name: &str) -> Option<&'static Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.column == name))
    }

    /// Column for `name`, or [`DbError::UnknownSortField`].
    pub fn column(&self, name: &str) -> DbResult<&'static str> {
        self.resolve(name)
            .map(|f| f.column)
            .ok_or_else(|| DbError::UnknownSortField(name.to_string()))
    }

    pub fn fields(&self) -> &'static [Field] {
        self.fields
    }
}

/// A table: its name, idempotent DDL and exposed fields.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub table: &'static str,
    /// Statements safe to run repeatedly (`CREATE TABLE IF NOT EXISTS ...`).
    pub ddl: &'static str,
    pub fields: FieldMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: FieldMap = FieldMap::new(&[
        Field::new("id", "id"),
        Field::new("createdAt", "created_at"),
    ]);

    #[test]
    fn test_resolve_by_name_or_column() {
        assert_eq!(FIELDS.column("createdAt").unwrap(), "created_at");
        assert_eq!(FIELDS.column("created_at").unwrap(), "created_at");
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            FIELDS.column("created_at; DROP TABLE x"),
            Err(DbError::UnknownSortField(_))
        ));
        assert!(FIELDS.resolve("").is_none());
    }
}
