//! Quoted Postgres identifiers for the tables the store reads and writes.

use crate::error::{Result, VectorError};

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier, rejecting anything but `[A-Za-z_][A-Za-z0-9_]*`.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        validate_ident(&schema, "schema")?;
        validate_ident(&table, "table")?;
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Returns the raw schema string.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Returns the raw table string.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Index name derived from the table, e.g. `expense_embeddings_owner_idx`.
    pub fn index_name(&self, suffix: &str) -> String {
        quote_ident(&format!("{}_{}", self.table, suffix))
    }
}

/// The four tables the store touches; only the embedding table is owned by this crate.
#[derive(Debug, Clone)]
pub struct StoreTables {
    /// Embedding rows written by ingestion.
    pub embeddings: TableName,
    /// Expense rows owned by the CRUD layer.
    pub expenses: TableName,
    /// Category rows owned by the CRUD layer.
    pub categories: TableName,
    /// Payment-method rows owned by the CRUD layer.
    pub payment_methods: TableName,
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn validate_ident(name: &str, kind: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(VectorError::InvalidConfig(format!("{kind} name is required")));
    };
    if name.len() > 63 {
        return Err(VectorError::InvalidConfig(format!(
            "{kind} name '{name}' exceeds 63 bytes"
        )));
    }
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(VectorError::InvalidConfig(format!(
            "{kind} name '{name}' must match [A-Za-z_][A-Za-z0-9_]*"
        )));
    }
    Ok(())
}
