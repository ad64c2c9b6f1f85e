//! Table registry and schema model.
//!
//! A [`TableSchema`] is the ordered list of column descriptors plus key
//! metadata; it is what the heap and column-store managers persist into
//! each table file's page-0 header. The [`Catalog`] is the engine-level
//! registry mapping table names to their schema and storage layout,
//! saved as JSON beside the table directories.

use ahash::RandomState;
use common::{ColumnId, DbError, DbResult};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use types::SqlType;

/// One column declaration: name, SQL type, and nullability.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Primary, candidate, and foreign keys, all referring to columns by
/// ordinal position within the owning schema.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyConstraints {
    pub primary_key: Option<Vec<ColumnId>>,
    pub candidate_keys: Vec<Vec<ColumnId>>,
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKey {
    pub columns: Vec<ColumnId>,
    pub referenced_table: String,
    pub referenced_columns: Vec<ColumnId>,
}

/// Ordered column list of one table, with its key metadata.
///
/// `table_qualifier` is the table name column references resolve against:
/// row schemas downstream are the [`qualified_names`](Self::qualified_names)
/// form `"qualifier.column"`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub table_qualifier: String,
    pub columns: Vec<Column>,
    pub keys: KeyConstraints,
}

impl TableSchema {
    /// Validates and builds a schema: at least one column, unique column
    /// names within the qualifier, and every key ordinal in range.
    pub fn try_new(
        table_qualifier: &str,
        columns: Vec<Column>,
        keys: KeyConstraints,
    ) -> DbResult<Self> {
        if columns.is_empty() {
            return Err(DbError::Schema(format!(
                "table '{table_qualifier}' must have at least one column"
            )));
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(DbError::Schema(format!(
                    "duplicate column '{}' in table '{table_qualifier}'",
                    col.name
                )));
            }
        }

        let check_ordinals = |ordinals: &[ColumnId]| -> DbResult<()> {
            for &o in ordinals {
                if o as usize >= columns.len() {
                    return Err(DbError::Schema(format!(
                        "key ordinal {o} is out of range for table '{table_qualifier}'"
                    )));
                }
            }
            Ok(())
        };
        if let Some(pk) = &keys.primary_key {
            check_ordinals(pk)?;
        }
        for key in &keys.candidate_keys {
            check_ordinals(key)?;
        }
        for fk in &keys.foreign_keys {
            check_ordinals(&fk.columns)?;
        }

        Ok(Self {
            table_qualifier: table_qualifier.to_string(),
            columns,
            keys,
        })
    }

    /// Column names in declaration order, qualified as
    /// `"qualifier.column"` — the row-schema shape `expr::Environment`
    /// resolves references against.
    pub fn qualified_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| format!("{}.{}", self.table_qualifier, c.name))
            .collect()
    }
}

/// How a table's rows are physically laid out.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TableStorage {
    /// Slotted-page heap file, the row-store default.
    #[default]
    Heap,
    /// One file per column, bulk-loaded.
    ColumnStore,
}

/// A registered table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub schema: TableSchema,
    pub storage_kind: TableStorage,
}

/// The table registry, persisted as JSON in the data directory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    tables: HashMap<String, TableMeta, RandomState>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the registry from `path`; a missing file is an empty catalog,
    /// so first startup needs no bootstrap step.
    pub fn load(path: &Path) -> DbResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|err| DbError::Schema(format!("catalog file is unreadable: {err}")))
    }

    pub fn save(&self, path: &Path) -> DbResult<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|err| DbError::Schema(format!("catalog serialization failed: {err}")))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Registers a table, validating its schema.
    pub fn define_table(
        &mut self,
        name: &str,
        columns: Vec<Column>,
        keys: KeyConstraints,
        storage_kind: TableStorage,
    ) -> DbResult<()> {
        if self.tables.contains_key(name) {
            return Err(DbError::Schema(format!("table '{name}' already exists")));
        }
        let schema = TableSchema::try_new(name, columns, keys)?;
        self.tables.insert(
            name.to_string(),
            TableMeta {
                name: name.to_string(),
                schema,
                storage_kind,
            },
        );
        Ok(())
    }

    pub fn table(&self, name: &str) -> DbResult<&TableMeta> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::Schema(format!("unknown table '{name}'")))
    }
}
