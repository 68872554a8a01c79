use serde::{Deserialize, Serialize};

/// Postgres type affinity of a field, rendered as the `::<type>` cast on
/// every placeholder of the generated statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Bool,
    SmallInt,
    Integer,
    BigInt,
    DoublePrecision,
    Numeric,
    Text,
    Varchar,
    Bytea,
    Jsonb,
    Timestamptz,
    Timestamp,
    Date,
    Uuid,
    /// Any other type name, written verbatim (e.g. `varchar(32)`, `numeric(10,2)`).
    Custom(String),
}

/// How two key values of a field are compared before they reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAffinity {
    Integer,
    Exact,
    Float,
    Other,
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Bool => "BOOL",
            FieldType::SmallInt => "SMALLINT",
            FieldType::Integer => "INTEGER",
            FieldType::BigInt => "BIGINT",
            FieldType::DoublePrecision => "DOUBLE PRECISION",
            FieldType::Numeric => "NUMERIC",
            FieldType::Text => "TEXT",
            FieldType::Varchar => "VARCHAR",
            FieldType::Bytea => "BYTEA",
            FieldType::Jsonb => "JSONB",
            FieldType::Timestamptz => "TIMESTAMPTZ",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Date => "DATE",
            FieldType::Uuid => "UUID",
            FieldType::Custom(type_name) => type_name,
        }
    }

    pub fn key_affinity(&self) -> KeyAffinity {
        match self {
            FieldType::SmallInt | FieldType::Integer | FieldType::BigInt => KeyAffinity::Integer,
            FieldType::Numeric => KeyAffinity::Exact,
            FieldType::DoublePrecision => KeyAffinity::Float,
            FieldType::Custom(type_name) => {
                let type_name = type_name.trim().to_ascii_lowercase();
                let base = type_name.split('(').next().unwrap_or_default().trim();
                match base {
                    "smallint" | "integer" | "int" | "bigint" | "int2" | "int4" | "int8" => {
                        KeyAffinity::Integer
                    }
                    "numeric" | "decimal" => KeyAffinity::Exact,
                    "double precision" | "float8" | "real" | "float4" => KeyAffinity::Float,
                    _ => KeyAffinity::Other,
                }
            }
            _ => KeyAffinity::Other,
        }
    }
}

/// Describes one column of the target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// The name callers use for the field (key and skip lists refer to it).
    pub name: String,
    /// The storage column name.
    pub column: String,
    pub sql_type: FieldType,
    /// Database assigned (`SERIAL`, `GENERATED ... AS IDENTITY`), never sent.
    #[serde(default)]
    pub identity: bool,
    #[serde(default)]
    pub primary_key: bool,
}

impl FieldDescriptor {
    /// A field whose column is named like the field itself.
    pub fn new(name: impl Into<String>, sql_type: FieldType) -> Self {
        let name = name.into();
        FieldDescriptor { column: name.clone(), name, sql_type, identity: false, primary_key: false }
    }

    /// A field stored under a different column name.
    pub fn with_column(
        name: impl Into<String>,
        column: impl Into<String>,
        sql_type: FieldType,
    ) -> Self {
        FieldDescriptor {
            name: name.into(),
            column: column.into(),
            sql_type,
            identity: false,
            primary_key: false,
        }
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// The statically defined description of a table: its name and ordered fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub fields: Vec<FieldDescriptor>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        TableSchema { table: table.into(), fields }
    }

    /// Fields whose values are supplied by the caller, in table order.
    pub fn value_fields(&self) -> Vec<&FieldDescriptor> {
        self.fields.iter().filter(|field| !field.identity).collect()
    }
}
