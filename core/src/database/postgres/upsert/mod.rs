//! Bulk UPDATE-or-INSERT of many records in one statement.
//!
//! The statement stages every record in a `new_values` CTE, updates the rows
//! whose key fields match, and inserts the staged rows the update did not
//! touch. It runs on whatever connection or transaction it is given and
//! never commits on its own.

mod query_builder;

use std::collections::HashMap;

pub use query_builder::{
    build_assignments, build_column_list, build_insert_missing, build_key_match,
    build_new_values_cte, build_upsert_cte, build_upsert_statement, build_values_rows,
    format_table_name, quote_identifier,
};
use tokio_postgres::{types::ToSql, GenericClient};
use tracing::{debug, debug_span, error, Instrument};

use crate::database::postgres::{
    error::{PreconditionError, UpsertError},
    record::UpsertRecord,
    schema::{FieldDescriptor, TableSchema},
    sql_type_wrapper::SqlValue,
};

/// Postgres refuses statements with more bind parameters than this.
pub const POSTGRES_MAX_BIND_PARAMETERS: usize = 65_535;

/// The resolved column partition of an upsert.
#[derive(Debug, Clone)]
pub struct UpsertPlan<'a> {
    pub table: &'a str,
    /// Every non-identity field, in table order. Inserted and staged.
    pub fields: Vec<&'a FieldDescriptor>,
    /// Fields matched against existing rows.
    pub key_fields: Vec<&'a FieldDescriptor>,
    /// Fields overwritten on matched rows.
    pub update_fields: Vec<&'a FieldDescriptor>,
}

impl<'a> UpsertPlan<'a> {
    /// Resolves the key and update fields of `schema`.
    ///
    /// An empty `keys` list falls back to the non-identity primary key fields.
    pub fn resolve(
        schema: &'a TableSchema,
        keys: &[String],
        skip_for_update: &[String],
    ) -> Result<Self, PreconditionError> {
        let fields = schema.value_fields();
        if fields.is_empty() {
            return Err(PreconditionError::EmptyTableFields);
        }

        let is_key = |field: &FieldDescriptor| {
            if keys.is_empty() {
                field.primary_key
            } else {
                keys.iter().any(|key| *key == field.name)
            }
        };

        let key_fields: Vec<&FieldDescriptor> =
            fields.iter().copied().filter(|field| is_key(*field)).collect();
        if key_fields.is_empty() {
            return Err(PreconditionError::EmptyKeyFields);
        }

        let update_fields = fields
            .iter()
            .copied()
            .filter(|field| !is_key(*field) && !skip_for_update.contains(&field.name))
            .collect();

        Ok(UpsertPlan { table: &schema.table, fields, key_fields, update_fields })
    }

    /// How many records fit in one statement under the bind parameter limit.
    pub fn max_records_per_statement(&self) -> usize {
        POSTGRES_MAX_BIND_PARAMETERS / self.fields.len()
    }

    pub fn sql(&self, record_count: usize) -> String {
        build_upsert_statement(
            self.table,
            &self.fields,
            &self.key_fields,
            &self.update_fields,
            record_count,
        )
    }

    /// Extracts the parameters of every record, record-major then field-major,
    /// rejecting missing values and repeated key tuples.
    pub fn params<R: UpsertRecord>(&self, records: &[R]) -> Result<Vec<SqlValue>, PreconditionError> {
        let mut params = Vec::with_capacity(records.len() * self.fields.len());
        let mut seen_keys: HashMap<Vec<SqlValue>, usize> = HashMap::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            let row_start = params.len();

            for field in &self.fields {
                let value = record.field_value(field).ok_or_else(|| {
                    PreconditionError::MissingValue { record: index, field: field.name.clone() }
                })?;
                params.push(value);
            }

            let key: Vec<SqlValue> = self
                .fields
                .iter()
                .zip(&params[row_start..])
                .filter(|(field, _)| self.key_fields.iter().any(|key| key.name == field.name))
                .map(|(field, value)| value.key_value(field.sql_type.key_affinity()))
                .collect();

            // NULL never equals NULL in the key match, such records are always inserted
            if key.iter().any(SqlValue::is_null) {
                continue;
            }

            if let Some(first) = seen_keys.insert(key, index) {
                return Err(PreconditionError::DuplicateKey { first, duplicate: index });
            }
        }

        Ok(params)
    }
}

/// A fully built statement with its owned parameters.
#[derive(Debug, Clone)]
pub struct UpsertStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl UpsertStatement {
    pub fn params_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|param| param as &(dyn ToSql + Sync)).collect()
    }
}

/// Everything one upsert call needs besides the connection.
pub struct UpsertRequest<'a, R> {
    schema: &'a TableSchema,
    records: &'a [R],
    keys: Vec<String>,
    skip_for_update: Vec<String>,
}

impl<'a, R: UpsertRecord> UpsertRequest<'a, R> {
    pub fn new(schema: &'a TableSchema, records: &'a [R]) -> Self {
        UpsertRequest { schema, records, keys: Vec::new(), skip_for_update: Vec::new() }
    }

    /// Field names matched against existing rows.
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Field names inserted but never overwritten (e.g. `created_at`).
    pub fn skip_for_update<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_for_update = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn plan(&self) -> Result<UpsertPlan<'a>, PreconditionError> {
        UpsertPlan::resolve(self.schema, &self.keys, &self.skip_for_update)
    }

    /// Builds the statement, or `None` when there are no records.
    pub fn build(&self) -> Result<Option<UpsertStatement>, PreconditionError> {
        if self.records.is_empty() {
            return Ok(None);
        }

        let plan = self.plan()?;
        let params = plan.params(self.records)?;

        Ok(Some(UpsertStatement { sql: plan.sql(self.records.len()), params }))
    }

    /// Runs the upsert on `client` and returns the number of inserted rows.
    ///
    /// `client` may be a plain connection (the statement commits on its own)
    /// or a `Transaction`, in which case committing is up to the caller.
    pub async fn execute<C>(&self, client: &C) -> Result<u64, UpsertError>
    where
        C: GenericClient + Sync,
    {
        let span = debug_span!("upsert", table = %self.schema.table, records = self.records.len());
        self.run(client).instrument(span).await
    }

    async fn run<C>(&self, client: &C) -> Result<u64, UpsertError>
    where
        C: GenericClient + Sync,
    {
        let Some(statement) = self.build()? else {
            return Ok(0);
        };

        debug!("{} parameters: {}", statement.params.len(), statement.sql);

        let params = statement.params_refs();

        let inserted = client.execute(statement.sql.as_str(), &params).await.map_err(|e| {
            error!("PostgreSQL error: {:?}", e);
            error!("Failed query:\n{}", statement.sql);
            UpsertError::Database(e)
        })?;

        debug!("{} rows inserted", inserted);

        Ok(inserted)
    }
}

/// Updates the rows of `schema.table` whose `keys` match a record and inserts
/// the remaining records, in a single statement on `client`.
pub async fn upsert<C, R>(
    schema: &TableSchema,
    records: &[R],
    keys: &[&str],
    skip_for_update: &[&str],
    client: &C,
) -> Result<u64, UpsertError>
where
    C: GenericClient + Sync,
    R: UpsertRecord + Sync,
{
    UpsertRequest::new(schema, records)
        .keys(keys.iter().copied())
        .skip_for_update(skip_for_update.iter().copied())
        .execute(client)
        .await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::database::postgres::schema::FieldType;

    type Row = HashMap<String, SqlValue>;

    fn widgets() -> TableSchema {
        TableSchema::new(
            "widgets",
            vec![
                FieldDescriptor::new("id", FieldType::BigInt).identity().primary_key(),
                FieldDescriptor::new("sku", FieldType::Text),
                FieldDescriptor::new("qty", FieldType::Integer),
                FieldDescriptor::new("created_at", FieldType::Timestamptz),
            ],
        )
    }

    fn widget(sku: &str, qty: i32) -> Row {
        HashMap::from([
            ("sku".to_string(), SqlValue::from(sku)),
            ("qty".to_string(), SqlValue::from(qty)),
            ("created_at".to_string(), SqlValue::Null),
        ])
    }

    fn assignments_of(sql: &str) -> &str {
        let start = sql.find(" SET ").unwrap() + " SET ".len();
        let end = sql[start..].find('\n').unwrap() + start;
        &sql[start..end]
    }

    #[test]
    fn test_full_statement_shape() {
        let schema = widgets();
        let records = vec![widget("A", 5), widget("B", 2)];

        let statement =
            UpsertRequest::new(&schema, &records).keys(["sku"]).build().unwrap().unwrap();

        assert_eq!(
            statement.sql,
            "WITH new_values (\"sku\", \"qty\", \"created_at\") AS (VALUES \
             ($1::TEXT, $2::INTEGER, $3::TIMESTAMPTZ), ($4::TEXT, $5::INTEGER, $6::TIMESTAMPTZ)),\n\
             upsert AS (\n  \
             UPDATE \"widgets\" m SET \"qty\"=nv.\"qty\", \"created_at\"=nv.\"created_at\"\n  \
             FROM new_values nv\n  \
             WHERE m.\"sku\"=nv.\"sku\"\n  \
             RETURNING m.*\n\
             )\n\
             INSERT INTO \"widgets\" (\"sku\", \"qty\", \"created_at\")\n\
             SELECT \"sku\", \"qty\", \"created_at\" FROM new_values\n\
             WHERE NOT EXISTS (SELECT 1 FROM upsert up WHERE up.\"sku\"=new_values.\"sku\")"
        );
    }

    #[test]
    fn test_params_are_record_major_then_field_major() {
        let schema = widgets();
        let records = vec![widget("A", 5), widget("B", 2)];

        let statement =
            UpsertRequest::new(&schema, &records).keys(["sku"]).build().unwrap().unwrap();

        assert_eq!(
            statement.params,
            vec![
                SqlValue::from("A"),
                SqlValue::from(5),
                SqlValue::Null,
                SqlValue::from("B"),
                SqlValue::from(2),
                SqlValue::Null,
            ]
        );
        assert_eq!(statement.params_refs().len(), 6);
    }

    #[test]
    fn test_identity_field_never_staged() {
        let schema = widgets();
        let records = vec![widget("A", 5)];

        let statement =
            UpsertRequest::new(&schema, &records).keys(["sku"]).build().unwrap().unwrap();

        assert!(!statement.sql.contains("\"id\""));
    }

    #[test]
    fn test_skip_for_update_is_inserted_but_not_assigned() {
        let schema = widgets();
        let records = vec![widget("A", 5)];

        let statement = UpsertRequest::new(&schema, &records)
            .keys(["sku"])
            .skip_for_update(["created_at"])
            .build()
            .unwrap()
            .unwrap();

        assert_eq!(assignments_of(&statement.sql), "\"qty\"=nv.\"qty\"");
        assert!(statement
            .sql
            .contains("INSERT INTO \"widgets\" (\"sku\", \"qty\", \"created_at\")"));
    }

    #[test]
    fn test_first_row_carries_cast_for_every_column() {
        let schema = widgets();
        let records = vec![widget("A", 5), widget("B", 2), widget("C", 1)];

        let statement =
            UpsertRequest::new(&schema, &records).keys(["sku"]).build().unwrap().unwrap();

        assert!(statement.sql.contains("VALUES ($1::TEXT, $2::INTEGER, $3::TIMESTAMPTZ)"));
        assert!(statement.sql.contains("($7::TEXT, $8::INTEGER, $9::TIMESTAMPTZ))"));
    }

    #[test]
    fn test_unknown_keys_fail_before_building() {
        let schema = widgets();
        let records = vec![widget("A", 5)];

        let result = UpsertRequest::new(&schema, &records).keys(["nope", "missing"]).build();
        assert_eq!(result.unwrap_err(), PreconditionError::EmptyKeyFields);
    }

    #[test]
    fn test_identity_key_does_not_count() {
        let schema = widgets();
        let records = vec![widget("A", 5)];

        // the identity primary key is the default and is not a value field
        let result = UpsertRequest::new(&schema, &records).build();
        assert_eq!(result.unwrap_err(), PreconditionError::EmptyKeyFields);

        let result = UpsertRequest::new(&schema, &records).keys(["id"]).build();
        assert_eq!(result.unwrap_err(), PreconditionError::EmptyKeyFields);
    }

    #[test]
    fn test_default_keys_are_primary_key_fields() {
        let schema = TableSchema::new(
            "rates",
            vec![
                FieldDescriptor::new("currency", FieldType::Varchar).primary_key(),
                FieldDescriptor::new("rate", FieldType::Numeric),
            ],
        );
        let records = vec![HashMap::from([
            ("currency".to_string(), SqlValue::from("EUR")),
            ("rate".to_string(), SqlValue::from(1.08)),
        ])];

        let plan = UpsertRequest::new(&schema, &records).plan().unwrap();
        assert_eq!(plan.key_fields.len(), 1);
        assert_eq!(plan.key_fields[0].name, "currency");
        assert_eq!(plan.update_fields[0].name, "rate");
    }

    #[test]
    fn test_empty_records_build_nothing() {
        let schema = widgets();
        let records: Vec<Row> = Vec::new();

        // no key check either, the call is a no-op
        assert!(UpsertRequest::new(&schema, &records).keys(["nope"]).build().unwrap().is_none());
    }

    #[test]
    fn test_only_identity_fields_is_empty_table() {
        let schema =
            TableSchema::new("ids", vec![FieldDescriptor::new("id", FieldType::BigInt).identity()]);
        let records = vec![Row::new()];

        let result = UpsertRequest::new(&schema, &records).keys(["id"]).build();
        assert_eq!(result.unwrap_err(), PreconditionError::EmptyTableFields);
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let schema = widgets();
        let records = vec![widget("A", 5), widget("B", 2), widget("A", 9)];

        let result = UpsertRequest::new(&schema, &records).keys(["sku"]).build();
        assert_eq!(result.unwrap_err(), PreconditionError::DuplicateKey { first: 0, duplicate: 2 });
    }

    fn keyed(field_type: FieldType, keys: Vec<SqlValue>) -> (TableSchema, Vec<Row>) {
        let schema = TableSchema::new(
            "keyed",
            vec![
                FieldDescriptor::new("k", field_type),
                FieldDescriptor::new("v", FieldType::Text),
            ],
        );
        let records = keys
            .into_iter()
            .map(|k| HashMap::from([("k".to_string(), k), ("v".to_string(), SqlValue::from("x"))]))
            .collect();
        (schema, records)
    }

    #[test]
    fn test_duplicate_keys_across_integer_widths_are_rejected() {
        let (schema, records) =
            keyed(FieldType::BigInt, vec![SqlValue::I32(1), SqlValue::I64(2), SqlValue::I64(1)]);

        let result = UpsertRequest::new(&schema, &records).keys(["k"]).build();
        assert_eq!(result.unwrap_err(), PreconditionError::DuplicateKey { first: 0, duplicate: 2 });
    }

    #[test]
    fn test_duplicate_keys_across_float_and_decimal_are_rejected() {
        let (schema, records) = keyed(
            FieldType::Numeric,
            vec![SqlValue::F64(2.5), SqlValue::Numeric(rust_decimal::Decimal::new(250, 2))],
        );

        let result = UpsertRequest::new(&schema, &records).keys(["k"]).build();
        assert_eq!(result.unwrap_err(), PreconditionError::DuplicateKey { first: 0, duplicate: 1 });
    }

    #[test]
    fn test_signed_zero_is_one_key() {
        let (schema, records) =
            keyed(FieldType::DoublePrecision, vec![SqlValue::F64(0.0), SqlValue::F64(-0.0)]);

        let result = UpsertRequest::new(&schema, &records).keys(["k"]).build();
        assert_eq!(result.unwrap_err(), PreconditionError::DuplicateKey { first: 0, duplicate: 1 });
    }

    #[test]
    fn test_null_keys_are_not_duplicates() {
        let (schema, records) = keyed(FieldType::Text, vec![SqlValue::Null, SqlValue::Null]);

        let statement =
            UpsertRequest::new(&schema, &records).keys(["k"]).build().unwrap().unwrap();
        assert_eq!(statement.params.len(), 4);
    }

    #[test]
    fn test_composite_keys_only_collide_on_all_parts() {
        let schema = widgets();
        let records = vec![widget("A", 5), widget("A", 6)];

        let statement =
            UpsertRequest::new(&schema, &records).keys(["sku", "qty"]).build().unwrap().unwrap();

        assert!(statement.sql.contains("WHERE m.\"sku\"=nv.\"sku\" AND m.\"qty\"=nv.\"qty\""));
        assert!(statement
            .sql
            .contains("up.\"sku\"=new_values.\"sku\" AND up.\"qty\"=new_values.\"qty\""));
    }

    #[test]
    fn test_missing_value_names_record_and_field() {
        let schema = widgets();
        let mut incomplete = widget("B", 2);
        incomplete.remove("qty");
        let records = vec![widget("A", 5), incomplete];

        let result = UpsertRequest::new(&schema, &records).keys(["sku"]).build();
        assert_eq!(
            result.unwrap_err(),
            PreconditionError::MissingValue { record: 1, field: "qty".to_string() }
        );
    }

    #[test]
    fn test_storage_column_names_are_used() {
        let schema = TableSchema::new(
            "inventory.widgets",
            vec![
                FieldDescriptor::with_column("sku", "sku_code", FieldType::Custom("varchar(32)".into())),
                FieldDescriptor::with_column("qty", "quantity", FieldType::Integer),
            ],
        );
        let records = vec![HashMap::from([
            ("sku".to_string(), SqlValue::from("A")),
            ("qty".to_string(), SqlValue::from(1)),
        ])];

        let statement =
            UpsertRequest::new(&schema, &records).keys(["sku"]).build().unwrap().unwrap();

        assert!(statement.sql.contains("$1::varchar(32)"));
        assert!(statement.sql.contains("UPDATE \"inventory\".\"widgets\" m SET \"quantity\"=nv.\"quantity\""));
        assert!(statement.sql.contains("WHERE m.\"sku_code\"=nv.\"sku_code\""));
    }

    #[test]
    fn test_everything_excluded_only_inserts_missing() {
        let schema = widgets();
        let records = vec![widget("A", 5)];

        let plan = UpsertRequest::new(&schema, &records)
            .keys(["sku"])
            .skip_for_update(["qty", "created_at"])
            .plan()
            .unwrap();

        assert!(plan.update_fields.is_empty());
        let sql = plan.sql(records.len());
        assert!(!sql.contains("UPDATE"));
        assert!(sql.contains("INSERT INTO \"widgets\""));
    }

    #[test]
    fn test_max_records_per_statement() {
        let schema = widgets();
        let records = vec![widget("A", 5)];

        let plan = UpsertRequest::new(&schema, &records).keys(["sku"]).plan().unwrap();
        assert_eq!(plan.max_records_per_statement(), POSTGRES_MAX_BIND_PARAMETERS / 3);
    }
}
