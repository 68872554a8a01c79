//! SQL building blocks for the CTE based upsert statement.
//!
//! Every function here is pure string assembly; no values are ever inlined,
//! only `$n` placeholders.

use crate::database::postgres::schema::FieldDescriptor;

/// Alias of the target table inside the `upsert` CTE.
const TARGET_ALIAS: &str = "m";
/// Alias of `new_values` inside the `upsert` CTE.
const NEW_VALUES_ALIAS: &str = "nv";
/// Alias of the `upsert` CTE inside the final `NOT EXISTS`.
const UPDATED_ALIAS: &str = "up";

/// Quotes an identifier the way Postgres' `quote_ident` does for
/// non-trivial names: always double-quoted, embedded quotes doubled.
#[inline]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Formats a table name, quoting each part of a `schema.table` name.
pub fn format_table_name(table_name: &str) -> String {
    table_name
        .split('.')
        .map(|part| quote_identifier(part.trim_matches('"')))
        .collect::<Vec<_>>()
        .join(".")
}

/// `"col1", "col2", ...` using storage column names.
pub fn build_column_list(fields: &[&FieldDescriptor]) -> String {
    fields.iter().map(|field| quote_identifier(&field.column)).collect::<Vec<_>>().join(", ")
}

/// One `($1::TYPE, $2::TYPE, ...)` tuple per record, numbered record-major.
///
/// The cast goes on every row, not only the first: Postgres infers the
/// column types of a multi-row `VALUES` list from its first row, and the
/// same cast on later rows keeps each placeholder's parameter type fixed.
pub fn build_values_rows(fields: &[&FieldDescriptor], record_count: usize) -> String {
    let width = fields.len();

    (0..record_count)
        .map(|row| {
            let base = row * width + 1;
            let placeholders = fields
                .iter()
                .enumerate()
                .map(|(j, field)| format!("${}::{}", base + j, field.sql_type.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", placeholders)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `WITH new_values (<cols>) AS (VALUES (...), (...))`
pub fn build_new_values_cte(fields: &[&FieldDescriptor], record_count: usize) -> String {
    format!(
        "WITH new_values ({}) AS (VALUES {})",
        build_column_list(fields),
        build_values_rows(fields, record_count)
    )
}

/// `"col"=nv."col", ...`
pub fn build_assignments(update_fields: &[&FieldDescriptor]) -> String {
    update_fields
        .iter()
        .map(|field| {
            let column = quote_identifier(&field.column);
            format!("{}={}.{}", column, NEW_VALUES_ALIAS, column)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `<left>."key"=<right>."key" AND ...`
pub fn build_key_match(key_fields: &[&FieldDescriptor], left: &str, right: &str) -> String {
    key_fields
        .iter()
        .map(|field| {
            let column = quote_identifier(&field.column);
            format!("{}.{}={}.{}", left, column, right, column)
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// The `upsert` CTE updating every matched row and returning it.
///
/// With no fields left to update it only selects the matching rows, so
/// matched records are left alone and the rest are still inserted.
pub fn build_upsert_cte(
    formatted_table_name: &str,
    key_fields: &[&FieldDescriptor],
    update_fields: &[&FieldDescriptor],
) -> String {
    let key_match = build_key_match(key_fields, TARGET_ALIAS, NEW_VALUES_ALIAS);

    if update_fields.is_empty() {
        return format!(
            "upsert AS (\n  SELECT {t}.* FROM {} {t}, new_values {nv}\n  WHERE {}\n)",
            formatted_table_name,
            key_match,
            t = TARGET_ALIAS,
            nv = NEW_VALUES_ALIAS,
        );
    }

    format!(
        "upsert AS (\n  UPDATE {} {t} SET {}\n  FROM new_values {nv}\n  WHERE {}\n  RETURNING {t}.*\n)",
        formatted_table_name,
        build_assignments(update_fields),
        key_match,
        t = TARGET_ALIAS,
        nv = NEW_VALUES_ALIAS,
    )
}

/// The final `INSERT` of every staged row the `upsert` CTE did not return.
pub fn build_insert_missing(
    formatted_table_name: &str,
    fields: &[&FieldDescriptor],
    key_fields: &[&FieldDescriptor],
) -> String {
    let columns = build_column_list(fields);

    format!(
        "INSERT INTO {} ({})\nSELECT {} FROM new_values\nWHERE NOT EXISTS (SELECT 1 FROM upsert {up} WHERE {})",
        formatted_table_name,
        columns,
        columns,
        build_key_match(key_fields, UPDATED_ALIAS, "new_values"),
        up = UPDATED_ALIAS,
    )
}

/// Assembles the whole statement.
pub fn build_upsert_statement(
    table_name: &str,
    fields: &[&FieldDescriptor],
    key_fields: &[&FieldDescriptor],
    update_fields: &[&FieldDescriptor],
    record_count: usize,
) -> String {
    let formatted_table_name = format_table_name(table_name);

    format!(
        "{},\n{}\n{}",
        build_new_values_cte(fields, record_count),
        build_upsert_cte(&formatted_table_name, key_fields, update_fields),
        build_insert_missing(&formatted_table_name, fields, key_fields),
    )
}
