use std::hash::{Hash, Hasher};

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::{
    prelude::{FromPrimitive, ToPrimitive},
    Decimal,
};
use serde_json::Value;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type as PgType};
use uuid::Uuid;

use crate::database::postgres::schema::KeyAffinity;

/// An owned value bound to one `$n` placeholder of a generated statement.
#[derive(Debug, Clone)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Numeric(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Json(Value),
    DateTime(DateTime<Utc>),
    NaiveDateTime(NaiveDateTime),
    Date(NaiveDate),
    Uuid(Uuid),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// The value as the server will compare it in a column of `affinity`, so
    /// that e.g. `I32(1)` and `I64(1)` in a BIGINT key are the same key.
    pub fn key_value(&self, affinity: KeyAffinity) -> SqlValue {
        let integer = match self {
            SqlValue::I16(value) => Some(i64::from(*value)),
            SqlValue::I32(value) => Some(i64::from(*value)),
            SqlValue::I64(value) => Some(*value),
            _ => None,
        };

        match affinity {
            KeyAffinity::Exact => {
                let decimal = match self {
                    SqlValue::Numeric(value) => Some(*value),
                    SqlValue::F64(value) => Decimal::from_f64(*value),
                    _ => integer.map(Decimal::from),
                };
                match decimal {
                    Some(decimal) => SqlValue::Numeric(decimal.normalize()),
                    None => self.clone(),
                }
            }
            KeyAffinity::Float => {
                let float = match self {
                    SqlValue::F64(value) => Some(*value),
                    SqlValue::Numeric(value) => value.to_f64(),
                    _ => integer.map(|value| value as f64),
                };
                match float {
                    Some(float) if float.is_nan() => SqlValue::F64(f64::NAN),
                    // -0.0 == 0.0 in float8
                    Some(float) if float == 0.0 => SqlValue::F64(0.0),
                    Some(float) => SqlValue::F64(float),
                    None => self.clone(),
                }
            }
            KeyAffinity::Integer | KeyAffinity::Other => match integer {
                Some(integer) => SqlValue::I64(integer),
                None => self.clone(),
            },
        }
    }

    /// Integer values are widened or narrowed to whatever integer type the
    /// server inferred for the placeholder, since the cast in the statement
    /// decides the parameter type rather than the Rust value.
    fn write_integer(
        value: i64,
        ty: &PgType,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match *ty {
            PgType::INT2 => i16::try_from(value)?.to_sql(ty, out),
            PgType::INT4 => i32::try_from(value)?.to_sql(ty, out),
            PgType::INT8 => value.to_sql(ty, out),
            PgType::FLOAT8 => (value as f64).to_sql(ty, out),
            PgType::NUMERIC => Decimal::from(value).to_sql(ty, out),
            _ => value.to_string().to_sql(ty, out),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &PgType,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(value) => value.to_sql(ty, out),
            SqlValue::I16(value) => Self::write_integer(i64::from(*value), ty, out),
            SqlValue::I32(value) => Self::write_integer(i64::from(*value), ty, out),
            SqlValue::I64(value) => Self::write_integer(*value, ty, out),
            SqlValue::F64(value) => match *ty {
                PgType::NUMERIC => Decimal::from_f64(*value)
                    .ok_or_else(|| format!("{} can not be represented as NUMERIC", value))?
                    .to_sql(ty, out),
                _ => value.to_sql(ty, out),
            },
            SqlValue::Numeric(value) => value.to_sql(ty, out),
            SqlValue::String(value) => value.to_sql(ty, out),
            SqlValue::Bytes(value) => value.to_sql(ty, out),
            SqlValue::Json(value) => value.to_sql(ty, out),
            SqlValue::DateTime(value) => value.to_sql(ty, out),
            SqlValue::NaiveDateTime(value) => value.to_sql(ty, out),
            SqlValue::Date(value) => value.to_sql(ty, out),
            SqlValue::Uuid(value) => value.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &PgType) -> bool {
        true // the statement casts every placeholder
    }

    to_sql_checked!();
}

// Equality and hashing only serve key comparison, floats compare by bit pattern.
impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SqlValue::Null, SqlValue::Null) => true,
            (SqlValue::Bool(a), SqlValue::Bool(b)) => a == b,
            (SqlValue::I16(a), SqlValue::I16(b)) => a == b,
            (SqlValue::I32(a), SqlValue::I32(b)) => a == b,
            (SqlValue::I64(a), SqlValue::I64(b)) => a == b,
            (SqlValue::F64(a), SqlValue::F64(b)) => a.to_bits() == b.to_bits(),
            (SqlValue::Numeric(a), SqlValue::Numeric(b)) => a == b,
            (SqlValue::String(a), SqlValue::String(b)) => a == b,
            (SqlValue::Bytes(a), SqlValue::Bytes(b)) => a == b,
            (SqlValue::Json(a), SqlValue::Json(b)) => a.to_string() == b.to_string(),
            (SqlValue::DateTime(a), SqlValue::DateTime(b)) => a == b,
            (SqlValue::NaiveDateTime(a), SqlValue::NaiveDateTime(b)) => a == b,
            (SqlValue::Date(a), SqlValue::Date(b)) => a == b,
            (SqlValue::Uuid(a), SqlValue::Uuid(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SqlValue {}

impl Hash for SqlValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            SqlValue::Null => {}
            SqlValue::Bool(value) => value.hash(state),
            SqlValue::I16(value) => value.hash(state),
            SqlValue::I32(value) => value.hash(state),
            SqlValue::I64(value) => value.hash(state),
            SqlValue::F64(value) => value.to_bits().hash(state),
            SqlValue::Numeric(value) => value.hash(state),
            SqlValue::String(value) => value.hash(state),
            SqlValue::Bytes(value) => value.hash(state),
            SqlValue::Json(value) => value.to_string().hash(state),
            SqlValue::DateTime(value) => value.hash(state),
            SqlValue::NaiveDateTime(value) => value.hash(state),
            SqlValue::Date(value) => value.hash(state),
            SqlValue::Uuid(value) => value.hash(state),
        }
    }
}

macro_rules! impl_from_for_sql_value {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for SqlValue {
                fn from(value: $source) -> Self {
                    SqlValue::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_for_sql_value!(
    bool => Bool,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f64 => F64,
    Decimal => Numeric,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
    Value => Json,
    DateTime<Utc> => DateTime,
    NaiveDateTime => NaiveDateTime,
    NaiveDate => Date,
    Uuid => Uuid,
);

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}
