//! Row to JSON conversion.
//!
//! Columns are first classified into a [`ColumnKind`] from the driver's type name, then
//! decoded with the vendor's Rust types. Anything that fails to decode becomes `null`.

use crate::models::DatabaseType;
use serde_json::Value;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

/// One result row keyed by column name.
pub type JsonRow = serde_json::Map<String, Value>;

/// Logical kind of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Text,
}

impl ColumnKind {
    pub fn classify(type_name: &str, db: DatabaseType) -> Self {
        let lower = type_name.to_lowercase();

        if lower.contains("decimal") || lower.contains("numeric") {
            // SQLite has no exact numeric storage.
            return if db == DatabaseType::SQLite {
                Self::Float
            } else {
                Self::Decimal
            };
        }
        if lower == "bool" || lower == "boolean" {
            return Self::Boolean;
        }
        if lower.contains("int") || lower.contains("serial") {
            return Self::Integer;
        }
        if lower.contains("float") || lower.contains("double") || lower == "real" {
            return Self::Float;
        }
        if lower == "json" || lower == "jsonb" {
            return Self::Json;
        }
        if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
            return Self::Binary;
        }
        Self::Text
    }
}

/// Exact DECIMAL/NUMERIC text as sent by the server.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Binary column value, base64 encoded.
pub fn encode_binary(bytes: &[u8]) -> Value {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    Value::String(STANDARD.encode(bytes))
}

fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    T: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(v.to_string()))
}

/// First integer type in the list that decodes the column.
macro_rules! first_integer {
    ($row:expr, $idx:expr, [$($ty:ty),+]) => {{
        let mut value = Value::Null;
        $(
            if value.is_null() {
                if let Some(v) = get::<_, $ty>($row, $idx) {
                    value = Value::Number(v.into());
                }
            }
        )+
        value
    }};
}

fn text(raw: Option<String>, kind_hint: &str) -> Value {
    match raw {
        Some(s) if kind_hint.to_lowercase().contains("json") => {
            serde_json::from_str(&s).unwrap_or(Value::String(s))
        }
        Some(s) => Value::String(s),
        None => Value::Null,
    }
}

fn decode_mysql(row: &MySqlRow, idx: usize, kind: ColumnKind, type_name: &str) -> Value {
    match kind {
        ColumnKind::Decimal => get::<_, RawDecimal>(row, idx)
            .map(|d| Value::String(d.0))
            .unwrap_or(Value::Null),
        ColumnKind::Integer => first_integer!(row, idx, [i64, i32, i16, i8, u64, u32, u16, u8]),
        ColumnKind::Boolean => get::<_, bool>(row, idx).map_or(Value::Null, Value::Bool),
        ColumnKind::Float => get::<_, f64>(row, idx)
            .or_else(|| get::<_, f32>(row, idx).map(f64::from))
            .map_or(Value::Null, float),
        ColumnKind::Binary => get::<_, Vec<u8>>(row, idx).map_or(Value::Null, |b| encode_binary(&b)),
        ColumnKind::Json => get::<_, Value>(row, idx).unwrap_or(Value::Null),
        ColumnKind::Text => text(get::<_, String>(row, idx), type_name),
    }
}

fn decode_postgres(row: &PgRow, idx: usize, kind: ColumnKind, type_name: &str) -> Value {
    match kind {
        ColumnKind::Decimal => get::<_, RawDecimal>(row, idx)
            .map(|d| Value::String(d.0))
            .unwrap_or(Value::Null),
        ColumnKind::Integer => first_integer!(row, idx, [i64, i32, i16]),
        ColumnKind::Boolean => get::<_, bool>(row, idx).map_or(Value::Null, Value::Bool),
        ColumnKind::Float => get::<_, f64>(row, idx)
            .or_else(|| get::<_, f32>(row, idx).map(f64::from))
            .map_or(Value::Null, float),
        ColumnKind::Binary => get::<_, Vec<u8>>(row, idx).map_or(Value::Null, |b| encode_binary(&b)),
        ColumnKind::Json => get::<_, Value>(row, idx).unwrap_or(Value::Null),
        ColumnKind::Text => text(get::<_, String>(row, idx), type_name),
    }
}

fn decode_sqlite(row: &SqliteRow, idx: usize, kind: ColumnKind, type_name: &str) -> Value {
    match kind {
        ColumnKind::Integer => first_integer!(row, idx, [i64]),
        ColumnKind::Boolean => get::<_, bool>(row, idx).map_or(Value::Null, Value::Bool),
        ColumnKind::Float | ColumnKind::Decimal => get::<_, f64>(row, idx).map_or(Value::Null, float),
        ColumnKind::Binary => get::<_, Vec<u8>>(row, idx).map_or(Value::Null, |b| encode_binary(&b)),
        ColumnKind::Json | ColumnKind::Text => text(get::<_, String>(row, idx), type_name),
    }
}

/// Conversion of a driver row into a [`JsonRow`].
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
}

macro_rules! impl_row_to_json {
    ($row:ty, $db:expr, $decode:ident) => {
        impl RowToJson for $row {
            fn to_json_map(&self) -> JsonRow {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let type_name = col.type_info().name();
                        let kind = ColumnKind::classify(type_name, $db);
                        (col.name().to_string(), $decode(self, idx, kind, type_name))
                    })
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DatabaseType::MySQL, decode_mysql);
impl_row_to_json!(PgRow, DatabaseType::PostgreSQL, decode_postgres);
impl_row_to_json!(SqliteRow, DatabaseType::SQLite, decode_sqlite);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_column_types() {
        assert_eq!(ColumnKind::classify("INT8", DatabaseType::PostgreSQL), ColumnKind::Integer);
        assert_eq!(ColumnKind::classify("BIGINT UNSIGNED", DatabaseType::MySQL), ColumnKind::Integer);
        assert_eq!(ColumnKind::classify("BOOLEAN", DatabaseType::SQLite), ColumnKind::Boolean);
        assert_eq!(ColumnKind::classify("jsonb", DatabaseType::PostgreSQL), ColumnKind::Json);
        assert_eq!(ColumnKind::classify("BLOB", DatabaseType::SQLite), ColumnKind::Binary);
        assert_eq!(ColumnKind::classify("VARCHAR", DatabaseType::MySQL), ColumnKind::Text);
    }

    #[test]
    fn test_classify_numeric_depends_on_vendor() {
        assert_eq!(ColumnKind::classify("NUMERIC", DatabaseType::PostgreSQL), ColumnKind::Decimal);
        assert_eq!(ColumnKind::classify("NUMERIC", DatabaseType::SQLite), ColumnKind::Float);
    }

    #[test]
    fn test_encode_binary_is_base64() {
        assert_eq!(encode_binary(b"hi"), Value::String("aGk=".to_string()));
    }

    #[test]
    fn test_text_parses_json_columns() {
        assert_eq!(text(Some(r#"{"a":1}"#.to_string()), "JSON"), serde_json::json!({"a": 1}));
        assert_eq!(text(Some("plain".to_string()), "TEXT"), Value::String("plain".to_string()));
        assert_eq!(text(None, "TEXT"), Value::Null);
    }

    #[tokio::test]
    async fn test_sqlite_row_to_json() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (n INTEGER, s TEXT, f REAL, z TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t VALUES (1, 'x', 2.5, NULL)")
            .execute(&pool)
            .await
            .unwrap();

        let row: SqliteRow = sqlx::query("SELECT n, s, f, z FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();

        let map = row.to_json_map();
        assert_eq!(map["n"], serde_json::json!(1));
        assert_eq!(map["s"], serde_json::json!("x"));
        assert_eq!(map["f"], serde_json::json!(2.5));
        assert_eq!(map["z"], Value::Null);
    }
}
