//! Statement-related data models.
//!
//! A [`Statement`] is a named SQL text with optional vendor-specific variants keyed by
//! database id, so one mapper method can run against backends of different vendors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Named SQL statement with per-database-id variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    id: String,
    sql: String,
    variants: HashMap<String, String>,
}

impl Statement {
    pub fn new(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sql: sql.into(),
            variants: HashMap::new(),
        }
    }

    /// Ad-hoc statement whose id is its own text.
    pub fn raw(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self::new(sql.clone(), sql)
    }

    /// Register SQL used instead of the default on backends with `database_id`.
    pub fn with_variant(mut self, database_id: impl Into<String>, sql: impl Into<String>) -> Self {
        self.variants.insert(database_id.into(), sql.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// SQL text for a backend, falling back to the default when no variant matches.
    pub fn sql_for(&self, database_id: &str) -> &str {
        self.variants
            .get(database_id)
            .map(String::as_str)
            .unwrap_or(&self.sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_deserialize_untagged() {
        let params: Vec<QueryParam> = serde_json::from_str(r#"[null, true, 7, 1.5, "x"]"#).unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::Null,
                QueryParam::Bool(true),
                QueryParam::Int(7),
                QueryParam::Float(1.5),
                QueryParam::String("x".to_string()),
            ]
        );
    }

    #[test]
    fn test_param_type_name() {
        assert_eq!(QueryParam::from(3_i64).type_name(), "int");
        assert_eq!(QueryParam::from("a").type_name(), "string");
        assert!(QueryParam::Null.is_null());
    }

    #[test]
    fn test_statement_variant_selection() {
        let stmt = Statement::new("users.now", "SELECT CURRENT_TIMESTAMP")
            .with_variant("sqlite", "SELECT datetime('now')");

        assert_eq!(stmt.sql_for("sqlite"), "SELECT datetime('now')");
        assert_eq!(stmt.sql_for("postgresql"), "SELECT CURRENT_TIMESTAMP");
        assert_eq!(stmt.id(), "users.now");
    }

    #[test]
    fn test_raw_statement_uses_sql_as_id() {
        let stmt = Statement::raw("SELECT 1");
        assert_eq!(stmt.id(), "SELECT 1");
        assert_eq!(stmt.sql_for("mysql"), "SELECT 1");
    }
}
