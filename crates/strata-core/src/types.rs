//! Declared SQL column types.

/// The declared type of a mapped column.
///
/// Drives DDL generation and the type-directed conversion applied to raw
/// values coming back from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Decimal { precision: u8, scale: u8 },
    Text,
    VarChar(u32),
    Blob,
    Date,
    Time,
    Timestamp,
    Json,
}

impl SqlType {
    /// Type name used in CREATE TABLE.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Decimal { precision, scale } => format!("DECIMAL({precision}, {scale})"),
            SqlType::Text => "TEXT".to_string(),
            SqlType::VarChar(n) => format!("VARCHAR({n})"),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Json => "JSON".to_string(),
        }
    }

    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt)
    }

    /// Whether two declarations can share one physical column.
    pub fn compatible_with(&self, other: &SqlType) -> bool {
        self == other
            || (self.is_integer() && other.is_integer())
            || matches!(
                (self, other),
                (SqlType::Text | SqlType::VarChar(_), SqlType::Text | SqlType::VarChar(_))
            )
    }
}
