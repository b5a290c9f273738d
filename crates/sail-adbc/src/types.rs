use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::{DriverError, DriverResult};

/// The column type of a backend table or result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal { precision: u8, scale: i8 },
    Varchar,
    Varbinary,
    Date,
    Time,
    Timestamp,
    TimestampWithTimeZone,
    /// A backend-specific type the core has no mapping for.
    Other(String),
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::SmallInt => write!(f, "SMALLINT"),
            SqlType::Integer => write!(f, "INTEGER"),
            SqlType::BigInt => write!(f, "BIGINT"),
            SqlType::Real => write!(f, "REAL"),
            SqlType::Double => write!(f, "DOUBLE"),
            SqlType::Decimal { precision, scale } => write!(f, "DECIMAL({precision}, {scale})"),
            SqlType::Varchar => write!(f, "VARCHAR"),
            SqlType::Varbinary => write!(f, "VARBINARY"),
            SqlType::Date => write!(f, "DATE"),
            SqlType::Time => write!(f, "TIME"),
            SqlType::Timestamp => write!(f, "TIMESTAMP"),
            SqlType::TimestampWithTimeZone => write!(f, "TIMESTAMP WITH TIME ZONE"),
            SqlType::Other(name) => write!(f, "{name}"),
        }
    }
}

/// A single cell exchanged with a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Decimal {
        value: i128,
        precision: u8,
        scale: i8,
    },
    Varchar(String),
    Varbinary(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampWithTimeZone(DateTime<Utc>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// The backend type of the value, or [`None`] for `NULL`.
    pub fn sql_type(&self) -> Option<SqlType> {
        let sql_type = match self {
            SqlValue::Null => return None,
            SqlValue::Boolean(_) => SqlType::Boolean,
            SqlValue::SmallInt(_) => SqlType::SmallInt,
            SqlValue::Integer(_) => SqlType::Integer,
            SqlValue::BigInt(_) => SqlType::BigInt,
            SqlValue::Real(_) => SqlType::Real,
            SqlValue::Double(_) => SqlType::Double,
            SqlValue::Decimal {
                precision, scale, ..
            } => SqlType::Decimal {
                precision: *precision,
                scale: *scale,
            },
            SqlValue::Varchar(_) => SqlType::Varchar,
            SqlValue::Varbinary(_) => SqlType::Varbinary,
            SqlValue::Date(_) => SqlType::Date,
            SqlValue::Time(_) => SqlType::Time,
            SqlValue::Timestamp(_) => SqlType::Timestamp,
            SqlValue::TimestampWithTimeZone(_) => SqlType::TimestampWithTimeZone,
        };
        Some(sql_type)
    }
}

/// A row of backend values, one per column.
pub type Row = Vec<SqlValue>;

/// Backend metadata for one column of a result set or table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, sql_type: SqlType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable,
        }
    }
}

/// Maps a logical column type to the backend type used to store it.
///
/// Nested types and types the backend cannot represent are rejected
/// rather than coerced.
pub fn sql_type_from_arrow(data_type: &DataType) -> DriverResult<SqlType> {
    let sql_type = match data_type {
        DataType::Boolean => SqlType::Boolean,
        DataType::Int8 | DataType::Int16 | DataType::UInt8 => SqlType::SmallInt,
        DataType::Int32 | DataType::UInt16 => SqlType::Integer,
        DataType::Int64 | DataType::UInt32 => SqlType::BigInt,
        DataType::Float32 => SqlType::Real,
        DataType::Float64 => SqlType::Double,
        DataType::Decimal128(precision, scale) => SqlType::Decimal {
            precision: *precision,
            scale: *scale,
        },
        DataType::Utf8 | DataType::LargeUtf8 => SqlType::Varchar,
        DataType::Binary | DataType::LargeBinary => SqlType::Varbinary,
        DataType::Date32 | DataType::Date64 => SqlType::Date,
        DataType::Time32(_) | DataType::Time64(_) => SqlType::Time,
        DataType::Timestamp(_, None) => SqlType::Timestamp,
        DataType::Timestamp(_, Some(_)) => SqlType::TimestampWithTimeZone,
        DataType::List(_)
        | DataType::LargeList(_)
        | DataType::FixedSizeList(_, _)
        | DataType::ListView(_)
        | DataType::LargeListView(_)
        | DataType::Struct(_)
        | DataType::Union(_, _)
        | DataType::Map(_, _) => {
            return Err(DriverError::unsupported(format!(
                "nested type {data_type} is not supported"
            )))
        }
        other => {
            return Err(DriverError::unsupported(format!(
                "type {other} cannot be represented by the backend"
            )))
        }
    };
    Ok(sql_type)
}

/// Maps a backend column type to the logical type of the result column.
/// All timestamps are normalized to the session time zone.
pub fn arrow_type_from_sql(sql_type: &SqlType, time_zone: &str) -> DriverResult<DataType> {
    let data_type = match sql_type {
        SqlType::Boolean => DataType::Boolean,
        SqlType::SmallInt => DataType::Int16,
        SqlType::Integer => DataType::Int32,
        SqlType::BigInt => DataType::Int64,
        SqlType::Real => DataType::Float32,
        SqlType::Double => DataType::Float64,
        SqlType::Decimal { precision, scale } => DataType::Decimal128(*precision, *scale),
        SqlType::Varchar => DataType::Utf8,
        SqlType::Varbinary => DataType::Binary,
        SqlType::Date => DataType::Date32,
        SqlType::Time => DataType::Time64(TimeUnit::Microsecond),
        SqlType::Timestamp | SqlType::TimestampWithTimeZone => {
            DataType::Timestamp(TimeUnit::Microsecond, Some(Arc::from(time_zone)))
        }
        SqlType::Other(name) => {
            return Err(DriverError::unsupported(format!(
                "backend type {name} has no columnar mapping"
            )))
        }
    };
    Ok(data_type)
}

/// Infers the schema of a result set from backend column metadata.
pub fn schema_from_columns(columns: &[ColumnMetadata], time_zone: &str) -> DriverResult<SchemaRef> {
    let fields = columns
        .iter()
        .map(|column| {
            let data_type = arrow_type_from_sql(&column.sql_type, time_zone).map_err(|e| {
                DriverError::unsupported(format!("column {}: {e}", column.name))
            })?;
            Ok(Field::new(&column.name, data_type, column.nullable))
        })
        .collect::<DriverResult<Vec<_>>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

/// Derives backend column definitions from the schema of a bound batch.
pub fn columns_from_schema(schema: &Schema) -> DriverResult<Vec<ColumnMetadata>> {
    schema
        .fields()
        .iter()
        .map(|field| {
            let sql_type = sql_type_from_arrow(field.data_type()).map_err(|e| {
                DriverError::unsupported(format!("field {}: {e}", field.name()))
            })?;
            Ok(ColumnMetadata::new(
                field.name(),
                sql_type,
                field.is_nullable(),
            ))
        })
        .collect()
}
