//! Transposition between column-major batches and row-major backend values.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayData, ArrayRef, AsArray, BinaryBuilder, BooleanBuilder, Date32Builder,
    Decimal128Builder, Float32Builder, Float64Builder, Int16Builder, Int32Builder, Int64Builder,
    PrimitiveArray, RecordBatch, RecordBatchOptions, StringBuilder, Time64MicrosecondBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{
    ArrowPrimitiveType, ArrowTemporalType, DataType, Date32Type, Date64Type, Decimal128Type,
    FieldRef, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, SchemaRef,
    Time32MillisecondType, Time32SecondType, Time64MicrosecondType, Time64NanosecondType,
    TimeUnit, TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt16Type, UInt32Type, UInt8Type,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{DriverError, DriverResult};
use crate::types::{Row, SqlType, SqlValue};

/// Reads one non-null cell of an array as a backend value.
type CellEncoder = fn(&dyn Array, usize) -> DriverResult<SqlValue>;

fn primitive<T: ArrowPrimitiveType>(array: &dyn Array) -> DriverResult<&PrimitiveArray<T>> {
    array.as_primitive_opt::<T>().ok_or_else(|| {
        DriverError::execution(format!(
            "expected {} array, found {}",
            T::DATA_TYPE,
            array.data_type()
        ))
    })
}

fn mismatch(array: &dyn Array) -> DriverError {
    DriverError::execution(format!("unexpected array type {}", array.data_type()))
}

fn out_of_range(array: &dyn Array, row: usize) -> DriverError {
    DriverError::execution(format!("{} value out of range", array.data_type())).at_row(row)
}

fn encode_date<T>(array: &dyn Array, row: usize) -> DriverResult<SqlValue>
where
    T: ArrowTemporalType,
    i64: From<T::Native>,
{
    let value = primitive::<T>(array)?.value_as_date(row);
    value
        .map(SqlValue::Date)
        .ok_or_else(|| out_of_range(array, row))
}

fn encode_time<T>(array: &dyn Array, row: usize) -> DriverResult<SqlValue>
where
    T: ArrowTemporalType,
    i64: From<T::Native>,
{
    let value = primitive::<T>(array)?.value_as_time(row);
    value
        .map(SqlValue::Time)
        .ok_or_else(|| out_of_range(array, row))
}

fn encode_timestamp<T>(array: &dyn Array, row: usize) -> DriverResult<SqlValue>
where
    T: ArrowTemporalType,
    i64: From<T::Native>,
{
    let value = primitive::<T>(array)?
        .value_as_datetime(row)
        .ok_or_else(|| out_of_range(array, row))?;
    match array.data_type() {
        DataType::Timestamp(_, None) => Ok(SqlValue::Timestamp(value)),
        _ => Ok(SqlValue::TimestampWithTimeZone(value.and_utc())),
    }
}

/// Looks up the cell encoder for a logical type.
fn encoder_for(data_type: &DataType) -> DriverResult<CellEncoder> {
    let encoder: CellEncoder = match data_type {
        DataType::Boolean => |a, i| {
            let array = a.as_boolean_opt().ok_or_else(|| mismatch(a))?;
            Ok(SqlValue::Boolean(array.value(i)))
        },
        DataType::Int8 => |a, i| {
            let value = primitive::<Int8Type>(a)?.value(i);
            Ok(SqlValue::SmallInt(value.into()))
        },
        DataType::Int16 => |a, i| Ok(SqlValue::SmallInt(primitive::<Int16Type>(a)?.value(i))),
        DataType::UInt8 => |a, i| {
            let value = primitive::<UInt8Type>(a)?.value(i);
            Ok(SqlValue::SmallInt(value.into()))
        },
        DataType::Int32 => |a, i| Ok(SqlValue::Integer(primitive::<Int32Type>(a)?.value(i))),
        DataType::UInt16 => |a, i| {
            let value = primitive::<UInt16Type>(a)?.value(i);
            Ok(SqlValue::Integer(value.into()))
        },
        DataType::Int64 => |a, i| Ok(SqlValue::BigInt(primitive::<Int64Type>(a)?.value(i))),
        DataType::UInt32 => |a, i| {
            let value = primitive::<UInt32Type>(a)?.value(i);
            Ok(SqlValue::BigInt(value.into()))
        },
        DataType::Float32 => |a, i| Ok(SqlValue::Real(primitive::<Float32Type>(a)?.value(i))),
        DataType::Float64 => |a, i| Ok(SqlValue::Double(primitive::<Float64Type>(a)?.value(i))),
        DataType::Decimal128(_, _) => |a, i| {
            let array = primitive::<Decimal128Type>(a)?;
            Ok(SqlValue::Decimal {
                value: array.value(i),
                precision: array.precision(),
                scale: array.scale(),
            })
        },
        DataType::Utf8 => |a, i| {
            let array = a.as_string_opt::<i32>().ok_or_else(|| mismatch(a))?;
            Ok(SqlValue::Varchar(array.value(i).to_string()))
        },
        DataType::LargeUtf8 => |a, i| {
            let array = a.as_string_opt::<i64>().ok_or_else(|| mismatch(a))?;
            Ok(SqlValue::Varchar(array.value(i).to_string()))
        },
        DataType::Binary => |a, i| {
            let array = a.as_binary_opt::<i32>().ok_or_else(|| mismatch(a))?;
            Ok(SqlValue::Varbinary(array.value(i).to_vec()))
        },
        DataType::LargeBinary => |a, i| {
            let array = a.as_binary_opt::<i64>().ok_or_else(|| mismatch(a))?;
            Ok(SqlValue::Varbinary(array.value(i).to_vec()))
        },
        DataType::Date32 => encode_date::<Date32Type>,
        DataType::Date64 => encode_date::<Date64Type>,
        DataType::Time32(TimeUnit::Second) => encode_time::<Time32SecondType>,
        DataType::Time32(TimeUnit::Millisecond) => encode_time::<Time32MillisecondType>,
        DataType::Time64(TimeUnit::Microsecond) => encode_time::<Time64MicrosecondType>,
        DataType::Time64(TimeUnit::Nanosecond) => encode_time::<Time64NanosecondType>,
        DataType::Timestamp(TimeUnit::Second, _) => encode_timestamp::<TimestampSecondType>,
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            encode_timestamp::<TimestampMillisecondType>
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            encode_timestamp::<TimestampMicrosecondType>
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => encode_timestamp::<TimestampNanosecondType>,
        other => {
            return Err(DriverError::unsupported(format!(
                "cannot bind values of type {other}"
            )))
        }
    };
    Ok(encoder)
}

/// Transposes a batch into one parameter tuple per row.
pub fn record_batch_to_rows(batch: &RecordBatch) -> DriverResult<Vec<Row>> {
    let schema = batch.schema();
    let encoders = schema
        .fields()
        .iter()
        .map(|field| {
            encoder_for(field.data_type())
                .map_err(|e| DriverError::unsupported(format!("field {}: {e}", field.name())))
        })
        .collect::<DriverResult<Vec<_>>>()?;
    (0..batch.num_rows())
        .map(|row| {
            batch
                .columns()
                .iter()
                .zip(encoders.iter())
                .map(|(column, encode)| {
                    if column.is_null(row) {
                        Ok(SqlValue::Null)
                    } else {
                        encode(column.as_ref(), row).map_err(|e| e.at_row(row))
                    }
                })
                .collect::<DriverResult<Row>>()
        })
        .collect()
}

fn unix_epoch_date() -> NaiveDate {
    DateTime::UNIX_EPOCH.date_naive()
}

fn time_to_micros(time: &NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight()) * 1_000_000 + i64::from(time.nanosecond()) / 1_000
}

enum ColumnBuilder {
    Boolean(BooleanBuilder),
    Int16(Int16Builder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    Decimal128 {
        builder: Decimal128Builder,
        precision: u8,
        scale: i8,
    },
    Utf8(StringBuilder),
    Binary(BinaryBuilder),
    Date32(Date32Builder),
    Time64(Time64MicrosecondBuilder),
    Timestamp {
        builder: TimestampMicrosecondBuilder,
        time_zone: Option<Tz>,
    },
}

impl ColumnBuilder {
    fn try_new(data_type: &DataType, capacity: usize) -> DriverResult<Self> {
        let builder = match data_type {
            DataType::Boolean => Self::Boolean(BooleanBuilder::with_capacity(capacity)),
            DataType::Int16 => Self::Int16(Int16Builder::with_capacity(capacity)),
            DataType::Int32 => Self::Int32(Int32Builder::with_capacity(capacity)),
            DataType::Int64 => Self::Int64(Int64Builder::with_capacity(capacity)),
            DataType::Float32 => Self::Float32(Float32Builder::with_capacity(capacity)),
            DataType::Float64 => Self::Float64(Float64Builder::with_capacity(capacity)),
            DataType::Decimal128(precision, scale) => Self::Decimal128 {
                builder: Decimal128Builder::with_capacity(capacity)
                    .with_precision_and_scale(*precision, *scale)?,
                precision: *precision,
                scale: *scale,
            },
            DataType::Utf8 => Self::Utf8(StringBuilder::with_capacity(capacity, capacity * 8)),
            DataType::Binary => Self::Binary(BinaryBuilder::with_capacity(capacity, capacity * 8)),
            DataType::Date32 => Self::Date32(Date32Builder::with_capacity(capacity)),
            DataType::Time64(TimeUnit::Microsecond) => {
                Self::Time64(Time64MicrosecondBuilder::with_capacity(capacity))
            }
            DataType::Timestamp(TimeUnit::Microsecond, tz) => {
                let time_zone = tz
                    .as_deref()
                    .map(|tz| {
                        tz.parse::<Tz>().map_err(|e| {
                            DriverError::unsupported(format!("time zone {tz}: {e}"))
                        })
                    })
                    .transpose()?;
                Self::Timestamp {
                    builder: TimestampMicrosecondBuilder::with_capacity(capacity)
                        .with_timezone_opt(tz.clone()),
                    time_zone,
                }
            }
            other => {
                return Err(DriverError::unsupported(format!(
                    "cannot materialize columns of type {other}"
                )))
            }
        };
        Ok(builder)
    }

    fn append_null(&mut self) {
        match self {
            Self::Boolean(b) => b.append_null(),
            Self::Int16(b) => b.append_null(),
            Self::Int32(b) => b.append_null(),
            Self::Int64(b) => b.append_null(),
            Self::Float32(b) => b.append_null(),
            Self::Float64(b) => b.append_null(),
            Self::Decimal128 { builder, .. } => builder.append_null(),
            Self::Utf8(b) => b.append_null(),
            Self::Binary(b) => b.append_null(),
            Self::Date32(b) => b.append_null(),
            Self::Time64(b) => b.append_null(),
            Self::Timestamp { builder, .. } => builder.append_null(),
        }
    }

    /// Appends a non-null value, widening numeric types where lossless.
    fn append(&mut self, value: &SqlValue) -> DriverResult<()> {
        match (self, value) {
            (Self::Boolean(b), SqlValue::Boolean(v)) => b.append_value(*v),
            (Self::Int16(b), SqlValue::SmallInt(v)) => b.append_value(*v),
            (Self::Int32(b), SqlValue::SmallInt(v)) => b.append_value((*v).into()),
            (Self::Int32(b), SqlValue::Integer(v)) => b.append_value(*v),
            (Self::Int64(b), SqlValue::SmallInt(v)) => b.append_value((*v).into()),
            (Self::Int64(b), SqlValue::Integer(v)) => b.append_value((*v).into()),
            (Self::Int64(b), SqlValue::BigInt(v)) => b.append_value(*v),
            (Self::Float32(b), SqlValue::Real(v)) => b.append_value(*v),
            (Self::Float64(b), SqlValue::Real(v)) => b.append_value((*v).into()),
            (Self::Float64(b), SqlValue::Double(v)) => b.append_value(*v),
            (
                Self::Decimal128 { builder, scale, .. },
                SqlValue::Decimal {
                    value, scale: s, ..
                },
            )
                if *scale == *s =>
            {
                builder.append_value(*value)
            }
            (Self::Utf8(b), SqlValue::Varchar(v)) => b.append_value(v),
            (Self::Binary(b), SqlValue::Varbinary(v)) => b.append_value(v),
            (Self::Date32(b), SqlValue::Date(v)) => {
                let days = v.signed_duration_since(unix_epoch_date()).num_days();
                let days = i32::try_from(days)
                    .map_err(|_| DriverError::execution(format!("date {v} out of range")))?;
                b.append_value(days)
            }
            (Self::Time64(b), SqlValue::Time(v)) => b.append_value(time_to_micros(v)),
            (Self::Timestamp { builder, time_zone }, SqlValue::Timestamp(v)) => {
                let instant = localize(v, time_zone.as_ref())?;
                builder.append_value(instant.timestamp_micros())
            }
            (Self::Timestamp { builder, .. }, SqlValue::TimestampWithTimeZone(v)) => {
                builder.append_value(v.timestamp_micros())
            }
            (builder, value) => {
                return Err(DriverError::execution(format!(
                    "cannot store {} value in a {} column",
                    value
                        .sql_type()
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "NULL".to_string()),
                    builder.name()
                )))
            }
        }
        Ok(())
    }

    fn name(&self) -> SqlType {
        match self {
            Self::Boolean(_) => SqlType::Boolean,
            Self::Int16(_) => SqlType::SmallInt,
            Self::Int32(_) => SqlType::Integer,
            Self::Int64(_) => SqlType::BigInt,
            Self::Float32(_) => SqlType::Real,
            Self::Float64(_) => SqlType::Double,
            Self::Decimal128 {
                precision, scale, ..
            } => SqlType::Decimal {
                precision: *precision,
                scale: *scale,
            },
            Self::Utf8(_) => SqlType::Varchar,
            Self::Binary(_) => SqlType::Varbinary,
            Self::Date32(_) => SqlType::Date,
            Self::Time64(_) => SqlType::Time,
            Self::Timestamp { .. } => SqlType::Timestamp,
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            Self::Boolean(b) => Arc::new(b.finish()),
            Self::Int16(b) => Arc::new(b.finish()),
            Self::Int32(b) => Arc::new(b.finish()),
            Self::Int64(b) => Arc::new(b.finish()),
            Self::Float32(b) => Arc::new(b.finish()),
            Self::Float64(b) => Arc::new(b.finish()),
            Self::Decimal128 { builder, .. } => Arc::new(builder.finish()),
            Self::Utf8(b) => Arc::new(b.finish()),
            Self::Binary(b) => Arc::new(b.finish()),
            Self::Date32(b) => Arc::new(b.finish()),
            Self::Time64(b) => Arc::new(b.finish()),
            Self::Timestamp { builder, .. } => Arc::new(builder.finish()),
        }
    }
}

/// Interprets a naive backend timestamp in the session time zone.
fn localize(value: &NaiveDateTime, time_zone: Option<&Tz>) -> DriverResult<DateTime<Utc>> {
    match time_zone {
        None => Ok(value.and_utc()),
        Some(tz) => tz
            .from_local_datetime(value)
            .single()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| {
                DriverError::execution(format!("timestamp {value} is ambiguous in {tz}"))
            }),
    }
}

fn append_cell(
    builder: &mut ColumnBuilder,
    field: &FieldRef,
    value: &SqlValue,
) -> DriverResult<()> {
    if value.is_null() {
        if !field.is_nullable() {
            return Err(DriverError::execution(format!(
                "column {} is not nullable",
                field.name()
            )));
        }
        builder.append_null();
        Ok(())
    } else {
        builder
            .append(value)
            .map_err(|e| DriverError::execution(format!("column {}: {e}", field.name())))
    }
}

/// Materializes backend rows as a batch of the given schema.
pub fn rows_to_record_batch(schema: SchemaRef, rows: &[Row]) -> DriverResult<RecordBatch> {
    let mut builders = schema
        .fields()
        .iter()
        .map(|field| ColumnBuilder::try_new(field.data_type(), rows.len()))
        .collect::<DriverResult<Vec<_>>>()?;
    for (index, row) in rows.iter().enumerate() {
        if row.len() != builders.len() {
            return Err(DriverError::execution(format!(
                "expected {} values, found {}",
                builders.len(),
                row.len()
            ))
            .at_row(index));
        }
        for ((builder, field), value) in builders.iter_mut().zip(schema.fields()).zip(row) {
            append_cell(builder, field, value).map_err(|e| e.at_row(index))?;
        }
    }
    let columns = builders.iter_mut().map(|b| b.finish()).collect::<Vec<_>>();
    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    let batch = RecordBatch::try_new_with_options(schema, columns, &options)?;
    Ok(batch)
}

fn array_body_length(data: &ArrayData) -> usize {
    let buffers = data.buffers().iter().map(|b| b.len()).sum::<usize>();
    let nulls = data.nulls().map(|n| n.buffer().len()).unwrap_or(0);
    let children = data
        .child_data()
        .iter()
        .map(array_body_length)
        .sum::<usize>();
    buffers + nulls + children
}

/// The total size of the buffers backing a batch.
pub fn batch_body_length(batch: &RecordBatch) -> usize {
    batch
        .columns()
        .iter()
        .map(|column| array_body_length(&column.to_data()))
        .sum()
}
