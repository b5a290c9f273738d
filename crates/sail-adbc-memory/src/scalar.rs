use chrono::{DateTime, NaiveTime, Timelike};
use datafusion::common::ScalarValue;
use sail_adbc::types::SqlValue;

fn time_micros(time: &NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight()) * 1_000_000 + i64::from(time.nanosecond()) / 1_000
}

/// Converts a bound parameter to a literal for placeholder substitution.
pub(crate) fn scalar_from_sql_value(value: &SqlValue) -> ScalarValue {
    match value {
        SqlValue::Null => ScalarValue::Null,
        SqlValue::Boolean(v) => ScalarValue::Boolean(Some(*v)),
        SqlValue::SmallInt(v) => ScalarValue::Int16(Some(*v)),
        SqlValue::Integer(v) => ScalarValue::Int32(Some(*v)),
        SqlValue::BigInt(v) => ScalarValue::Int64(Some(*v)),
        SqlValue::Real(v) => ScalarValue::Float32(Some(*v)),
        SqlValue::Double(v) => ScalarValue::Float64(Some(*v)),
        SqlValue::Decimal {
            value,
            precision,
            scale,
        } => ScalarValue::Decimal128(Some(*value), *precision, *scale),
        SqlValue::Varchar(v) => ScalarValue::Utf8(Some(v.clone())),
        SqlValue::Varbinary(v) => ScalarValue::Binary(Some(v.clone())),
        SqlValue::Date(v) => {
            let days = v
                .signed_duration_since(DateTime::UNIX_EPOCH.date_naive())
                .num_days();
            ScalarValue::Date32(i32::try_from(days).ok())
        }
        SqlValue::Time(v) => ScalarValue::Time64Microsecond(Some(time_micros(v))),
        SqlValue::Timestamp(v) => {
            ScalarValue::TimestampMicrosecond(Some(v.and_utc().timestamp_micros()), None)
        }
        SqlValue::TimestampWithTimeZone(v) => {
            ScalarValue::TimestampMicrosecond(Some(v.timestamp_micros()), Some("UTC".into()))
        }
    }
}
