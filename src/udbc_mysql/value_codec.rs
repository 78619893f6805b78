use crate::error::ExecError;
use crate::udbc::value::Value;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::Column;
use mysql_async::Value as MyValue;
use mysql_async::consts::ColumnType;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Character set id MySQL reports for binary columns.
const BINARY_CHARSET: u16 = 63;

/// Decodes a column value without widening or truncation. Text columns come
/// back as `Str`, DECIMAL columns as `Decimal`, binary columns as `Bytes`.
pub fn from_mysql_value(v: &MyValue, column: Option<&Column>) -> Value {
    match v {
        MyValue::NULL => Value::Null,
        MyValue::Int(i) => Value::I64(*i),
        MyValue::UInt(u) => Value::U64(*u),
        MyValue::Float(f) => Value::F32(*f),
        MyValue::Double(d) => Value::F64(*d),
        MyValue::Bytes(b) => decode_bytes(b, column),
        MyValue::Date(y, m, d, h, min, s, micro) => {
            let Some(date) = NaiveDate::from_ymd_opt(*y as i32, *m as u32, *d as u32) else {
                // zero dates ('0000-00-00') have no calendar value
                return Value::Null;
            };
            if *h == 0 && *min == 0 && *s == 0 && *micro == 0 {
                Value::Date(date)
            } else {
                date.and_hms_micro_opt(*h as u32, *min as u32, *s as u32, *micro)
                    .map_or(Value::Null, Value::DateTime)
            }
        }
        MyValue::Time(is_neg, days, h, min, s, micro) => {
            match NaiveTime::from_hms_micro_opt(*h as u32, *min as u32, *s as u32, *micro) {
                Some(t) if !*is_neg && *days == 0 => Value::Time(t),
                // MySQL TIME spans ±838 hours; keep out-of-day values as text.
                _ => Value::Str(format!(
                    "{}{}:{:02}:{:02}.{:06}",
                    if *is_neg { "-" } else { "" },
                    *days * 24 + *h as u32,
                    min,
                    s,
                    micro
                )),
            }
        }
    }
}

fn decode_bytes(bytes: &[u8], column: Option<&Column>) -> Value {
    let Some(column) = column else {
        return Value::Bytes(bytes.to_vec());
    };
    match column.column_type() {
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| Decimal::from_str(s).ok())
                .map_or_else(|| Value::Bytes(bytes.to_vec()), Value::Decimal)
        }
        _ if column.character_set() != BINARY_CHARSET => match std::str::from_utf8(bytes) {
            Ok(s) => Value::Str(s.to_string()),
            Err(_) => Value::Bytes(bytes.to_vec()),
        },
        _ => Value::Bytes(bytes.to_vec()),
    }
}

pub fn to_mysql_value(v: &Value) -> Result<MyValue, ExecError> {
    let out = match v {
        Value::Null => MyValue::NULL,
        Value::Bool(b) => MyValue::Int(if *b { 1 } else { 0 }),
        Value::I16(i) => MyValue::Int(*i as i64),
        Value::I32(i) => MyValue::Int(*i as i64),
        Value::I64(i) => MyValue::Int(*i),
        Value::U8(u) => MyValue::UInt(*u as u64),
        Value::U64(u) => MyValue::UInt(*u),
        Value::F32(f) => MyValue::Float(*f),
        Value::F64(f) => MyValue::Double(*f),
        Value::Str(s) => MyValue::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => MyValue::Bytes(b.clone()),
        Value::Date(d) => MyValue::Date(
            d.year() as u16,
            d.month() as u8,
            d.day() as u8,
            0u8,
            0u8,
            0u8,
            0u32,
        ),
        Value::Time(t) => MyValue::Time(
            false,
            0u32,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => datetime(dt),
        Value::DateTimeUtc(dt) => datetime(&dt.naive_utc()),
        Value::Decimal(d) => MyValue::Bytes(d.to_string().into_bytes()),
        Value::List(_) | Value::Map(_) => {
            return Err(ExecError::Fatal(
                "list and map values cannot be bound as mysql parameters".into(),
            ));
        }
    };
    Ok(out)
}

fn datetime(ndt: &NaiveDateTime) -> MyValue {
    MyValue::Date(
        ndt.date().year() as u16,
        ndt.date().month() as u8,
        ndt.date().day() as u8,
        ndt.time().hour() as u8,
        ndt.time().minute() as u8,
        ndt.time().second() as u8,
        ndt.and_utc().timestamp_subsec_micros(),
    )
}

/// Classifies a `mysql_async` error for the pool and executor.
pub fn classify(e: mysql_async::Error) -> ExecError {
    match &e {
        mysql_async::Error::Server(server) => match server.code {
            // deadlock, lock wait timeout, server shutdown, gone away, lost connection
            1213 | 1205 | 1053 | 2006 | 2013 => ExecError::Transient(e.to_string()),
            // duplicate key, foreign key, not null, check constraint
            1062 | 1586 | 1451 | 1452 | 1048 | 3819 => ExecError::ConstraintViolation(e.to_string()),
            _ => ExecError::Fatal(e.to_string()),
        },
        mysql_async::Error::Io(_) => ExecError::Transient(e.to_string()),
        _ => ExecError::Fatal(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_round_trip_without_widening() {
        assert_eq!(from_mysql_value(&MyValue::UInt(u64::MAX), None), Value::U64(u64::MAX));
        assert_eq!(from_mysql_value(&MyValue::Float(1.25), None), Value::F32(1.25));
        assert_eq!(from_mysql_value(&MyValue::NULL, None), Value::Null);
        assert_eq!(to_mysql_value(&Value::U64(7)).unwrap(), MyValue::UInt(7));
    }

    #[test]
    fn test_zero_date_is_null() {
        assert_eq!(
            from_mysql_value(&MyValue::Date(0, 0, 0, 0, 0, 0, 0), None),
            Value::Null
        );
    }

    #[test]
    fn test_list_parameter_rejected() {
        assert!(to_mysql_value(&Value::List(vec![])).is_err());
    }
}
