//! Flattens a `Serialize` argument into statement parameters.
//!
//! Scalars become a single [`Value`]; tuples and sequences become
//! [`Value::List`]; structs and maps become [`Value::Map`] in field order so
//! that positional placeholders line up with the declaration order.
//! Enum variants carrying data have no parameter form and are rejected.

use crate::error::DbError;
use crate::udbc::value::Value;
use serde::Serialize;
use serde::ser::{self, Impossible};

pub fn to_value<T: Serialize + ?Sized>(t: &T) -> Result<Value, DbError> {
    t.serialize(ParamSerializer)
}

struct ParamSerializer;

fn unsupported(what: &str) -> DbError {
    DbError::Value(format!("{} cannot be bound as a statement parameter", what))
}

impl ser::Serializer for ParamSerializer {
    type Ok = Value;
    type Error = DbError;
    type SerializeSeq = ListParams;
    type SerializeTuple = ListParams;
    type SerializeTupleStruct = ListParams;
    type SerializeTupleVariant = Impossible<Value, DbError>;
    type SerializeMap = FieldParams;
    type SerializeStruct = FieldParams;
    type SerializeStructVariant = Impossible<Value, DbError>;

    fn serialize_bool(self, v: bool) -> Result<Value, DbError> {
        Ok(Value::Bool(v))
    }
    fn serialize_i8(self, v: i8) -> Result<Value, DbError> {
        Ok(Value::I16(v.into()))
    }
    fn serialize_i16(self, v: i16) -> Result<Value, DbError> {
        Ok(Value::I16(v))
    }
    fn serialize_i32(self, v: i32) -> Result<Value, DbError> {
        Ok(Value::I32(v))
    }
    fn serialize_i64(self, v: i64) -> Result<Value, DbError> {
        Ok(Value::I64(v))
    }
    fn serialize_u8(self, v: u8) -> Result<Value, DbError> {
        Ok(Value::U8(v))
    }
    fn serialize_u16(self, v: u16) -> Result<Value, DbError> {
        Ok(Value::I32(v.into()))
    }
    fn serialize_u32(self, v: u32) -> Result<Value, DbError> {
        Ok(Value::I64(v.into()))
    }
    fn serialize_u64(self, v: u64) -> Result<Value, DbError> {
        Ok(Value::U64(v))
    }
    fn serialize_f32(self, v: f32) -> Result<Value, DbError> {
        Ok(Value::F32(v))
    }
    fn serialize_f64(self, v: f64) -> Result<Value, DbError> {
        Ok(Value::F64(v))
    }
    fn serialize_char(self, v: char) -> Result<Value, DbError> {
        Ok(Value::Str(v.to_string()))
    }
    fn serialize_str(self, v: &str) -> Result<Value, DbError> {
        Ok(Value::Str(v.to_owned()))
    }
    fn serialize_bytes(self, v: &[u8]) -> Result<Value, DbError> {
        Ok(Value::Bytes(v.to_vec()))
    }
    fn serialize_none(self) -> Result<Value, DbError> {
        Ok(Value::Null)
    }
    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Value, DbError> {
        value.serialize(self)
    }
    // `&()` means "no parameters".
    fn serialize_unit(self) -> Result<Value, DbError> {
        Ok(Value::List(Vec::new()))
    }
    fn serialize_unit_struct(self, _: &'static str) -> Result<Value, DbError> {
        Ok(Value::Null)
    }
    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
    ) -> Result<Value, DbError> {
        Ok(Value::Str(variant.to_owned()))
    }
    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<Value, DbError> {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        _: u32,
        variant: &'static str,
        _: &T,
    ) -> Result<Value, DbError> {
        Err(unsupported(&format!("enum variant {}::{}", name, variant)))
    }
    fn serialize_seq(self, len: Option<usize>) -> Result<ListParams, DbError> {
        Ok(ListParams(Vec::with_capacity(len.unwrap_or(0))))
    }
    fn serialize_tuple(self, len: usize) -> Result<ListParams, DbError> {
        self.serialize_seq(Some(len))
    }
    fn serialize_tuple_struct(self, _: &'static str, len: usize) -> Result<ListParams, DbError> {
        self.serialize_seq(Some(len))
    }
    fn serialize_tuple_variant(
        self,
        name: &'static str,
        _: u32,
        variant: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleVariant, DbError> {
        Err(unsupported(&format!("enum variant {}::{}", name, variant)))
    }
    fn serialize_map(self, len: Option<usize>) -> Result<FieldParams, DbError> {
        Ok(FieldParams {
            fields: Vec::with_capacity(len.unwrap_or(0)),
            key: None,
        })
    }
    fn serialize_struct(self, _: &'static str, len: usize) -> Result<FieldParams, DbError> {
        self.serialize_map(Some(len))
    }
    fn serialize_struct_variant(
        self,
        name: &'static str,
        _: u32,
        variant: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant, DbError> {
        Err(unsupported(&format!("enum variant {}::{}", name, variant)))
    }
}

struct ListParams(Vec<Value>);

impl ListParams {
    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), DbError> {
        self.0.push(value.serialize(ParamSerializer)?);
        Ok(())
    }
}

impl ser::SerializeSeq for ListParams {
    type Ok = Value;
    type Error = DbError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), DbError> {
        self.push(value)
    }
    fn end(self) -> Result<Value, DbError> {
        Ok(Value::List(self.0))
    }
}

impl ser::SerializeTuple for ListParams {
    type Ok = Value;
    type Error = DbError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), DbError> {
        self.push(value)
    }
    fn end(self) -> Result<Value, DbError> {
        Ok(Value::List(self.0))
    }
}

impl ser::SerializeTupleStruct for ListParams {
    type Ok = Value;
    type Error = DbError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), DbError> {
        self.push(value)
    }
    fn end(self) -> Result<Value, DbError> {
        Ok(Value::List(self.0))
    }
}

/// Named parameters, kept in the order they were serialized.
struct FieldParams {
    fields: Vec<(String, Value)>,
    key: Option<String>,
}

impl ser::SerializeMap for FieldParams {
    type Ok = Value;
    type Error = DbError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), DbError> {
        match key.serialize(ParamSerializer)? {
            Value::Str(name) => {
                self.key = Some(name);
                Ok(())
            }
            other => Err(DbError::Value(format!(
                "parameter names must be strings, got {:?}",
                other
            ))),
        }
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), DbError> {
        let name = self
            .key
            .take()
            .ok_or_else(|| DbError::Value("parameter value without a name".into()))?;
        self.fields.push((name, value.serialize(ParamSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Value, DbError> {
        Ok(Value::Map(self.fields))
    }
}

impl ser::SerializeStruct for FieldParams {
    type Ok = Value;
    type Error = DbError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), DbError> {
        self.fields
            .push((key.to_owned(), value.serialize(ParamSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Value, DbError> {
        Ok(Value::Map(self.fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    enum Shape {
        Circle(f64),
        Square,
    }

    #[test]
    fn test_unit_variant_binds_as_name() {
        assert_eq!(to_value(&Shape::Square).unwrap(), Value::Str("Square".into()));
    }

    #[test]
    fn test_data_variant_rejected() {
        assert!(matches!(to_value(&Shape::Circle(1.0)), Err(DbError::Value(_))));
    }

    #[test]
    fn test_map_keeps_serialization_order() {
        let mut params = BTreeMap::new();
        params.insert("b", 2i64);
        params.insert("a", 1i64);
        assert_eq!(
            to_value(&params).unwrap(),
            Value::Map(vec![("a".into(), Value::I64(1)), ("b".into(), Value::I64(2))])
        );
    }

    #[test]
    fn test_non_string_map_key_rejected() {
        let mut params = BTreeMap::new();
        params.insert(1i64, "x");
        assert!(to_value(&params).is_err());
    }
}
