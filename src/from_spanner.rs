#[cfg(feature = "numeric")]
use bigdecimal::BigDecimal;
#[cfg(feature = "temporal")]
use chrono::{DateTime, NaiveDate, Utc};

use crate::{Error, Type, Value};

/// Conversion of Cloud Spanner [`Value`]s into Rust values, see [`crate::Row::get`].
///
/// Implementations may borrow from the value, e.g.: `&str` borrows from a `STRING` value.
pub trait FromSpanner<'a>: Sized {
    fn from_spanner(tpe: &'a Type, value: &'a Value) -> Result<Self, Error>;

    fn from_spanner_null(tpe: &Type) -> Result<Self, Error> {
        Err(Error::Codec(format!(
            "value of type {:?} was null, use Option<T> to read nullable values",
            tpe
        )))
    }

    fn from_spanner_nullable(tpe: &'a Type, value: &'a Value) -> Result<Self, Error> {
        match value {
            Value::Null(_) => Self::from_spanner_null(tpe),
            not_null => Self::from_spanner(tpe, not_null),
        }
    }
}

impl<'a, T> FromSpanner<'a> for Option<T>
where
    T: FromSpanner<'a>,
{
    fn from_spanner(tpe: &'a Type, value: &'a Value) -> Result<Self, Error> {
        <T as FromSpanner>::from_spanner(tpe, value).map(Some)
    }

    fn from_spanner_null(_tpe: &Type) -> Result<Self, Error> {
        Ok(None)
    }
}

macro_rules! wrong_type {
    ($expect:ident, $tpe:expr) => {
        Err(Error::Codec(format!(
            "type {:?} is unsupported by FromSpanner impl, expected {:?}",
            $tpe,
            Type::$expect,
        )))
    };
}

impl<'a> FromSpanner<'a> for String {
    fn from_spanner(tpe: &'a Type, value: &'a Value) -> Result<Self, Error> {
        match value {
            Value::String(v) => Ok(v.clone()),
            _ => wrong_type!(String, tpe),
        }
    }
}

impl<'a> FromSpanner<'a> for &'a str {
    fn from_spanner(tpe: &'a Type, value: &'a Value) -> Result<Self, Error> {
        match value {
            Value::String(v) => Ok(v),
            _ => wrong_type!(String, tpe),
        }
    }
}

macro_rules! simple_from {
    ($t:ty, $f:ident) => {
        impl<'a> FromSpanner<'a> for $t {
            fn from_spanner(tpe: &'a Type, value: &'a Value) -> Result<$t, Error> {
                match value {
                    Value::$f(v) => {
                        <$t>::try_from(*v).map_err(|err| Error::Codec(format!("{}", err)))
                    }
                    _ => wrong_type!($f, tpe),
                }
            }
        }
    };
}

simple_from!(i8, Int64);
simple_from!(u8, Int64);
simple_from!(i16, Int64);
simple_from!(u16, Int64);
simple_from!(i32, Int64);
simple_from!(u32, Int64);
simple_from!(i64, Int64);
simple_from!(bool, Bool);
simple_from!(f64, Float64);

macro_rules! clone_from {
    ($t:ty, $f:ident) => {
        impl<'a> FromSpanner<'a> for $t {
            fn from_spanner(tpe: &'a Type, value: &'a Value) -> Result<$t, Error> {
                match value {
                    Value::$f(v) => Ok(v.clone()),
                    _ => wrong_type!($f, tpe),
                }
            }
        }
    };
}

#[cfg(feature = "json")]
clone_from!(serde_json::Value, Json);
#[cfg(feature = "numeric")]
clone_from!(BigDecimal, Numeric);
#[cfg(feature = "temporal")]
clone_from!(DateTime<Utc>, Timestamp);
#[cfg(feature = "temporal")]
clone_from!(NaiveDate, Date);

impl<'a> FromSpanner<'a> for &'a [u8] {
    fn from_spanner(tpe: &'a Type, value: &'a Value) -> Result<Self, Error> {
        match value {
            Value::Bytes(v) => Ok(v.as_slice()),
            _ => wrong_type!(Bytes, tpe),
        }
    }
}

impl<'a, T> FromSpanner<'a> for Vec<T>
where
    T: FromSpanner<'a>,
{
    fn from_spanner(tpe: &'a Type, value: &'a Value) -> Result<Self, Error> {
        match (tpe, value) {
            (Type::Array(inner), Value::Array(_, values)) => values
                .iter()
                .map(|v| T::from_spanner_nullable(inner, v))
                .collect(),
            _ => Err(Error::Codec(format!(
                "type {:?} is unsupported by FromSpanner impl, expected an array",
                tpe
            ))),
        }
    }
}
