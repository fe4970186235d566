use std::convert::TryFrom;

use crate::proto::google::spanner::v1 as proto;
use crate::Error;

/// The fields of a `STRUCT` type or of a result set row: optionally named columns and their type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructType(Vec<(Option<String>, Type)>);

impl StructType {
    /// Creates a new `StructType`; empty names become unnamed fields.
    pub fn new(fields: Vec<(&str, Type)>) -> Self {
        Self(
            fields
                .into_iter()
                .map(|(name, tpe)| ((!name.is_empty()).then(|| name.to_string()), tpe))
                .collect(),
        )
    }

    pub fn fields(&self) -> &[(Option<String>, Type)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of the first field with the provided name. Unnamed fields never match.
    pub fn field_index(&self, field_name: &str) -> Option<usize> {
        self.0
            .iter()
            .position(|(name, _)| name.as_deref() == Some(field_name))
    }
}

impl TryFrom<&proto::StructType> for StructType {
    type Error = Error;

    fn try_from(value: &proto::StructType) -> Result<Self, Self::Error> {
        value
            .fields
            .iter()
            .map(|field| {
                let tpe = field
                    .r#type
                    .as_ref()
                    .ok_or_else(|| Error::Codec(format!("field '{}' is missing type", field.name)))
                    .and_then(Type::try_from)?;
                let name = (!field.name.is_empty()).then(|| field.name.clone());
                Ok((name, tpe))
            })
            .collect::<Result<Vec<_>, Error>>()
            .map(StructType)
    }
}

impl From<&StructType> for proto::StructType {
    fn from(value: &StructType) -> Self {
        proto::StructType {
            fields: value
                .0
                .iter()
                .map(|(name, tpe)| proto::struct_type::Field {
                    name: name.clone().unwrap_or_default(),
                    r#type: Some(tpe.into()),
                })
                .collect(),
        }
    }
}

/// Cloud Spanner [data types](https://cloud.google.com/spanner/docs/data-types).
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Bool,
    Int64,
    /// Supports the special `NaN`, `+inf` and `-inf` values.
    Float64,
    String,
    Bytes,
    #[cfg(feature = "json")]
    Json,
    #[cfg(feature = "numeric")]
    Numeric,
    #[cfg(feature = "temporal")]
    Timestamp,
    #[cfg(feature = "temporal")]
    Date,
    /// Arrays may contain `NULL` elements but not other arrays.
    Array(Box<Type>),
    Struct(StructType),
}

impl Type {
    /// Creates a new `Type::Array` with elements of the specified type.
    ///
    /// # Panics
    ///
    /// If the provided type is itself a `Type::Array`.
    pub fn array(inner: Type) -> Self {
        if let Type::Array(_) = &inner {
            panic!("array of array is not supported by Cloud Spanner");
        }
        Type::Array(Box::new(inner))
    }

    pub fn strct(fields: Vec<(&str, Type)>) -> Self {
        Type::Struct(StructType::new(fields))
    }

    pub(crate) fn code(&self) -> proto::TypeCode {
        match self {
            Type::Bool => proto::TypeCode::Bool,
            Type::Int64 => proto::TypeCode::Int64,
            Type::Float64 => proto::TypeCode::Float64,
            Type::String => proto::TypeCode::String,
            Type::Bytes => proto::TypeCode::Bytes,
            #[cfg(feature = "json")]
            Type::Json => proto::TypeCode::Json,
            #[cfg(feature = "numeric")]
            Type::Numeric => proto::TypeCode::Numeric,
            #[cfg(feature = "temporal")]
            Type::Timestamp => proto::TypeCode::Timestamp,
            #[cfg(feature = "temporal")]
            Type::Date => proto::TypeCode::Date,
            Type::Array(_) => proto::TypeCode::Array,
            Type::Struct(_) => proto::TypeCode::Struct,
        }
    }
}

fn feature_disabled(tpe: &str, feature: &str) -> Error {
    Error::Codec(format!(
        "{} type support is not enabled; use the '{}' feature to enable it",
        tpe, feature
    ))
}

impl TryFrom<&proto::Type> for Type {
    type Error = Error;

    fn try_from(value: &proto::Type) -> Result<Self, Self::Error> {
        let code = proto::TypeCode::from_i32(value.code)
            .ok_or_else(|| Error::Codec(format!("unknown type code {}", value.code)))?;
        match code {
            proto::TypeCode::Bool => Ok(Type::Bool),
            proto::TypeCode::Int64 => Ok(Type::Int64),
            proto::TypeCode::Float64 => Ok(Type::Float64),
            proto::TypeCode::String => Ok(Type::String),
            proto::TypeCode::Bytes => Ok(Type::Bytes),
            #[cfg(feature = "json")]
            proto::TypeCode::Json => Ok(Type::Json),
            #[cfg(not(feature = "json"))]
            proto::TypeCode::Json => Err(feature_disabled("JSON", "json")),
            #[cfg(feature = "numeric")]
            proto::TypeCode::Numeric => Ok(Type::Numeric),
            #[cfg(not(feature = "numeric"))]
            proto::TypeCode::Numeric => Err(feature_disabled("NUMERIC", "numeric")),
            #[cfg(feature = "temporal")]
            proto::TypeCode::Timestamp => Ok(Type::Timestamp),
            #[cfg(feature = "temporal")]
            proto::TypeCode::Date => Ok(Type::Date),
            #[cfg(not(feature = "temporal"))]
            proto::TypeCode::Timestamp | proto::TypeCode::Date => {
                Err(feature_disabled("TIMESTAMP/DATE", "temporal"))
            }
            proto::TypeCode::Array => value
                .array_element_type
                .as_deref()
                .ok_or_else(|| Error::Codec("missing array element type".to_string()))
                .and_then(Type::try_from)
                .map(|tpe| Type::Array(Box::new(tpe))),
            proto::TypeCode::Struct => value
                .struct_type
                .as_ref()
                .ok_or_else(|| Error::Codec("missing struct type definition".to_string()))
                .and_then(StructType::try_from)
                .map(Type::Struct),
            proto::TypeCode::Unspecified => Err(Error::Codec("unspecified type".to_string())),
        }
    }
}

impl From<&Type> for proto::Type {
    fn from(value: &Type) -> Self {
        let mut tpe = proto::Type {
            code: value.code() as i32,
            ..Default::default()
        };
        match value {
            Type::Array(inner) => tpe.array_element_type = Some(Box::new(inner.as_ref().into())),
            Type::Struct(strct) => tpe.struct_type = Some(strct.into()),
            _ => {}
        }
        tpe
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scalar(code: proto::TypeCode) -> proto::Type {
        proto::Type {
            code: code as i32,
            ..Default::default()
        }
    }

    #[test]
    fn test_scalar_codes() {
        for (code, expected) in [
            (proto::TypeCode::Bool, Type::Bool),
            (proto::TypeCode::Int64, Type::Int64),
            (proto::TypeCode::Float64, Type::Float64),
            (proto::TypeCode::String, Type::String),
            (proto::TypeCode::Bytes, Type::Bytes),
        ] {
            assert_eq!(Type::try_from(&scalar(code)).unwrap(), expected);
            assert_eq!(proto::Type::from(&expected).code, code as i32);
        }
    }

    #[test]
    fn test_nested_types() {
        let wire = proto::Type {
            code: proto::TypeCode::Struct as i32,
            struct_type: Some(proto::StructType {
                fields: vec![
                    proto::struct_type::Field {
                        name: "tags".to_string(),
                        r#type: Some(proto::Type {
                            code: proto::TypeCode::Array as i32,
                            array_element_type: Some(Box::new(scalar(proto::TypeCode::String))),
                            ..Default::default()
                        }),
                    },
                    proto::struct_type::Field {
                        name: "".to_string(),
                        r#type: Some(scalar(proto::TypeCode::Int64)),
                    },
                ],
            }),
            ..Default::default()
        };
        let tpe = Type::try_from(&wire).unwrap();
        assert_eq!(
            tpe,
            Type::strct(vec![("tags", Type::array(Type::String)), ("", Type::Int64)])
        );
        assert_eq!(proto::Type::from(&tpe), wire);
    }

    #[test]
    fn test_invalid_types() {
        let missing_element = proto::Type {
            code: proto::TypeCode::Array as i32,
            ..Default::default()
        };
        assert!(Type::try_from(&missing_element).is_err());
        assert!(Type::try_from(&scalar(proto::TypeCode::Unspecified)).is_err());
        assert!(Type::try_from(&proto::Type {
            code: 42,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    #[should_panic]
    fn test_array_of_array_is_illegal() {
        Type::array(Type::array(Type::Bool));
    }

    #[test]
    fn test_field_index() {
        let strct = StructType::new(vec![("foo", Type::Bool), ("", Type::Bool), ("bar", Type::Bool)]);
        assert_eq!(strct.field_index("foo"), Some(0));
        assert_eq!(strct.field_index("bar"), Some(2));
        assert_eq!(strct.field_index("not present"), None);
    }
}
