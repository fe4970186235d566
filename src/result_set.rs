use std::convert::TryFrom;
use std::sync::Arc;

use crate::proto::google::spanner::v1 as proto;
use crate::{Error, FromSpanner, StructType, StructValue, Type, Value};

/// A type that can index into a [`Row`]: a column position or a column name.
pub trait RowIndex {
    fn index(&self, struct_type: &StructType) -> Option<usize>;
}

impl RowIndex for usize {
    fn index(&self, struct_type: &StructType) -> Option<usize> {
        (*self < struct_type.len()).then(|| *self)
    }
}

impl RowIndex for &str {
    fn index(&self, struct_type: &StructType) -> Option<usize> {
        struct_type.field_index(self)
    }
}

/// A row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    row_type: Arc<StructType>,
    columns: StructValue,
}

impl Row {
    pub(crate) fn new(row_type: Arc<StructType>, columns: StructValue) -> Self {
        Self { row_type, columns }
    }

    pub fn row_type(&self) -> &StructType {
        &self.row_type
    }

    pub fn len(&self) -> usize {
        self.columns.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.0.is_empty()
    }

    pub fn get_value(&self, column: usize) -> Option<&Value> {
        self.columns.0.get(column).map(|(_, value)| value)
    }

    pub fn get_by_name(&self, column_name: &str) -> Option<&Value> {
        self.row_type
            .field_index(column_name)
            .and_then(|idx| self.get_value(idx))
    }

    /// Reads a column and converts it to `T`, failing when the column does not exist,
    /// is `NULL` and `T` is not an `Option`, or does not convert to `T`.
    pub fn get<'a, T, R>(&'a self, column: R) -> Result<T, Error>
    where
        T: FromSpanner<'a>,
        R: RowIndex + std::fmt::Debug,
    {
        let idx = column
            .index(&self.row_type)
            .ok_or_else(|| Error::Codec(format!("no such column: {:?}", column)))?;
        let (tpe, value) = self
            .row_type
            .fields()
            .get(idx)
            .map(|(_, tpe)| tpe)
            .zip(self.get_value(idx))
            .ok_or_else(|| Error::Codec(format!("no such column: {:?}", column)))?;
        T::from_spanner_nullable(tpe, value)
    }

    /// Builds a row from its decoded values, mostly useful to test code that consumes rows.
    pub fn from_values(fields: Vec<(&str, Value)>) -> Self {
        let row_type = StructType::new(
            fields
                .iter()
                .map(|(name, value)| (*name, value.spanner_type()))
                .collect::<Vec<(&str, Type)>>(),
        );
        let columns = StructValue(
            fields
                .into_iter()
                .map(|(name, value)| ((!name.is_empty()).then(|| name.to_string()), value))
                .collect(),
        );
        Self::new(Arc::new(row_type), columns)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.columns.0.into_iter().map(|(_, value)| value).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCount {
    /// Exact number of rows modified by a DML statement.
    Exact(i64),
    /// Lower bound of the number of rows modified by a partitioned DML statement.
    LowerBound(i64),
}

/// Statistics returned with the last chunk of a result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSetStats {
    pub row_count: Option<RowCount>,
    /// Query plan statistics, only present when profiling was requested.
    pub query_stats: Option<prost_types::Struct>,
}

impl ResultSetStats {
    pub fn row_count(&self) -> Option<i64> {
        self.row_count.map(|count| match count {
            RowCount::Exact(c) | RowCount::LowerBound(c) => c,
        })
    }
}

impl From<proto::ResultSetStats> for ResultSetStats {
    fn from(value: proto::ResultSetStats) -> Self {
        use proto::result_set_stats::RowCount as SpannerRowCount;
        Self {
            row_count: value.row_count.map(|count| match count {
                SpannerRowCount::RowCountExact(c) => RowCount::Exact(c),
                SpannerRowCount::RowCountLowerBound(c) => RowCount::LowerBound(c),
            }),
            query_stats: value.query_stats,
        }
    }
}

/// A fully materialized result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    row_type: StructType,
    rows: Vec<Row>,
    stats: Option<ResultSetStats>,
}

impl ResultSet {
    pub(crate) fn new(row_type: StructType, rows: Vec<Row>, stats: Option<ResultSetStats>) -> Self {
        Self {
            row_type,
            rows,
            stats,
        }
    }

    pub fn row_type(&self) -> &StructType {
        &self.row_type
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn stats(&self) -> Option<&ResultSetStats> {
        self.stats.as_ref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub(crate) fn row_type(metadata: Option<&proto::ResultSetMetadata>) -> Result<StructType, Error> {
    metadata
        .ok_or_else(|| Error::Codec("missing result set metadata".to_string()))
        .and_then(|rsm| {
            rsm.row_type
                .as_ref()
                .ok_or_else(|| Error::Codec("missing row type metadata".to_string()))
        })
        .and_then(StructType::try_from)
}

impl TryFrom<proto::ResultSet> for ResultSet {
    type Error = Error;

    fn try_from(value: proto::ResultSet) -> Result<Self, Self::Error> {
        let row_type = row_type(value.metadata.as_ref())?;
        let shared = Arc::new(row_type.clone());
        let rows = value
            .rows
            .into_iter()
            .map(|row| StructValue::decode(&shared, row).map(|columns| Row::new(shared.clone(), columns)))
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Self {
            row_type,
            rows,
            stats: value.stats.map(Into::into),
        })
    }
}
