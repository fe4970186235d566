use prost_types::ListValue;

use crate::proto::google::spanner::v1 as proto;
use crate::{Error, KeySet, ToSpanner, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    /// Fails the commit if a row already exists.
    Insert,
    /// Fails the commit if a row does not exist.
    Update,
    /// Inserts missing rows, overwrites the provided columns of existing ones.
    InsertOrUpdate,
    /// Like `InsertOrUpdate`, but columns that are not provided are set to `NULL`.
    Replace,
}

/// A write buffered by a read-write transaction and applied atomically at commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Write {
        op: WriteOp,
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Delete {
        table: String,
        key_set: KeySet,
    },
}

impl Mutation {
    /// Creates a write of one or more rows. Every row must provide a value for each column.
    pub fn write(
        op: WriteOp,
        table: &str,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, Error> {
        if let Some(row) = rows.iter().find(|row| row.len() != columns.len()) {
            return Err(Error::Client(format!(
                "row has {} value(s) but {} column(s) were provided for table {}",
                row.len(),
                columns.len(),
                table
            )));
        }
        Ok(Mutation::Write {
            op,
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        })
    }

    fn single_row(
        op: WriteOp,
        table: &str,
        values: &[(&str, &(dyn ToSpanner + Sync))],
    ) -> Result<Self, Error> {
        let columns = values.iter().map(|(c, _)| *c).collect::<Vec<&str>>();
        let row = values
            .iter()
            .map(|(_, v)| v.to_spanner())
            .collect::<Result<Vec<Value>, Error>>()?;
        Self::write(op, table, &columns, vec![row])
    }

    pub fn insert(table: &str, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<Self, Error> {
        Self::single_row(WriteOp::Insert, table, values)
    }

    pub fn update(table: &str, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<Self, Error> {
        Self::single_row(WriteOp::Update, table, values)
    }

    pub fn upsert(table: &str, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<Self, Error> {
        Self::single_row(WriteOp::InsertOrUpdate, table, values)
    }

    pub fn replace(table: &str, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<Self, Error> {
        Self::single_row(WriteOp::Replace, table, values)
    }

    pub fn delete(table: &str, key_set: KeySet) -> Self {
        Mutation::Delete {
            table: table.to_string(),
            key_set,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Mutation::Write { table, .. } | Mutation::Delete { table, .. } => table,
        }
    }
}

impl From<Mutation> for proto::Mutation {
    fn from(mutation: Mutation) -> Self {
        use proto::mutation::Operation;
        let operation = match mutation {
            Mutation::Write {
                op,
                table,
                columns,
                rows,
            } => {
                let write = proto::mutation::Write {
                    table,
                    columns,
                    values: rows
                        .into_iter()
                        .map(|row| ListValue {
                            values: row.into_iter().map(Into::into).collect(),
                        })
                        .collect(),
                };
                match op {
                    WriteOp::Insert => Operation::Insert(write),
                    WriteOp::Update => Operation::Update(write),
                    WriteOp::InsertOrUpdate => Operation::InsertOrUpdate(write),
                    WriteOp::Replace => Operation::Replace(write),
                }
            }
            Mutation::Delete { table, key_set } => Operation::Delete(proto::mutation::Delete {
                table,
                key_set: Some(key_set.into()),
            }),
        };
        proto::Mutation {
            operation: Some(operation),
        }
    }
}
