use std::collections::BTreeMap;

use crate::proto::google::spanner::v1 as proto;
#[cfg(doc)]
use crate::ReadWriteTransaction;
use crate::{Error, ToSpanner, Value};

/// The relative priority of a request, see [`CallOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl From<Priority> for proto::request_options::Priority {
    fn from(value: Priority) -> Self {
        match value {
            Priority::Low => proto::request_options::Priority::Low,
            Priority::Medium => proto::request_options::Priority::Medium,
            Priority::High => proto::request_options::Priority::High,
        }
    }
}

/// Options attached to a single query, read or DML request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    pub priority: Option<Priority>,
    pub request_tag: Option<String>,
}

/// A SQL statement and its named parameters.
///
/// Parameters are referenced as `@name` in the SQL text.
/// This is used for queries, DML and batches of DML through [`ReadWriteTransaction::execute_updates`].
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<(String, Value)>,
    options: CallOptions,
}

impl Statement {
    pub fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            params: Vec::new(),
            options: CallOptions::default(),
        }
    }

    /// Creates a statement with all its parameters at once.
    pub fn with_params(sql: &str, params: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<Self, Error> {
        params
            .iter()
            .try_fold(Self::new(sql), |statement, (name, value)| {
                statement.bind(name, *value)
            })
    }

    pub fn bind<T: ToSpanner + ?Sized>(self, name: &str, value: &T) -> Result<Self, Error> {
        value.to_spanner().map(|value| self.bind_value(name, value))
    }

    /// Binds an already converted value; a previous binding of the same name is replaced.
    pub fn bind_value(mut self, name: &str, value: Value) -> Self {
        self.params.retain(|(n, _)| n != name);
        self.params.push((name.to_string(), value));
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.options.priority = Some(priority);
        self
    }

    pub fn request_tag(mut self, tag: &str) -> Self {
        self.options.request_tag = Some(tag.to_string());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    pub(crate) fn wire_params(&self) -> (Option<prost_types::Struct>, BTreeMap<String, proto::Type>) {
        if self.params.is_empty() {
            return (None, BTreeMap::new());
        }
        let mut fields = BTreeMap::new();
        let mut param_types = BTreeMap::new();
        for (name, value) in &self.params {
            param_types.insert(name.clone(), (&value.spanner_type()).into());
            fields.insert(name.clone(), value.clone().into());
        }
        (Some(prost_types::Struct { fields }), param_types)
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement {
            sql,
            params: Vec::new(),
            options: CallOptions::default(),
        }
    }
}

impl From<&Statement> for proto::execute_batch_dml_request::Statement {
    fn from(value: &Statement) -> Self {
        let (params, param_types) = value.wire_params();
        proto::execute_batch_dml_request::Statement {
            sql: value.sql.clone(),
            params,
            param_types,
        }
    }
}

/// Options of a [`read`](crate::ReadContext::read) request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    /// Reads through this secondary index instead of the table's primary key.
    pub index: Option<String>,
    /// Maximum number of rows to return, no limit when absent.
    pub limit: Option<i64>,
    pub call: CallOptions,
}

impl ReadOptions {
    pub fn index(mut self, index: &str) -> Self {
        self.index = Some(index.to_string());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.call.priority = Some(priority);
        self
    }

    pub fn request_tag(mut self, tag: &str) -> Self {
        self.call.request_tag = Some(tag.to_string());
        self
    }
}
