//! Builders for the wire requests sent by sessions, transactions and the pool.
//!
//! Every function is pure: it takes the request's inputs and returns a new message.

use std::collections::HashMap;

use prost::bytes::Bytes;

use crate::proto::google::spanner::v1 as proto;
use crate::{CallOptions, KeySet, Mutation, PartitionOptions, ReadOptions, Statement, TimestampBound};

use proto::transaction_options::{read_write::ReadLockMode, Mode};
use proto::transaction_selector::Selector;

pub(crate) fn read_only_options(bound: &TimestampBound) -> proto::TransactionOptions {
    proto::TransactionOptions {
        mode: Some(Mode::ReadOnly(proto::transaction_options::ReadOnly {
            return_read_timestamp: true,
            timestamp_bound: Some(bound.clone().into()),
        })),
    }
}

pub(crate) fn read_write_options(optimistic_lock: bool) -> proto::TransactionOptions {
    let read_lock_mode = if optimistic_lock {
        ReadLockMode::Optimistic
    } else {
        ReadLockMode::Unspecified
    };
    proto::TransactionOptions {
        mode: Some(Mode::ReadWrite(proto::transaction_options::ReadWrite {
            read_lock_mode: read_lock_mode as i32,
        })),
    }
}

pub(crate) fn partitioned_dml_options() -> proto::TransactionOptions {
    proto::TransactionOptions {
        mode: Some(Mode::PartitionedDml(
            proto::transaction_options::PartitionedDml {},
        )),
    }
}

pub(crate) fn single_use(options: proto::TransactionOptions) -> proto::TransactionSelector {
    proto::TransactionSelector {
        selector: Some(Selector::SingleUse(options)),
    }
}

pub(crate) fn begin(options: proto::TransactionOptions) -> proto::TransactionSelector {
    proto::TransactionSelector {
        selector: Some(Selector::Begin(options)),
    }
}

pub(crate) fn with_id(id: &Bytes) -> proto::TransactionSelector {
    proto::TransactionSelector {
        selector: Some(Selector::Id(id.clone())),
    }
}

/// Request options are only sent when at least one of them is set.
pub(crate) fn request_options(
    call: Option<&CallOptions>,
    transaction_tag: Option<&str>,
) -> Option<proto::RequestOptions> {
    let priority = call.and_then(|c| c.priority);
    let request_tag = call.and_then(|c| c.request_tag.as_deref());
    if priority.is_none() && request_tag.is_none() && transaction_tag.is_none() {
        return None;
    }
    Some(proto::RequestOptions {
        priority: priority
            .map(proto::request_options::Priority::from)
            .unwrap_or(proto::request_options::Priority::Unspecified) as i32,
        request_tag: request_tag.unwrap_or_default().to_string(),
        transaction_tag: transaction_tag.unwrap_or_default().to_string(),
    })
}

pub(crate) fn batch_create_sessions(
    database: &str,
    session_count: usize,
    labels: &HashMap<String, String>,
) -> proto::BatchCreateSessionsRequest {
    proto::BatchCreateSessionsRequest {
        database: database.to_string(),
        session_template: Some(proto::Session {
            labels: labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            ..Default::default()
        }),
        session_count: session_count as i32,
    }
}

pub(crate) fn delete_session(name: &str) -> proto::DeleteSessionRequest {
    proto::DeleteSessionRequest {
        name: name.to_string(),
    }
}

/// `seqno` is required for DML and ignored by the server for queries.
pub(crate) fn execute_sql(
    session: &str,
    selector: proto::TransactionSelector,
    statement: &Statement,
    seqno: Option<i64>,
    transaction_tag: Option<&str>,
) -> proto::ExecuteSqlRequest {
    let (params, param_types) = statement.wire_params();
    proto::ExecuteSqlRequest {
        session: session.to_string(),
        transaction: Some(selector),
        sql: statement.sql().to_string(),
        params,
        param_types,
        seqno: seqno.unwrap_or_default(),
        request_options: request_options(Some(statement.options()), transaction_tag),
        ..Default::default()
    }
}

pub(crate) fn read(
    session: &str,
    selector: proto::TransactionSelector,
    table: &str,
    key_set: KeySet,
    columns: &[&str],
    options: &ReadOptions,
    transaction_tag: Option<&str>,
) -> proto::ReadRequest {
    proto::ReadRequest {
        session: session.to_string(),
        transaction: Some(selector),
        table: table.to_string(),
        index: options.index.clone().unwrap_or_default(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        key_set: Some(key_set.into()),
        limit: options.limit.unwrap_or_default(),
        request_options: request_options(Some(&options.call), transaction_tag),
        ..Default::default()
    }
}

pub(crate) fn execute_batch_dml(
    session: &str,
    selector: proto::TransactionSelector,
    statements: &[Statement],
    seqno: i64,
    transaction_tag: Option<&str>,
) -> proto::ExecuteBatchDmlRequest {
    proto::ExecuteBatchDmlRequest {
        session: session.to_string(),
        transaction: Some(selector),
        statements: statements.iter().map(Into::into).collect(),
        seqno,
        request_options: request_options(
            statements.first().map(Statement::options),
            transaction_tag,
        ),
    }
}

pub(crate) fn begin_transaction(
    session: &str,
    options: proto::TransactionOptions,
    transaction_tag: Option<&str>,
) -> proto::BeginTransactionRequest {
    proto::BeginTransactionRequest {
        session: session.to_string(),
        options: Some(options),
        request_options: request_options(None, transaction_tag),
    }
}

/// Commits the transaction with the provided id or, without one, applies the mutations in a
/// single-use read-write transaction.
pub(crate) fn commit(
    session: &str,
    transaction_id: Option<&Bytes>,
    mutations: Vec<Mutation>,
    transaction_tag: Option<&str>,
) -> proto::CommitRequest {
    use proto::commit_request::Transaction;
    let transaction = match transaction_id {
        Some(id) => Transaction::TransactionId(id.clone()),
        None => Transaction::SingleUseTransaction(read_write_options(false)),
    };
    proto::CommitRequest {
        session: session.to_string(),
        mutations: mutations.into_iter().map(Into::into).collect(),
        return_commit_stats: false,
        request_options: request_options(None, transaction_tag),
        transaction: Some(transaction),
    }
}

pub(crate) fn rollback(session: &str, transaction_id: &Bytes) -> proto::RollbackRequest {
    proto::RollbackRequest {
        session: session.to_string(),
        transaction_id: transaction_id.clone(),
    }
}

fn partition_options(options: &PartitionOptions) -> proto::PartitionOptions {
    proto::PartitionOptions {
        partition_size_bytes: options.partition_size_bytes.unwrap_or_default(),
        max_partitions: options.max_partitions.unwrap_or_default(),
    }
}

pub(crate) fn partition_query(
    session: &str,
    selector: proto::TransactionSelector,
    statement: &Statement,
    options: &PartitionOptions,
) -> proto::PartitionQueryRequest {
    let (params, param_types) = statement.wire_params();
    proto::PartitionQueryRequest {
        session: session.to_string(),
        transaction: Some(selector),
        sql: statement.sql().to_string(),
        params,
        param_types,
        partition_options: Some(partition_options(options)),
    }
}

pub(crate) fn partition_read(
    session: &str,
    selector: proto::TransactionSelector,
    table: &str,
    key_set: KeySet,
    columns: &[&str],
    index: Option<&str>,
    options: &PartitionOptions,
) -> proto::PartitionReadRequest {
    proto::PartitionReadRequest {
        session: session.to_string(),
        transaction: Some(selector),
        table: table.to_string(),
        index: index.unwrap_or_default().to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        key_set: Some(key_set.into()),
        partition_options: Some(partition_options(options)),
    }
}
