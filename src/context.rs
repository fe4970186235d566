use async_trait::async_trait;

use crate::{Error, KeySet, Mutation, ReadOptions, ResultSet, RowStream, Statement, ToSpanner};

/// Reads within a single-use, read-only or read-write transaction.
///
/// The first request of a transaction that has not begun yet also begins it.
#[async_trait]
pub trait ReadContext: Send {
    /// Reads the rows of `table` (or of `options.index`) matching `key_set`.
    async fn read(
        &mut self,
        table: &str,
        key_set: KeySet,
        columns: &[&str],
        options: ReadOptions,
    ) -> Result<RowStream, Error>;

    async fn execute_query(&mut self, statement: &Statement) -> Result<RowStream, Error>;

    /// Runs a query and collects all of its rows.
    ///
    /// ```no_run
    /// # use spanner_core::*;
    /// # async fn f(tx: &mut impl ReadContext) -> Result<(), Error> {
    /// let result_set = tx
    ///     .query("SELECT name FROM person WHERE id = @id", &[("id", &42)])
    ///     .await?;
    /// let name: &str = result_set.iter().next().unwrap().get("name")?;
    /// # Ok(()) }
    /// ```
    async fn query(
        &mut self,
        sql: &str,
        params: &[(&str, &(dyn ToSpanner + Sync))],
    ) -> Result<ResultSet, Error> {
        let statement = Statement::with_params(sql, params)?;
        self.execute_query(&statement).await?.collect().await
    }
}

/// DML within a read-write transaction.
#[async_trait]
pub trait DmlContext: Send {
    /// Runs a DML statement and returns the number of modified rows.
    async fn execute_update(&mut self, statement: &Statement) -> Result<i64, Error>;

    /// Runs a batch of DML statements in order, stopping at the first failure.
    ///
    /// On failure, the error is [`Error::BatchUpdate`] which carries the row counts of the statements that succeeded.
    async fn execute_updates(&mut self, statements: &[Statement]) -> Result<Vec<i64>, Error>;

    async fn update(
        &mut self,
        sql: &str,
        params: &[(&str, &(dyn ToSpanner + Sync))],
    ) -> Result<i64, Error> {
        let statement = Statement::with_params(sql, params)?;
        self.execute_update(&statement).await
    }
}

/// Mutations buffered by a read-write transaction and sent with its commit.
pub trait MutationContext {
    fn buffer(&mut self, mutations: Vec<Mutation>) -> Result<(), Error>;

    fn insert(&mut self, table: &str, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<(), Error> {
        self.buffer(vec![Mutation::insert(table, values)?])
    }

    fn update_row(&mut self, table: &str, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<(), Error> {
        self.buffer(vec![Mutation::update(table, values)?])
    }

    fn upsert(&mut self, table: &str, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<(), Error> {
        self.buffer(vec![Mutation::upsert(table, values)?])
    }

    fn replace(&mut self, table: &str, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<(), Error> {
        self.buffer(vec![Mutation::replace(table, values)?])
    }

    fn delete_rows(&mut self, table: &str, key_set: KeySet) -> Result<(), Error> {
        self.buffer(vec![Mutation::delete(table, key_set)])
    }
}
