//! The session pool, transaction runner and streaming result decoder of an asynchronous Cloud Spanner client.
//!
//! The transport is left to the application: requests are sent through a [`Connection`], typically a thin wrapper
//! around the generated gRPC stub of the `google.spanner.v1.Spanner` service.
//!
//! # Example
//!
//! ```no_run
//! use spanner_core::{Client, Connection, DmlContext, Error, ReadContext};
//!
//! async fn example(connection: impl Connection + 'static) -> Result<(), Error> {
//!     let client = Client::config()
//!         .database("projects/my-project/instances/my-instance/databases/my-database".parse()?)
//!         .connect(connection)
//!         .await?;
//!
//!     // assuming the following table:
//!     //   person(id INT64, name STRING(MAX), data BYTES(MAX))
//!     client
//!         .read_write()
//!         .run(|tx| {
//!             Box::pin(async move {
//!                 tx.update(
//!                     "INSERT INTO person(id, name, data) VALUES(@id, @name, NULL)",
//!                     &[("id", &42), ("name", &"ferris")],
//!                 )
//!                 .await
//!             })
//!         })
//!         .await?;
//!
//!     let result_set = client
//!         .read_only()
//!         .query("SELECT * FROM person", &[])
//!         .await?;
//!
//!     for row in result_set.iter() {
//!         let id: u32 = row.get("id")?;
//!         let name: &str = row.get("name")?;
//!         let data: Option<&[u8]> = row.get("data")?;
//!
//!         println!("found person: {} {} {:?}", id, name, data);
//!     }
//!
//!     client.close().await
//! }
//! ```
//!
//! # Sessions
//!
//! Every request runs on a server-side session. Sessions are expensive to create, so the [`SessionPool`] creates
//! them in batches, hands them out to transactions, keeps idle ones alive and evicts the ones that are no longer needed.
//! See [`SessionPoolConfig`] for its settings.
//!
//! # Transactions
//!
//! Cloud Spanner [supports](https://cloud.google.com/spanner/docs/transactions) several transaction "modes":
//!
//! * read-only: provides guaranteed consistency between several reads, cannot write;
//! * read-write: the only way to write into Cloud Spanner they use a combination of locking and retries and are typically more expensive;
//! * partitioned DML: runs a single DML statement over the whole database, see [`Client::run_partitioned_update`].
//!
//! ## Read Only
//!
//! Reads can be bounded to determine what data is visible to them, see [`TimestampBound`].
//! Single reads are done with [`Client::read_only()`] and consistent reads at a single timestamp with [`Client::snapshot()`].
//! Both implement [`ReadContext`] and stream their rows through a [`RowStream`].
//! Large queries and reads can be split into partitions executed in parallel, see [`Client::batch_read_only()`].
//!
//! ## Read Write
//!
//! Read / write transactions are done through [`TransactionRunner::run`] which hands a [`ReadWriteTransaction`] to the
//! provided closure. When a transaction that conflicts with another tries to commit, Cloud Spanner will reject one of them
//! and let the client know it may retry. The runner encapsulates the necessary retry logic such that applications do not
//! need to implement it themselves: the closure may be invoked more than once.

pub use crate::batch::*;
pub use crate::client::*;
pub use crate::config::*;
pub use crate::connection::*;
pub use crate::context::*;
pub use crate::error::Error;
pub use crate::from_spanner::*;
pub use crate::keys::*;
pub use crate::mutation::*;
pub use crate::pool::*;
pub use crate::resource::*;
pub use crate::result_set::*;
pub use crate::row_stream::RowStream;
pub use crate::runner::TransactionRunner;
pub use crate::session::*;
pub use crate::statement::*;
pub use crate::to_spanner::*;
pub use crate::transaction::*;
pub use crate::types::*;
pub use crate::value::*;

pub mod proto;

mod batch;
mod client;
mod config;
mod connection;
mod context;
mod error;
mod from_spanner;
mod keys;
mod mutation;
mod pool;
mod requests;
mod resource;
mod result_set;
mod row_stream;
mod runner;
mod session;
mod statement;
mod to_spanner;
mod transaction;
mod types;
mod value;
