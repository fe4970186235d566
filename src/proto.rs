//! Wire messages of the `google.spanner.v1` and `google.rpc` packages.
//!
//! Connections hand these to the service as-is.

pub mod google {
    pub use google_api_proto::google::{rpc, spanner};
}
