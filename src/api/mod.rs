//! Contract with the network-client collaborator.
//!
//! The cache layer never talks to the network itself; consumers hand it
//! an async fetch function returning the `ApiResponse` envelope, and the
//! layer inspects only that envelope - never status codes or transport
//! details.

pub mod response;

pub use response::{ApiResponse, Pagination};
