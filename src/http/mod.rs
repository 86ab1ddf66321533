//! HTTP transport: admission middleware and server.

mod middleware;
mod server;

pub use middleware::{
    enforce_admission, request_identity, IDENTITY_HEADER, REJECTION_MESSAGE, REQUEST_COUNT_HEADER,
};
pub use server::{router, HttpServer};
