pub mod client_pool;
pub mod context;
pub mod forwarding;
pub mod handler;
pub mod http_result;
pub mod server;

pub use client_pool::ClientPool;
pub use context::GateContext;
pub use http_result::HttpError;
pub use server::{run, serve};
