pub mod headers;
pub mod request;

pub use headers::add_forwarded_for;
pub use request::handle_request;
