//! Core traits for registry-managed services.

mod service;

pub use service::{AsAny, Service};
pub(crate) use service::downcast;
