pub mod blob;
pub mod bundle;
pub mod config;
pub mod documents;
pub mod error;
pub mod form;
mod lifecycle;
pub mod linking;
pub mod revision;
pub mod service;
pub mod status;
mod store;
pub mod utils;
pub mod validation;

pub use error::{Error, ErrorCode, Result};
pub use service::PackageService;
