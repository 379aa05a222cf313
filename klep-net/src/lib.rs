// klep-net/src/lib.rs
pub mod http;
pub mod validation;

pub use http::{raw_document_url, RawDocumentFetcher};
pub use klep_common::error::{KlepError, Result};
pub use validation::{repository_location, validate_url, RepositoryLocation};
