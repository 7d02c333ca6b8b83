//! # courier-shared
//!
//! Types and pure logic shared by the Courier relay crates: identity tags,
//! id validation, Markdown helpers, constants, and error types.

pub mod constants;
pub mod error;
pub mod identity;
pub mod markdown;
pub mod types;

pub use error::{TagError, ValidationError};
pub use identity::{SigningMode, TagCodec, TagFormat, TagResolution};
pub use types::UserIdentity;
