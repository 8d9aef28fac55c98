#![forbid(unsafe_code)]
#![doc = "Common error and identifier types shared across the rivet TLS engine."]

pub mod alert;
pub mod error;
pub mod ident;

pub use alert::*;
pub use error::*;
pub use ident::*;
