//! Webhook capture, verification and parsing.

pub mod capture;
pub mod parser;
pub mod verifier;

pub use capture::*;
pub use parser::*;
pub use verifier::*;
