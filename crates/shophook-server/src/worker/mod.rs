//! Background worker that drains the webhook job queue.

pub mod drain;

pub use drain::*;
