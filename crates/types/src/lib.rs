//! Shared domain types: ledger addresses, the hospital registry and
//! patient identifiers.

pub mod address;
pub mod hospital;
pub mod patient;

pub use address::*;
pub use hospital::*;
pub use patient::*;
