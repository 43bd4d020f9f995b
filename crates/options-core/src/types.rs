//! Core domain types for the hedged options engine.

pub mod discrepancy;
pub mod limits;
pub mod option;
pub mod order;
pub mod position;
pub mod signal;

pub use discrepancy::*;
pub use limits::*;
pub use option::*;
pub use order::*;
pub use position::*;
pub use signal::*;
