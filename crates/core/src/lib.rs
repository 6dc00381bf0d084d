//! `tollgate-core`: foundation types shared by every tollgate crate.
//!
//! This crate contains no infrastructure concerns: identifiers, time, and the
//! domain-level error model only.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{SessionId, TokenId, UserId};
