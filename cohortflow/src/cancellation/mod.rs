//! Cooperative cancellation for background tick drivers.

mod token;

pub use token::CancellationToken;
