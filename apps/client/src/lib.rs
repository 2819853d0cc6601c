pub mod aggregator;
pub mod chat;
pub mod codec;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod prediction;
pub mod service;
pub mod session;
pub mod shaping;

#[cfg(test)]
mod testing;

pub use errors::{ClientError, ValidationError};
pub use lifecycle::{Failure, RequestSlot, RequestState, RetainPolicy};
pub use session::PredictorSession;
