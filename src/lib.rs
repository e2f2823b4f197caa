#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

pub mod calibration;
pub mod config;
pub mod error;
pub mod export;
pub mod fit;
pub mod ingest;
pub mod injection;
pub mod math;
pub mod quantification;
pub mod registry;
pub mod session;

pub use error::{Computation, EmptySelection, Error};
pub use session::Session;

pub type Result<T> = ::std::result::Result<T, error::Error>;
