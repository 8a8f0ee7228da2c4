pub mod auth;
pub mod context;
pub mod error;

pub use context::{Actor, ActorType, ClinicContext};
pub use error::AppError;
