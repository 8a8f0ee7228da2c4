pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod stages;
pub mod state;
pub mod store;

pub use state::LeadCellState;
