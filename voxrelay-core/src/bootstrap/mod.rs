//! Startup helpers shared by the server binary

mod config;
mod database;
mod store;

pub use config::load_config;
pub use database::init_database;
pub use store::build_session_store;
