//! HTTP and voice gateway surface of `VoxRelay`

pub mod http;
pub mod voice;

pub use http::{create_router, AppState};
