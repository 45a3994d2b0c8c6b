pub mod app_state;
pub mod config;
mod routes;

pub use app_state::AppState;
pub use routes::build_router;
