pub mod responses;
pub mod router;
pub mod state;
pub mod uploads;

pub use responses::{ApiMessage, json_error};
pub use state::AppState;
