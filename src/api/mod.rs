pub mod requests;
pub mod response;
pub mod routes;

pub use requests::LenientJson;
pub use routes::{router, serve, AppState};
