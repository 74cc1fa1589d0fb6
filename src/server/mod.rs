mod assets;
pub mod dto;
pub mod response;
mod router;
mod tags;

pub use router::{AppState, create_router};
