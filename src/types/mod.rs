mod access;
mod models;

pub use access::*;
pub use models::*;
