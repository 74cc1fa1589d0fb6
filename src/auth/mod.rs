mod claims;
mod middleware;
mod provider;

pub use claims::{Claims, SCOPE_READ, SCOPE_WRITE};
pub use middleware::{AuthError, OptionalActor, RequireRead, RequireWrite};
pub use provider::{ClaimsProvider, Identity, StaticTokens};
