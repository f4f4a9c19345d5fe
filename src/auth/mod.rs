//! Bearer-token authentication with admin gating.
//!
//! Access tokens are stateless and checked by signature, expiry and type.
//! The user they name is loaded on every request so deactivation takes effect
//! immediately, without waiting for the token to expire.

mod bearer;
mod errors;
mod extractors;
mod ip;
mod state;

pub use bearer::bearer_token;
pub use errors::{ApiAuthError, AuthError};
pub use extractors::{AdminUser, CurrentUser, require_admin, resolve_user};
pub use ip::client_ip;
pub use state::HasAuthBackend;
