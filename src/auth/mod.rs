//! Authentication: session tokens, password hashing, request middleware

pub mod middleware;
pub mod password;
pub mod session;

pub use middleware::{extract_token, session_auth_middleware, AuthContext};
pub use password::PasswordHasher;
pub use session::{SessionClaims, SessionService};
