pub mod jwt;
pub mod middleware;
pub mod password;
pub mod principal;

pub use middleware::{activated_user, authenticate, authenticated_user, require_permission};
pub use principal::Principal;
