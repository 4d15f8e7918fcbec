pub mod filters;
pub mod movies;
pub mod runtime;
pub mod tokens;
pub mod users;
