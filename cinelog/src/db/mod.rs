pub mod errors;
pub mod models;
pub mod stores;

pub use errors::DbError;
pub use stores::Stores;
