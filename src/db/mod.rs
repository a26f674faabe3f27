// Database persistence
pub mod postgres;

pub use postgres::PostgresPersistence;
