mod in_memory;
mod postgres;

pub use in_memory::InMemorySessionStore;
pub use postgres::PostgresSessionStore;
