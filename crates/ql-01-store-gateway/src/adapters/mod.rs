//! Concrete store adapters.

mod postgres;

pub use postgres::PostgresGateway;
