pub mod key_store;
pub mod pg_key_store;

pub use key_store::{mock, InMemoryKeyStore, KeyStore};
pub use pg_key_store::PgKeyStore;
