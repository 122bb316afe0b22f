//! Durable local state: the settings file and the small key/value store that keeps
//! the session identifier across restarts.

pub mod config_store;
pub mod fs;
pub mod local_storage;
pub mod session;

pub use config_store::ConfigStore;
pub use local_storage::LocalStorage;
pub use session::load_or_create_session_id;
