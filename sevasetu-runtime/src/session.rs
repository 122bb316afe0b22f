use sevasetu_core::{SESSION_STORAGE_KEY, SessionId};

use crate::local_storage::LocalStorage;

/// Returns the persisted session id, creating and storing a fresh one when the
/// stored value is missing or malformed.
///
/// Storage failures are logged and never block a session: the id is still
/// usable for this run, it just won't survive a restart.
pub fn load_or_create_session_id(storage: &LocalStorage) -> SessionId {
    match storage.get(SESSION_STORAGE_KEY) {
        Ok(Some(raw)) => match SessionId::parse(&raw) {
            Some(id) => return id,
            None => log::warn!("Discarding malformed stored session id: {raw:?}"),
        },
        Ok(None) => {}
        Err(e) => log::warn!("Failed to read session storage: {e:#}"),
    }

    let id = SessionId::generate();
    if let Err(e) = storage.set(SESSION_STORAGE_KEY, id.as_str()) {
        log::warn!("Failed to persist session id: {e:#}");
    }
    log::info!("Created session id {id}");
    id
}
