use std::sync::Arc;

use crate::db::DocumentStore;
use crate::services::DocumentService;
use crate::ws::HubHandle;

/// Shared handles carried through the axum router.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub hub: HubHandle,
    pub documents: DocumentService,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, hub: HubHandle) -> Self {
        let documents = DocumentService::new(store.clone(), hub.clone());
        Self {
            store,
            hub,
            documents,
        }
    }
}
