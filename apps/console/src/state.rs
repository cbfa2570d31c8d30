use crate::client::ServerClient;
use crate::config::ConsoleConfig;
use crate::destinations::BackendModule;
use crate::filters::FilterGroupCatalog;
use crate::status::SharedStatus;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct ConsoleRuntimeState {
    pub config: ConsoleConfig,
    pub client: ServerClient,
    pub status: SharedStatus,
    /// Backend option lists, fetched on first use.
    pub backend_modules: Option<Arc<Vec<BackendModule>>>,
    /// Filter group catalog, fetched on first use.
    pub filter_groups: Option<Arc<FilterGroupCatalog>>,
}

impl ConsoleRuntimeState {
    pub fn new(config: ConsoleConfig, client: ServerClient, status: SharedStatus) -> Self {
        Self {
            config,
            client,
            status,
            backend_modules: None,
            filter_groups: None,
        }
    }
}

pub type SharedState = Arc<RwLock<ConsoleRuntimeState>>;
