//! Shared application state.

use crate::manager::EnvironmentManager;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<EnvironmentManager>,
}

impl AppState {
    pub fn new(manager: EnvironmentManager) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }
}
