pub mod accounts;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod flow;
pub mod oauth;
pub mod session;

use crate::config::Config;
use crate::db::Database;
use crate::flow::LinkService;

use std::sync::Arc;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub link: Arc<LinkService>,
}
