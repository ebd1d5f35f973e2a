pub mod error;
pub mod routes;

use db::DBService;
use services::services::dispatch::Dispatcher;

/// Shared handler state: the store plus the coordination engine built on it.
#[derive(Clone)]
pub struct AppState {
    db: DBService,
    dispatcher: Dispatcher,
}

impl AppState {
    pub async fn new() -> Result<Self, sqlx::Error> {
        let db = DBService::new().await?;
        let dispatcher = Dispatcher::new(db.clone());
        Ok(Self { db, dispatcher })
    }

    pub fn from_parts(db: DBService, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
