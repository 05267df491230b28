use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::RetryPolicy;
use crate::db::Database;
use crate::identity::{IdentityProvider, TrustedHeaderProvider};
use crate::ledger::VoteLedger;
use crate::tally::TallyReader;

/// Shared by every request. Holds handles only; all mutable state lives in the
/// database.
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub ledger: VoteLedger,
    pub reader: TallyReader,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(database: Database, retry: RetryPolicy) -> Self {
        Self::with_identity(database, retry, Arc::new(TrustedHeaderProvider))
    }

    pub fn with_identity(database: Database, retry: RetryPolicy, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            ledger: VoteLedger::new(database.clone(), retry),
            reader: TallyReader::new(database.clone()),
            database,
            identity,
        }
    }
}

impl FromRef<AppState> for Arc<dyn IdentityProvider> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.identity)
    }
}
