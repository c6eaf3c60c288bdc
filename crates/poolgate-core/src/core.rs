use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use poolgate_pool::Ledger;

use crate::engine::StreamProxy;
use crate::handler::{chat_completions_handler, responses_handler, usage_handler};

pub struct CoreState {
    pub engine: Arc<StreamProxy>,
    pub ledger: Arc<Ledger>,
}

pub struct Core {
    state: Arc<CoreState>,
}

impl Core {
    pub fn new(engine: Arc<StreamProxy>, ledger: Arc<Ledger>) -> Self {
        Self {
            state: Arc::new(CoreState { engine, ledger }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/responses", post(responses_handler))
            .route("/v1/chat/completions", post(chat_completions_handler))
            .route("/v1/usage", get(usage_handler))
            .with_state(self.state.clone())
    }

    pub fn state(&self) -> Arc<CoreState> {
        self.state.clone()
    }
}
