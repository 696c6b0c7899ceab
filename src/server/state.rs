use std::sync::Arc;
use std::time::Instant;

use crate::context::RealtimeContext;

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<RealtimeContext>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(context: Arc<RealtimeContext>) -> Self {
        Self {
            context,
            started_at: Instant::now(),
        }
    }
}
