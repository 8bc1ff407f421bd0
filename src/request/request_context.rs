use std::sync::Arc;

use super::SessionState;

/// Everything the service may reach while handling one request. The context
/// is built by the dispatcher when it schedules service work, so the
/// service can locate its connection's session without any global state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub connection_id: u64,
    pub client_ip: String,
    pub session: Arc<SessionState>,
}

impl RequestContext {
    pub fn new(connection_id: u64, client_ip: String, session: Arc<SessionState>) -> Self {
        RequestContext {
            connection_id,
            client_ip,
            session,
        }
    }
}
