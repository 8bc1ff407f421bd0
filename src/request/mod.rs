//! Request handling: the per-request context, the per-connection session
//! cell and the processor that maps request packets to responses.

pub use request_context::RequestContext;
pub use request_processor::RequestProcessor;
pub use session::{SessionState, DEFAULT_KEEP_ALIVE};

mod request_context;
mod request_processor;
mod session;
