pub mod approval;
pub mod backend;
pub mod cancel;
pub mod handle;
pub mod mock;
pub mod reconnect;
pub mod runtime;
pub mod types;

pub use backend::{RealBackend, SessionBackend};
pub use mock::MockBackend;
pub use runtime::{Runtime, RuntimeSession};
pub use types::{ApprovalChoice, CancelLevel, CreateSessionRequest, SessionInfo};
