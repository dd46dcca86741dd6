//! Authentication state for the education portal
//!
//! Holds the current session's tokens and user record, and the command
//! handlers for login, logout, account confirmation and password flows.

pub mod flows;
pub mod session;
pub mod tokens;
pub mod user;

pub use session::{SessionContext, SessionEvent};
pub use tokens::{Persistence, TokenStore};
pub use user::UserRecord;
