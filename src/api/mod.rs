//! REST client for the education portal backend
//!
//! Every endpoint answers with the same `{ response, message, statusCode,
//! success }` envelope. Authenticated calls go through `HttpClient`, which
//! attaches the bearer token and refreshes it once when the backend answers
//! 401.

pub mod auth;
pub mod client;
pub mod envelope;
pub mod error;
pub mod refresh;
pub mod transport;

pub use auth::{AuthApi, SignupForm};
pub use client::HttpClient;
pub use envelope::Envelope;
pub use error::{ApiError, ErrorClass, RefreshFailure};
pub use transport::{ApiRequest, RawResponse, ReqwestTransport, Transport};
