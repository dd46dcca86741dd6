//! Authenticated HTTP client for the portal API
//!
//! Attaches the stored bearer token to every request and recovers from a
//! rejected token with one refresh, shared by all callers that were rejected
//! at the same time.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::auth::refresh_session;
use super::refresh::{RefreshCoordinator, RefreshLease, RefreshTicket};
use super::{ApiError, ApiRequest, Envelope, RawResponse, Transport};
use crate::auth::{Persistence, SessionContext, SessionEvent};

pub struct HttpClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionContext>,
    refresh: RefreshCoordinator,
}

impl HttpClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionContext>,
        refresh_wait: Duration,
    ) -> Self {
        Self {
            transport,
            session,
            refresh: RefreshCoordinator::new(refresh_wait),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Send with the stored bearer token, refreshing once on 401.
    pub async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ApiError> {
        let token = self.session.store().token();
        let resp = self.transport.execute(request, token.as_deref()).await?;
        if resp.status != 401 {
            return check_response(resp);
        }

        tracing::debug!("{} returned 401, recovering session", request);
        let fresh = self.recover(token.as_deref()).await?;
        self.retry(request, &fresh).await
    }

    /// The single replay after recovery. A second 401 ends the session.
    async fn retry(&self, request: &ApiRequest, token: &str) -> Result<RawResponse, ApiError> {
        let resp = self.transport.execute(request, Some(token)).await?;
        if resp.status == 401 {
            tracing::warn!("{} rejected again after token refresh", request);
            self.session.invalidate();
            return Err(ApiError::SessionExpired);
        }
        check_response(resp)
    }

    /// Send without credentials and without refresh handling.
    pub async fn send_public(&self, request: &ApiRequest) -> Result<RawResponse, ApiError> {
        let resp = self.transport.execute(request, None).await?;
        check_response(resp)
    }

    /// Authenticated request whose body is a standard envelope.
    pub async fn send_envelope<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<Envelope<T>, ApiError> {
        let resp = self.send(request).await?;
        Envelope::parse(&resp)
    }

    /// Public request whose body is a standard envelope.
    pub async fn send_public_envelope<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<Envelope<T>, ApiError> {
        let resp = self.send_public(request).await?;
        Envelope::parse(&resp)
    }

    /// Produce a token to replay with: one that someone else already
    /// obtained, or the result of the shared refresh.
    async fn recover(&self, sent_with: Option<&str>) -> Result<String, ApiError> {
        if let Some(current) = self.replaced_token(sent_with) {
            tracing::debug!("Token was refreshed meanwhile, replaying");
            return Ok(current);
        }

        let store = self.session.store();
        let Some(refresh_token) = store.refresh_token() else {
            self.session.invalidate();
            return Err(ApiError::RefreshUnavailable("no refresh token stored"));
        };
        let Some(identity) = store
            .user()
            .and_then(|u| u.identity().map(String::from))
        else {
            self.session.invalidate();
            return Err(ApiError::RefreshUnavailable("no user identity stored"));
        };

        match self.refresh.begin() {
            RefreshTicket::Follower(pending) => pending.wait().await,
            RefreshTicket::Leader(lease) => {
                // A refresh may have settled between the 401 and taking the lease
                if let Some(current) = self.replaced_token(sent_with) {
                    lease.settle(Ok(current.clone()));
                    return Ok(current);
                }
                self.lead_refresh(lease, &identity, &refresh_token).await
            }
        }
    }

    fn replaced_token(&self, sent_with: Option<&str>) -> Option<String> {
        self.session
            .store()
            .token()
            .filter(|current| Some(current.as_str()) != sent_with)
    }

    async fn lead_refresh(
        &self,
        lease: RefreshLease<'_>,
        identity: &str,
        refresh_token: &str,
    ) -> Result<String, ApiError> {
        let store = self.session.store();
        let persistence = store.persistence().unwrap_or(Persistence::Ephemeral);

        tracing::info!("Refreshing access token");
        match refresh_session(self.transport.as_ref(), identity, refresh_token).await {
            Ok(grant) => {
                let durable = persistence.is_durable();
                if let Err(e) = store.save_token(&grant.access_token, durable) {
                    tracing::warn!("Failed to persist refreshed token: {:#}", e);
                }
                if let Some(ref rotated) = grant.refresh_token {
                    if let Err(e) = store.save_refresh_token(rotated, durable) {
                        tracing::warn!("Failed to persist rotated refresh token: {:#}", e);
                    }
                }
                self.session.notify(SessionEvent::Refreshed);

                let released = lease.settle(Ok(grant.access_token.clone()));
                tracing::info!(released, "Access token refreshed");
                Ok(grant.access_token)
            }
            Err(failure) => {
                tracing::warn!("Token refresh failed: {}", failure);
                // Purge before going idle so a late 401 cannot lead a second
                // refresh with the rejected token
                self.session.invalidate();
                lease.settle(Err(failure.clone()));
                Err(failure.into())
            }
        }
    }
}

/// Pass 2xx responses through; turn anything else into a backend error.
fn check_response(resp: RawResponse) -> Result<RawResponse, ApiError> {
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(ApiError::from_status(resp.status, &resp.body))
    }
}
