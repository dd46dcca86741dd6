//! Auth endpoints: login, refresh, signup confirmation and password flows

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ApiError, ApiRequest, Envelope, HttpClient, RefreshFailure, Transport};
use crate::auth::{Persistence, UserRecord};

const LOGIN_PATH: &str = "/api/auth/login";
const REFRESH_PATH: &str = "/api/auth/refresh";
const SIGNUP_PATH: &str = "/api/auth/signup";
const CONFIRM_CODE_PATH: &str = "/api/auth/confirmVerificationCode";
const RESEND_CODE_PATH: &str = "/api/auth/resendVerificationCode";
const FORGOT_PASSWORD_PATH: &str = "/api/auth/forgotPassword";
const CONFIRM_FORGOT_PASSWORD_PATH: &str = "/api/auth/confirmForgotPassword";
const CHANGE_PASSWORD_PATH: &str = "/api/auth/changePassword";

/// Payload of a successful login
#[derive(Debug, Clone, Deserialize)]
pub struct LoginGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserRecord>,
}

/// Payload of the refresh endpoint. `access_token` is checked by the caller.
#[derive(Debug, Clone, Deserialize)]
struct RefreshPayload {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// New credentials from a successful refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshGrant {
    pub access_token: String,
    /// Present when the backend rotates refresh tokens
    pub refresh_token: Option<String>,
}

/// Registration form
#[derive(Debug, Clone, Serialize)]
pub struct SignupForm {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Call the refresh endpoint directly: no bearer, no retry.
///
/// Anything short of a 2xx envelope carrying a non-empty `access_token`
/// counts as failure.
pub async fn refresh_session(
    transport: &dyn Transport,
    email: &str,
    refresh_token: &str,
) -> Result<RefreshGrant, RefreshFailure> {
    let request = ApiRequest::post(
        REFRESH_PATH,
        json!({ "email": email, "refresh_token": refresh_token }),
    );
    let resp = transport
        .execute(&request, None)
        .await
        .map_err(|e| RefreshFailure::Network(e.to_string()))?;

    if !resp.is_success() {
        let message = match ApiError::from_status(resp.status, &resp.body) {
            ApiError::Backend { message, .. } => message,
            other => other.to_string(),
        };
        return Err(RefreshFailure::Rejected {
            status: resp.status,
            message,
        });
    }

    let envelope: Envelope<RefreshPayload> = match Envelope::parse(&resp) {
        Ok(envelope) => envelope,
        Err(ApiError::Backend { status, message, .. }) => {
            return Err(RefreshFailure::Rejected { status, message });
        }
        Err(e) => {
            tracing::debug!("Unparseable refresh response: {}", e);
            return Err(RefreshFailure::MissingAccessToken);
        }
    };

    let payload = envelope.response.ok_or(RefreshFailure::MissingAccessToken)?;
    let access_token = payload
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or(RefreshFailure::MissingAccessToken)?;
    Ok(RefreshGrant {
        access_token,
        refresh_token: payload.refresh_token.filter(|t| !t.is_empty()),
    })
}

/// Typed wrappers over the auth endpoints.
pub struct AuthApi {
    client: Arc<HttpClient>,
}

impl AuthApi {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }

    /// Authenticate and store the resulting session in the chosen tier.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        persistence: Persistence,
    ) -> Result<LoginGrant, ApiError> {
        let request = ApiRequest::post(LOGIN_PATH, json!({ "email": email, "password": password }));
        let envelope: Envelope<LoginGrant> = self.client.send_public_envelope(&request).await?;
        let grant = envelope.into_response()?;
        if grant.access_token.is_empty() {
            return Err(ApiError::InvalidResponse(
                "login response has an empty access_token".to_string(),
            ));
        }

        self.client.session().sign_in(
            &grant.access_token,
            grant.refresh_token.as_deref(),
            grant.user.as_ref(),
            persistence,
        )?;
        tracing::info!("Signed in as {}", email);
        Ok(grant)
    }

    /// Exchange a refresh token without touching stored state.
    pub async fn refresh(&self, email: &str, refresh_token: &str) -> Result<RefreshGrant, ApiError> {
        Ok(refresh_session(self.client.transport(), email, refresh_token).await?)
    }

    pub async fn signup(&self, form: &SignupForm) -> Result<String, ApiError> {
        let body = serde_json::to_value(form)
            .map_err(|e| ApiError::InvalidResponse(format!("unserializable signup form: {}", e)))?;
        let request = ApiRequest::post(SIGNUP_PATH, body);
        let envelope: Envelope<Value> = self.client.send_public_envelope(&request).await?;
        Ok(envelope.message_or("Account created, check your email for a verification code"))
    }

    pub async fn confirm_verification_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<String, ApiError> {
        let request = ApiRequest::get(CONFIRM_CODE_PATH)
            .query("email", email)
            .query("verificationCode", code);
        let envelope: Envelope<Value> = self.client.send_public_envelope(&request).await?;
        Ok(envelope.message_or("Account verified"))
    }

    pub async fn resend_verification_code(&self, email: &str) -> Result<String, ApiError> {
        let request = ApiRequest::get(RESEND_CODE_PATH).segment(email);
        let envelope: Envelope<Value> = self.client.send_public_envelope(&request).await?;
        Ok(envelope.message_or("Verification code sent"))
    }

    pub async fn forgot_password(&self, email: &str) -> Result<String, ApiError> {
        let request = ApiRequest::get(FORGOT_PASSWORD_PATH).segment(email);
        let envelope: Envelope<Value> = self.client.send_public_envelope(&request).await?;
        Ok(envelope.message_or("Password reset code sent"))
    }

    pub async fn confirm_forgot_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<String, ApiError> {
        let request = ApiRequest::get(CONFIRM_FORGOT_PASSWORD_PATH)
            .query("email", email)
            .query("confirmationCode", code)
            .query("newPassword", new_password);
        let envelope: Envelope<Value> = self.client.send_public_envelope(&request).await?;
        Ok(envelope.message_or("Password reset"))
    }

    /// Authenticated; goes through the refresh protocol.
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<String, ApiError> {
        let request = ApiRequest::post(
            CHANGE_PASSWORD_PATH,
            json!({ "old_password": old_password, "new_password": new_password }),
        );
        let envelope: Envelope<Value> = self.client.send_envelope(&request).await?;
        Ok(envelope.message_or("Password changed"))
    }

    /// Forget the local session, optionally keeping the cached profile.
    pub fn logout(&self, keep_profile: bool) -> Result<(), ApiError> {
        self.client.session().sign_out(keep_profile)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::{signed_in_session, FakeBackend};
    use crate::auth::{SessionContext, SessionEvent, TokenStore};

    use std::time::Duration;

    fn api_for(backend: Arc<FakeBackend>, session: Arc<SessionContext>) -> AuthApi {
        AuthApi::new(Arc::new(HttpClient::new(
            backend,
            session,
            Duration::from_secs(5),
        )))
    }

    #[tokio::test]
    async fn test_login_stores_session() {
        let backend = Arc::new(FakeBackend::new("T1").reply_to_public(
            200,
            r#"{"response":{"access_token":"T1","refresh_token":"R1","user":{"email":"a@b.com","firstName":"Ada"}},"message":"Login successful","statusCode":200,"success":true}"#,
        ));
        let session = Arc::new(SessionContext::new(TokenStore::in_memory()));
        let mut rx = session.subscribe();
        let api = api_for(backend.clone(), session.clone());

        let grant = api
            .login("a@b.com", "x", Persistence::Durable)
            .await
            .unwrap();
        assert_eq!(grant.access_token, "T1");

        assert_eq!(session.store().token().as_deref(), Some("T1"));
        assert_eq!(session.store().refresh_token().as_deref(), Some("R1"));
        assert_eq!(
            session.store().user().unwrap().first_name.as_deref(),
            Some("Ada")
        );
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::SignedIn);

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].0, LOGIN_PATH);
        assert_eq!(seen[0].1, None);
        assert_eq!(
            seen[0].2,
            Some(json!({"email": "a@b.com", "password": "x"}))
        );
    }

    #[tokio::test]
    async fn test_failed_login_leaves_store_untouched() {
        let backend = Arc::new(FakeBackend::new("T1").reply_to_public(
            200,
            r#"{"response":null,"message":"Incorrect username or password","statusCode":401,"success":false}"#,
        ));
        let session = Arc::new(SessionContext::new(TokenStore::in_memory()));
        let api = api_for(backend.clone(), session.clone());

        let err = api
            .login("a@b.com", "wrong", Persistence::Durable)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Request failed (401): Incorrect username or password");
        assert_eq!(session.store().token(), None);
        assert_eq!(backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_login_reports_backend_error_despite_payload() {
        let backend = Arc::new(FakeBackend::new("T1").reply_to_public(
            200,
            r#"{"response":{"errors":["bad"]},"message":"Incorrect username or password","statusCode":401,"success":false}"#,
        ));
        let session = Arc::new(SessionContext::new(TokenStore::in_memory()));
        let api = api_for(backend, session.clone());

        match api.login("a@b.com", "wrong", Persistence::Durable).await {
            Err(ApiError::Backend {
                status,
                message,
                body,
            }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect username or password");
                assert_eq!(body.unwrap()["response"]["errors"][0], "bad");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(session.store().token(), None);
    }

    #[tokio::test]
    async fn test_signup_failure_carries_backend_body() {
        let backend = Arc::new(FakeBackend::new("T1").reply_to_public(
            200,
            r#"{"response":{"field":"email","reason":"taken"},"message":"Validation failed","statusCode":422,"success":false}"#,
        ));
        let api = api_for(backend, Arc::new(SessionContext::new(TokenStore::in_memory())));
        let form = SignupForm {
            email: "a@b.com".into(),
            password: "x".into(),
            first_name: None,
            last_name: None,
            phone: None,
        };

        match api.signup(&form).await {
            Err(ApiError::Backend { status, body, .. }) => {
                assert_eq!(status, 422);
                assert_eq!(body.unwrap()["response"]["reason"], "taken");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_session_requires_access_token() {
        let backend = FakeBackend::new("T1")
            .reply_to_refresh(200, r#"{"response":{},"success":true}"#)
            .reply_to_refresh(200, "<html>gateway</html>")
            .reply_to_refresh(200, r#"{"response":{"access_token":"T9"},"success":false,"message":"stale"}"#);

        assert_eq!(
            refresh_session(&backend, "a@b.com", "R1").await,
            Err(RefreshFailure::MissingAccessToken)
        );
        assert_eq!(
            refresh_session(&backend, "a@b.com", "R1").await,
            Err(RefreshFailure::MissingAccessToken)
        );
        assert_eq!(
            refresh_session(&backend, "a@b.com", "R1").await,
            Err(RefreshFailure::Rejected {
                status: 200,
                message: "stale".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_explicit_refresh_leaves_store_alone() {
        let backend = Arc::new(FakeBackend::new("T1").reply_to_refresh(
            200,
            r#"{"response":{"access_token":"T5","refresh_token":"R5"},"success":true}"#,
        ));
        let session = signed_in_session(Persistence::Durable);
        let api = api_for(backend, session.clone());

        let grant = api.refresh("a@b.com", "R1").await.unwrap();
        assert_eq!(
            grant,
            RefreshGrant {
                access_token: "T5".into(),
                refresh_token: Some("R5".into()),
            }
        );
        assert_eq!(session.store().token().as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_public_endpoints_build_expected_requests() {
        let ok = r#"{"response":null,"message":"done","statusCode":200,"success":true}"#;
        let backend = Arc::new(
            FakeBackend::new("T1")
                .reply_to_public(200, ok)
                .reply_to_public(200, ok)
                .reply_to_public(200, ok)
                .reply_to_public(200, ok)
                .reply_to_public(200, ok),
        );
        let session = Arc::new(SessionContext::new(TokenStore::in_memory()));
        let api = api_for(backend.clone(), session);

        let form = SignupForm {
            email: "a@b.com".into(),
            password: "x".into(),
            first_name: Some("Ada".into()),
            last_name: None,
            phone: None,
        };
        assert_eq!(api.signup(&form).await.unwrap(), "done");
        assert_eq!(api.confirm_verification_code("a@b.com", "123456").await.unwrap(), "done");
        assert_eq!(api.resend_verification_code("a@b.com").await.unwrap(), "done");
        assert_eq!(api.forgot_password("a@b.com").await.unwrap(), "done");
        assert_eq!(
            api.confirm_forgot_password("a@b.com", "654321", "n3w")
                .await
                .unwrap(),
            "done"
        );

        let paths: Vec<String> = backend
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _, _)| p.clone())
            .collect();
        assert_eq!(
            backend.seen.lock().unwrap()[0].2,
            Some(json!({"email": "a@b.com", "password": "x", "first_name": "Ada"}))
        );
        assert_eq!(
            paths,
            vec![
                "/api/auth/signup",
                "/api/auth/confirmVerificationCode",
                "/api/auth/resendVerificationCode/a@b.com",
                "/api/auth/forgotPassword/a@b.com",
                "/api/auth/confirmForgotPassword",
            ]
        );
    }

    #[tokio::test]
    async fn test_change_password_recovers_from_expired_token() {
        let backend = Arc::new(
            FakeBackend::new("T2").reply_to_refresh(200, r#"{"response":{"access_token":"T2"}}"#),
        );
        let session = signed_in_session(Persistence::Durable);
        let api = api_for(backend.clone(), session.clone());

        api.change_password("old", "new").await.unwrap();

        let seen = backend.seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.0, CHANGE_PASSWORD_PATH);
        assert_eq!(last.1.as_deref(), Some("T2"));
        assert_eq!(
            last.2,
            Some(json!({"old_password": "old", "new_password": "new"}))
        );
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let backend = Arc::new(FakeBackend::new("T1"));
        let session = signed_in_session(Persistence::Durable);
        let mut rx = session.subscribe();
        let api = api_for(backend, session.clone());

        api.logout(false).unwrap();
        assert_eq!(session.store().token(), None);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::SignedOut);
    }
}
