//! Command handlers for account and session management

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use reqwest::Method;

use super::{Persistence, SessionContext, SessionEvent};
use crate::api::{ApiError, ApiRequest, AuthApi, HttpClient, RefreshFailure, SignupForm};

/// Use the given password or read one line from stdin.
fn password_or_prompt(password: Option<String>, prompt: &str) -> Result<String> {
    if let Some(p) = password {
        return Ok(p);
    }
    eprint!("{}: ", prompt);
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    let line = line.trim_end_matches(['\r', '\n']).to_string();
    if line.is_empty() {
        bail!("{} must not be empty", prompt);
    }
    Ok(line)
}

/// Log in and store the session
pub async fn login(
    api: &AuthApi,
    email: &str,
    password: Option<String>,
    persistence: Persistence,
) -> Result<()> {
    let password = password_or_prompt(password, "Password")?;
    let grant = api.login(email, &password, persistence).await?;

    let who = grant
        .user
        .as_ref()
        .and_then(|u| u.display_name())
        .unwrap_or_else(|| email.to_string());
    match persistence {
        Persistence::Durable => println!("Logged in as {}.", who),
        Persistence::Ephemeral => println!("Logged in as {} (this run only).", who),
    }
    if grant.refresh_token.is_none() {
        eprintln!("Warning: no refresh token issued; you will need to log in again when the session expires.");
    }
    Ok(())
}

/// Clear stored credentials
pub fn logout(api: &AuthApi, keep_profile: bool) -> Result<()> {
    api.logout(keep_profile)?;
    if keep_profile {
        println!("Logged out. Cached profile kept.");
    } else {
        println!("Logged out.");
    }
    Ok(())
}

/// Exchange the stored refresh token for a new access token now
pub async fn refresh(api: &AuthApi, session: &SessionContext) -> Result<()> {
    let store = session.store();
    let refresh_token = store
        .refresh_token()
        .context("No refresh token stored. Run 'edu-portal login' first.")?;
    let identity = store
        .user()
        .and_then(|u| u.identity().map(String::from))
        .context("No cached user identity. Run 'edu-portal login' first.")?;
    let persistence = store.persistence().unwrap_or(Persistence::Ephemeral);

    let grant = match api.refresh(&identity, &refresh_token).await {
        Ok(grant) => grant,
        Err(e @ ApiError::Refresh(RefreshFailure::Rejected { .. })) => {
            session.invalidate();
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    store.save_token(&grant.access_token, persistence.is_durable())?;
    if let Some(ref rotated) = grant.refresh_token {
        store.save_refresh_token(rotated, persistence.is_durable())?;
    }
    session.notify(SessionEvent::Refreshed);
    println!("Session refreshed.");
    Ok(())
}

/// Display current auth status
pub fn status(session: &SessionContext) -> Result<()> {
    let store = session.store();

    match (store.token(), store.persistence()) {
        (Some(_), Some(Persistence::Durable)) => println!("Access token:  present (durable)"),
        (Some(_), _) => println!("Access token:  present (this run only)"),
        (None, _) => println!("Access token:  none"),
    }

    match store.refresh_token() {
        Some(_) => println!("Refresh token: present"),
        None => println!("Refresh token: none"),
    }

    match store.user() {
        Some(user) => println!(
            "User:          {}",
            user.display_name().unwrap_or_else(|| "(unnamed)".to_string())
        ),
        None => println!("User:          none"),
    }

    if store.token().is_none() {
        println!("\nRun 'edu-portal login' to authenticate.");
    }
    Ok(())
}

/// Show the cached profile of the signed-in user
pub fn whoami(session: &SessionContext) -> Result<()> {
    let user = session
        .store()
        .user()
        .context("Not logged in. Run 'edu-portal login' first.")?;

    let field = |v: Option<&str>| v.unwrap_or("(none)").to_string();
    println!();
    println!(
        "Name:        {}",
        user.display_name().unwrap_or_else(|| "(none)".to_string())
    );
    println!("Email:       {}", field(user.email.as_deref()));
    println!("Username:    {}", field(user.username.as_deref()));
    println!("Phone:       {}", field(user.phone.as_deref()));
    if let Some(ref id) = user.student_id {
        println!("Student ID:  {}", id);
    }
    if let Some(pct) = user.profile_completion {
        println!("Profile:     {:.0}% complete", pct);
    }
    Ok(())
}

pub async fn signup(api: &AuthApi, mut form: SignupForm, password: Option<String>) -> Result<()> {
    form.password = password_or_prompt(password, "Password")?;
    let message = api.signup(&form).await?;
    println!("{}", message);
    println!("Confirm with: edu-portal confirm {} <code>", form.email);
    Ok(())
}

pub async fn confirm(api: &AuthApi, email: &str, code: &str) -> Result<()> {
    println!("{}", api.confirm_verification_code(email, code).await?);
    Ok(())
}

pub async fn resend_code(api: &AuthApi, email: &str) -> Result<()> {
    println!("{}", api.resend_verification_code(email).await?);
    Ok(())
}

pub async fn forgot_password(api: &AuthApi, email: &str) -> Result<()> {
    println!("{}", api.forgot_password(email).await?);
    Ok(())
}

pub async fn reset_password(
    api: &AuthApi,
    email: &str,
    code: &str,
    new_password: Option<String>,
) -> Result<()> {
    let new_password = password_or_prompt(new_password, "New password")?;
    println!(
        "{}",
        api.confirm_forgot_password(email, code, &new_password)
            .await?
    );
    Ok(())
}

pub async fn change_password(
    api: &AuthApi,
    old_password: Option<String>,
    new_password: Option<String>,
) -> Result<()> {
    let old_password = password_or_prompt(old_password, "Current password")?;
    let new_password = password_or_prompt(new_password, "New password")?;
    println!("{}", api.change_password(&old_password, &new_password).await?);
    Ok(())
}

/// Issue an arbitrary authenticated request and print the JSON reply.
pub async fn request(
    client: &HttpClient,
    method: &str,
    path: &str,
    headers: &[String],
    body: Option<&str>,
) -> Result<()> {
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let (path, query) = path.split_once('?').unwrap_or((path, ""));
    let mut req = ApiRequest::new(method, path);
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        req = req.query(&key, &value);
    }
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Header must look like 'Name: value': {}", header))?;
        req = req.header(name.trim(), value.trim());
    }
    if let Some(body) = body {
        let value: serde_json::Value =
            serde_json::from_str(body).context("Request body must be valid JSON")?;
        req = req.json(value);
    }

    let resp = client.send(&req).await?;
    match resp.json::<serde_json::Value>() {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", resp.text()),
    }
    Ok(())
}
