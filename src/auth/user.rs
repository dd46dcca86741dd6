//! Cached profile of the signed-in user

use serde::{Deserialize, Serialize};

/// Profile snapshot returned by login and kept next to the session.
///
/// The backend has shipped these fields under several names over time, so
/// each one accepts its known aliases. Anything unrecognised is preserved in
/// `extra` so a save/load cycle does not drop data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "Email")]
    pub email: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "userName",
        alias = "user_name"
    )]
    pub username: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "phoneNumber",
        alias = "phone_number"
    )]
    pub phone: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "firstName",
        alias = "given_name"
    )]
    pub first_name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "lastName",
        alias = "family_name"
    )]
    pub last_name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "fullName",
        alias = "full_name"
    )]
    pub name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "profileCompletion"
    )]
    pub profile_completion: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "studentId",
        alias = "student"
    )]
    pub student_id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl UserRecord {
    /// Identity sent to the refresh endpoint: email, else username.
    pub fn identity(&self) -> Option<&str> {
        non_empty(&self.email).or_else(|| non_empty(&self.username))
    }

    /// Name for display: full name, then first + last, then identity.
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = non_empty(&self.name) {
            return Some(name.to_string());
        }
        let parts: Vec<&str> = [non_empty(&self.first_name), non_empty(&self.last_name)]
            .into_iter()
            .flatten()
            .collect();
        if !parts.is_empty() {
            return Some(parts.join(" "));
        }
        self.identity().map(String::from)
    }
}
