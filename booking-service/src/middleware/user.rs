//! Caller identity from trusted upstream headers.
//!
//! The BFF authenticates the user and forwards who they are in `X-User-*`
//! headers. This service never sees credentials.

use crate::workflow::Guest;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_EMAIL_HEADER: &str = "X-User-Email";
pub const USER_NAME_HEADER: &str = "X-User-Name";
pub const USER_ROLES_HEADER: &str = "X-User-Roles";

pub const STAFF_ROLE: &str = "staff";

#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub roles: Vec<String>,
}

impl UserContext {
    pub fn is_staff(&self) -> bool {
        self.roles.iter().any(|r| r == STAFF_ROLE)
    }

    pub fn guest(&self) -> Guest {
        Guest {
            user_id: self.user_id.clone(),
            email: self.email.clone().unwrap_or_default(),
            name: self.name.clone().unwrap_or_default(),
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!(
                "Missing X-User-ID header (required from BFF)"
            ))
        })?;

        let roles = header(parts, USER_ROLES_HEADER)
            .map(|r| {
                r.split(',')
                    .map(|role| role.trim().to_ascii_lowercase())
                    .filter(|role| !role.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        tracing::Span::current().record("user_id", user_id);

        Ok(UserContext {
            user_id: user_id.to_string(),
            email: header(parts, USER_EMAIL_HEADER).map(str::to_string),
            name: header(parts, USER_NAME_HEADER).map(str::to_string),
            roles,
        })
    }
}

/// A caller holding the staff role.
#[derive(Debug, Clone)]
pub struct StaffUser(pub UserContext);

#[async_trait]
impl<S> FromRequestParts<S> for StaffUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = UserContext::from_request_parts(parts, state).await?;
        if !user.is_staff() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Staff role required"
            )));
        }
        Ok(StaffUser(user))
    }
}
