//! Caller identity, as forwarded by the authenticating proxy in front of us.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::error::EngineError;
use crate::findings::Scope;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub is_admin: bool,
}

impl Caller {
    /// Admins see the whole fleet; everyone else only their own findings.
    pub fn scope(&self) -> Scope {
        if self.is_admin {
            Scope::Fleet
        } else {
            Scope::User(self.user_id.clone())
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(EngineError::Unauthorized.into())
        }
    }
}

/// Admin scope comes from the proxy's role header or from the stored user
/// record.
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthenticated)?;
        let role_admin = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|role| role.trim().eq_ignore_ascii_case("admin"));
        let is_admin = role_admin
            || state
                .registry
                .get_user(user_id)
                .await?
                .is_some_and(|user| user.is_admin);

        Ok(Caller {
            user_id: user_id.to_string(),
            is_admin,
        })
    }
}
