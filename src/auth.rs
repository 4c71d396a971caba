use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::ServiceError;

const USER_HEADER: &str = "x-user-id";
const ORG_HEADER: &str = "x-org-id";
const ROLE_HEADER: &str = "x-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Member,
    Admin,
}

/// The authenticated principal, as produced by the upstream identity layer
/// and injected by the gateway as trusted headers. This service consumes the
/// contract; it never performs token exchange itself.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub role: Role,
}

impl Principal {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_uuid = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<Uuid>().ok())
        };
        let user_id = header_uuid(USER_HEADER).ok_or(ServiceError::Unauthorized)?;
        let org_id = header_uuid(ORG_HEADER).ok_or(ServiceError::Unauthorized)?;
        let role = match parts
            .headers
            .get(ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            Some("admin") => Role::Admin,
            _ => Role::Member,
        };
        Ok(Self {
            user_id,
            org_id,
            role,
        })
    }
}
