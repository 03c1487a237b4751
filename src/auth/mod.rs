pub mod jwt;
pub mod password;

use std::{fmt, str::FromStr};

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Auditor,
    Department,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Auditor => "auditor",
            Role::Department => "department",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "auditor" => Ok(Role::Auditor),
            "department" => Ok(Role::Department),
            other => Err(anyhow::anyhow!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
    pub username: String,
    pub role: Role,
    pub department: Option<String>,
}

impl AuthenticatedUser {
    /// Department users may only act for their own department; everyone
    /// else may act for any department.
    pub fn ensure_can_act_for(&self, department: &str) -> Result<(), AppError> {
        match self.role {
            Role::Department => {
                let own = self.department.as_deref().unwrap_or_default();
                if own.trim().eq_ignore_ascii_case(department.trim()) {
                    Ok(())
                } else {
                    Err(AppError::forbidden(format!(
                        "user '{}' cannot act for department '{department}'",
                        self.username
                    )))
                }
            }
            Role::Admin | Role::Auditor => Ok(()),
        }
    }

    /// Lifecycle decisions (assignments, final remarks, freezing, rejoinder
    /// rounds) belong to auditors and admins.
    pub fn ensure_auditor(&self) -> Result<(), AppError> {
        match self.role {
            Role::Admin | Role::Auditor => Ok(()),
            Role::Department => Err(AppError::forbidden(
                "department users cannot perform this action",
            )),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
            department: claims.department,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn user(role: Role, department: Option<&str>) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: uuid::Uuid::new_v4(),
            username: "clerk".into(),
            role,
            department: department.map(str::to_string),
        }
    }

    #[test]
    fn department_users_act_only_for_their_department() {
        let finance = user(Role::Department, Some("Finance"));
        assert!(finance.ensure_can_act_for("finance").is_ok());
        let err = finance.ensure_can_act_for("Stores").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(finance.ensure_auditor().is_err());
    }

    #[test]
    fn auditors_act_for_any_department() {
        let auditor = user(Role::Auditor, None);
        assert!(auditor.ensure_can_act_for("Stores").is_ok());
        assert!(auditor.ensure_auditor().is_ok());
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!("Auditor".parse::<Role>().unwrap(), Role::Auditor);
        assert!("guest".parse::<Role>().is_err());
    }
}
