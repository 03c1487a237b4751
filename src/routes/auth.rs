use axum::{extract::State, Json};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser, Role},
    error::{AppError, AppResult},
    models::{Department, User},
    schema::{departments, users},
    state::AppState,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    /// A user's username, or a department's registry email.
    #[serde(alias = "email")]
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub role: Role,
    pub department: Option<String>,
}

/// Whoever a login name resolved to.
struct Account {
    id: Uuid,
    name: String,
    password_hash: String,
    role: Role,
    department: Option<String>,
}

impl Account {
    fn from_user(user: User) -> AppResult<Self> {
        let role: Role = user
            .role
            .parse()
            .map_err(|err| AppError::internal(format!("user {} has {err}", user.username)))?;
        Ok(Self {
            id: user.id,
            name: user.username,
            password_hash: user.password_hash,
            role,
            department: user.department,
        })
    }
}

fn find_account(conn: &mut PgConnection, login: &str) -> AppResult<Option<Account>> {
    let user: Option<User> = users::table
        .filter(users::username.eq(login))
        .first(conn)
        .optional()?;
    if let Some(user) = user {
        return Account::from_user(user).map(Some);
    }

    let department: Option<Department> = departments::table
        .filter(departments::email.eq(login.to_lowercase()))
        .first(conn)
        .optional()?;
    Ok(department.and_then(|department| {
        let password_hash = department.password_hash?;
        Some(Account {
            id: department.id,
            name: department.email,
            password_hash,
            role: Role::Department,
            department: Some(department.name),
        })
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let login = payload.username.trim().to_string();
    let lookup = login.clone();
    let account = state
        .run_store("login lookup", move |conn| find_account(conn, &lookup))
        .await?
        .ok_or_else(|| {
            warn!(login = %login, "login for unknown account");
            AppError::unauthorized()
        })?;

    let valid = password::verify_password(&payload.password, &account.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        warn!(login = %login, "login with wrong password");
        return Err(AppError::unauthorized());
    }

    let access_token = state.jwt.generate_token(
        account.id,
        &account.name,
        account.role,
        account.department.as_deref(),
    )?;

    info!(account_id = %account.id, role = %account.role, "account logged in");
    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.jwt_expiry_minutes * 60,
        role: account.role,
        department: account.department,
    }))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}
