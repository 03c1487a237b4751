use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser, Role},
    error::{AppError, AppResult},
    models::{Department, NewDepartment, User},
    schema::{departments, users},
    state::AppState,
};

#[derive(Serialize)]
pub struct DepartmentResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub can_sign_in: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Department> for DepartmentResponse {
    fn from(department: Department) -> Self {
        Self {
            id: department.id,
            name: department.name,
            email: department.email,
            can_sign_in: department.password_hash.is_some(),
            created_at: department.created_at,
            updated_at: department.updated_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateDepartmentRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

#[derive(Deserialize)]
pub struct UpdateDepartmentRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = departments)]
struct DepartmentChangeset {
    name: Option<String>,
    email: Option<String>,
    updated_at: NaiveDateTime,
}

fn clean_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("department name must not be empty"));
    }
    Ok(name.to_string())
}

pub(crate) fn clean_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::bad_request(format!("'{}' is not a valid email", raw.trim()))),
    }
}

fn check_password(raw: &str) -> AppResult<()> {
    if raw.trim().is_empty() {
        return Err(AppError::bad_request("password must not be empty"));
    }
    Ok(())
}

/// Department-role users whose department matches `name`, ignoring case.
fn department_users(conn: &mut PgConnection, name: &str) -> AppResult<Vec<Uuid>> {
    let candidates: Vec<User> = users::table
        .filter(users::role.eq(Role::Department.as_str()))
        .filter(users::department.is_not_null())
        .load(conn)?;
    Ok(candidates
        .into_iter()
        .filter(|user| {
            user.department
                .as_deref()
                .is_some_and(|department| department.trim().eq_ignore_ascii_case(name))
        })
        .map(|user| user.id)
        .collect())
}

pub async fn list_departments(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<DepartmentResponse>>> {
    let rows = state
        .run_store("department listing", |conn| {
            Ok(departments::table
                .order(departments::name.asc())
                .load::<Department>(conn)?)
        })
        .await?;
    Ok(Json(rows.into_iter().map(DepartmentResponse::from).collect()))
}

pub async fn get_department(
    State(state): State<AppState>,
    Path(department_id): Path<Uuid>,
) -> AppResult<Json<DepartmentResponse>> {
    let department = state
        .run_store("department lookup", move |conn| {
            Ok(departments::table
                .find(department_id)
                .first::<Department>(conn)?)
        })
        .await?;
    Ok(Json(department.into()))
}

/// Names and emails are unique case-insensitively; duplicates are a
/// conflict.
pub async fn create_department(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDepartmentRequest>,
) -> AppResult<(StatusCode, Json<DepartmentResponse>)> {
    user.ensure_auditor()?;
    let name = clean_name(&payload.name)?;
    let email = clean_email(&payload.email)?;
    check_password(&payload.password)?;

    let department = state
        .run_store("department create", move |conn| {
            let new_department = NewDepartment {
                id: Uuid::new_v4(),
                name,
                email,
                password_hash: Some(password::hash_password(&payload.password)?),
            };
            Ok(diesel::insert_into(departments::table)
                .values(&new_department)
                .get_result::<Department>(conn)?)
        })
        .await?;

    info!(department_id = %department.id, name = %department.name, "department created");
    Ok((StatusCode::CREATED, Json(department.into())))
}

pub async fn update_department(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(department_id): Path<Uuid>,
    Json(payload): Json<UpdateDepartmentRequest>,
) -> AppResult<Json<DepartmentResponse>> {
    user.ensure_auditor()?;
    let changes = DepartmentChangeset {
        name: payload.name.as_deref().map(clean_name).transpose()?,
        email: payload.email.as_deref().map(clean_email).transpose()?,
        updated_at: Utc::now().naive_utc(),
    };

    let (department, renamed_users) = state
        .run_store("department update", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let current: Department = departments::table
                    .find(department_id)
                    .for_update()
                    .first(conn)?;
                let updated = diesel::update(departments::table.find(department_id))
                    .set(&changes)
                    .get_result::<Department>(conn)?;

                // Department logins follow the registry name.
                let mut renamed = 0;
                if updated.name != current.name {
                    let ids = department_users(conn, &current.name)?;
                    renamed = diesel::update(users::table.filter(users::id.eq_any(&ids)))
                        .set((
                            users::department.eq(Some(updated.name.clone())),
                            users::updated_at.eq(Utc::now().naive_utc()),
                        ))
                        .execute(conn)?;
                }
                Ok((updated, renamed))
            })
        })
        .await?;

    if renamed_users > 0 {
        info!(department_id = %department_id, name = %department.name, users = renamed_users, "department users renamed");
    }
    Ok(Json(department.into()))
}

/// Replaces the department's sign-in password.
pub async fn update_department_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(department_id): Path<Uuid>,
    Json(payload): Json<PasswordRequest>,
) -> AppResult<StatusCode> {
    user.ensure_auditor()?;
    check_password(&payload.password)?;

    let updated = state
        .run_store("department password update", move |conn| {
            let password_hash = password::hash_password(&payload.password)?;
            Ok(diesel::update(departments::table.find(department_id))
                .set((
                    departments::password_hash.eq(Some(password_hash)),
                    departments::updated_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?)
        })
        .await?;
    if updated == 0 {
        return Err(AppError::not_found());
    }
    info!(department_id = %department_id, "department password updated");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_department(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(department_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.ensure_auditor()?;
    let removed_users = state
        .run_store("department delete", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let department: Department = departments::table
                    .find(department_id)
                    .for_update()
                    .first(conn)?;
                let ids = department_users(conn, &department.name)?;
                let removed = diesel::delete(users::table.filter(users::id.eq_any(&ids)))
                    .execute(conn)?;
                diesel::delete(departments::table.find(department_id)).execute(conn)?;
                Ok(removed)
            })
        })
        .await?;
    info!(department_id = %department_id, users = removed_users, "department deleted");
    Ok(StatusCode::NO_CONTENT)
}
