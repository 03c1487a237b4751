//! Rejoinder rounds: post-freeze correspondence between audit and the
//! departments, one column per round.
//!
//! Only the latest round accepts writes. A round's remark unlocks once the
//! previous round's rejoinder final remark for the same element is set, and a
//! new round can only be opened once the latest one carries at least one
//! remark.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::{pg::upsert::excluded, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::elements::{
    file_status, load_element, load_element_response, load_file, load_file_element_responses,
    load_file_elements, ElementResponse,
};
use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    lifecycle::{
        ensure_latest_round, ensure_rejoinder_remark_writable, ensure_reply_allowed,
        normalize_departments, plan_open_round, reply_key, ElementKind,
    },
    models::{
        AuditFile, DocumentElement, NewDocumentElement, NewRejoinderEntry, NewRejoinderReply,
    },
    schema::{document_elements, files, rejoinder_entries, rejoinder_replies},
    state::AppState,
};

#[derive(Serialize)]
pub struct RejoinderView {
    pub file_id: Uuid,
    pub rounds_open: i32,
    pub latest_round: Option<i32>,
    pub elements: Vec<ElementResponse>,
}

fn rejoinder_view(conn: &mut PgConnection, file: &AuditFile) -> AppResult<RejoinderView> {
    Ok(RejoinderView {
        file_id: file.id,
        rounds_open: file.rejoinder_rounds,
        latest_round: (file.rejoinder_rounds > 0).then(|| file.rejoinder_rounds - 1),
        elements: load_file_element_responses(conn, file.id)?,
    })
}

/// An element with its file. File-less placeholders have no rounds.
fn load_round_context(
    conn: &mut PgConnection,
    para_id: &str,
) -> AppResult<(DocumentElement, AuditFile)> {
    let element = load_element(conn, para_id)?;
    let file_id = element.file_id.ok_or_else(|| {
        AppError::precondition(format!("element {para_id} is not attached to a file"))
    })?;
    let file = load_file(conn, file_id)?;
    Ok((element, file))
}

fn entry_for(
    conn: &mut PgConnection,
    element_id: Uuid,
    round: i32,
) -> QueryResult<Option<(String, String)>> {
    rejoinder_entries::table
        .find((element_id, round))
        .select((rejoinder_entries::remark, rejoinder_entries::final_remark))
        .first(conn)
        .optional()
}

pub async fn get_rejoinder(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<RejoinderView>> {
    let view = state
        .run_store("rejoinder lookup", move |conn| {
            let file = load_file(conn, file_id)?;
            rejoinder_view(conn, &file)
        })
        .await?;
    Ok(Json(view))
}

#[derive(Deserialize, Default)]
pub struct OpenRoundRequest {
    pub round: Option<i32>,
}

/// Adds a round column to every element of a frozen file and clears the
/// per-round department assignments.
pub async fn open_round(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
    payload: Option<Json<OpenRoundRequest>>,
) -> AppResult<(StatusCode, Json<RejoinderView>)> {
    user.ensure_auditor()?;
    let requested = payload.and_then(|Json(body)| body.round);

    let view = state
        .run_store("rejoinder round open", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let file: AuditFile = files::table.find(file_id).for_update().first(conn)?;
                let elements = load_file_elements(conn, file_id)?;
                let element_ids: Vec<Uuid> = elements.iter().map(|element| element.id).collect();

                let latest_remarks: Vec<String> = if file.rejoinder_rounds > 0 {
                    rejoinder_entries::table
                        .filter(rejoinder_entries::element_id.eq_any(&element_ids))
                        .filter(rejoinder_entries::round.eq(file.rejoinder_rounds - 1))
                        .select(rejoinder_entries::remark)
                        .load(conn)?
                } else {
                    Vec::new()
                };
                let latest: Vec<&str> = latest_remarks.iter().map(String::as_str).collect();
                let round = plan_open_round(
                    file_status(&file),
                    file.rejoinder_rounds,
                    &latest,
                    requested,
                )?;

                let entries: Vec<NewRejoinderEntry> = element_ids
                    .iter()
                    .map(|element_id| NewRejoinderEntry {
                        element_id: *element_id,
                        round,
                        remark: String::new(),
                        final_remark: String::new(),
                    })
                    .collect();
                if !entries.is_empty() {
                    diesel::insert_into(rejoinder_entries::table)
                        .values(&entries)
                        .on_conflict_do_nothing()
                        .execute(conn)?;
                }
                diesel::update(
                    document_elements::table.filter(document_elements::file_id.eq(file_id)),
                )
                .set(document_elements::rejoinder_departments.eq(Vec::<String>::new()))
                .execute(conn)?;

                let file: AuditFile = diesel::update(files::table.find(file_id))
                    .set((
                        files::rejoinder_rounds.eq(round + 1),
                        files::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .get_result(conn)?;
                rejoinder_view(conn, &file)
            })
        })
        .await?;

    info!(file_id = %file_id, rounds_open = view.rounds_open, "rejoinder round opened");
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Deserialize)]
pub struct RejoinderRemarkRequest {
    pub remark: String,
}

pub async fn set_rejoinder_remark(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((para_id, round)): Path<(String, i32)>,
    Json(payload): Json<RejoinderRemarkRequest>,
) -> AppResult<Json<ElementResponse>> {
    user.ensure_auditor()?;
    let log_para_id = para_id.clone();

    let element = state
        .run_store("rejoinder remark", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let (element, file) = load_round_context(conn, &para_id)?;
                let previous_final = if round > 0 {
                    entry_for(conn, element.id, round - 1)?.map(|(_, final_remark)| final_remark)
                } else {
                    None
                };
                ensure_rejoinder_remark_writable(
                    file.rejoinder_rounds,
                    round,
                    previous_final.as_deref(),
                )?;

                let entry = NewRejoinderEntry {
                    element_id: element.id,
                    round,
                    remark: payload.remark.trim().to_string(),
                    final_remark: String::new(),
                };
                diesel::insert_into(rejoinder_entries::table)
                    .values(&entry)
                    .on_conflict((rejoinder_entries::element_id, rejoinder_entries::round))
                    .do_update()
                    .set((
                        rejoinder_entries::remark.eq(excluded(rejoinder_entries::remark)),
                        rejoinder_entries::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .execute(conn)?;
                load_element_response(conn, element.id)
            })
        })
        .await?;

    info!(para_id = %log_para_id, round, "rejoinder remark saved");
    Ok(Json(element))
}

#[derive(Deserialize)]
pub struct RejoinderFinalRemarkRequest {
    pub final_remark: String,
}

pub async fn set_rejoinder_final_remark(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((para_id, round)): Path<(String, i32)>,
    Json(payload): Json<RejoinderFinalRemarkRequest>,
) -> AppResult<Json<ElementResponse>> {
    user.ensure_auditor()?;
    let log_para_id = para_id.clone();

    let element = state
        .run_store("rejoinder final remark", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let (element, file) = load_round_context(conn, &para_id)?;
                ensure_latest_round(file.rejoinder_rounds, round)?;

                let entry = NewRejoinderEntry {
                    element_id: element.id,
                    round,
                    remark: String::new(),
                    final_remark: payload.final_remark.trim().to_string(),
                };
                diesel::insert_into(rejoinder_entries::table)
                    .values(&entry)
                    .on_conflict((rejoinder_entries::element_id, rejoinder_entries::round))
                    .do_update()
                    .set((
                        rejoinder_entries::final_remark
                            .eq(excluded(rejoinder_entries::final_remark)),
                        rejoinder_entries::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .execute(conn)?;
                load_element_response(conn, element.id)
            })
        })
        .await?;

    info!(para_id = %log_para_id, round, "rejoinder final remark saved");
    Ok(Json(element))
}

#[derive(Deserialize)]
pub struct RejoinderDepartmentsRequest {
    pub round: i32,
    pub departments: Vec<String>,
}

pub async fn set_rejoinder_departments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(para_id): Path<String>,
    Json(payload): Json<RejoinderDepartmentsRequest>,
) -> AppResult<Json<ElementResponse>> {
    user.ensure_auditor()?;
    let departments = normalize_departments(&payload.departments);
    let round = payload.round;
    let log_para_id = para_id.clone();

    let element = state
        .run_store("rejoinder departments", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let (element, file) = load_round_context(conn, &para_id)?;
                ensure_latest_round(file.rejoinder_rounds, round)?;
                diesel::update(document_elements::table.find(element.id))
                    .set((
                        document_elements::rejoinder_departments.eq(departments),
                        document_elements::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .execute(conn)?;
                load_element_response(conn, element.id)
            })
        })
        .await?;

    info!(para_id = %log_para_id, round, departments = ?element.rejoinder_departments, "rejoinder departments assigned");
    Ok(Json(element))
}

#[derive(Deserialize)]
pub struct ReplyRequest {
    pub department: String,
    pub reply: String,
}

/// Stores a department's reply for a round. A reply for an unknown para id
/// creates a file-less placeholder element so the reply is not lost.
pub async fn submit_reply(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((para_id, round)): Path<(String, i32)>,
    Json(payload): Json<ReplyRequest>,
) -> AppResult<(StatusCode, Json<ElementResponse>)> {
    let department = payload.department.trim().to_string();
    if department.is_empty() {
        return Err(AppError::bad_request("department is required"));
    }
    if round < 0 {
        return Err(AppError::bad_request("round must not be negative"));
    }
    user.ensure_can_act_for(&department)?;
    let para_id = para_id.trim().to_string();
    let log_para_id = para_id.clone();
    let log_department = department.clone();

    let (created, element) = state
        .run_store("rejoinder reply", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let existing: Option<DocumentElement> = document_elements::table
                    .filter(document_elements::para_id.eq(&para_id))
                    .first(conn)
                    .optional()?;

                let (element_id, department, created) = match existing {
                    Some(element) => {
                        let department = match element.file_id {
                            Some(file_id) => {
                                let file = load_file(conn, file_id)?;
                                ensure_reply_allowed(
                                    file.rejoinder_rounds,
                                    round,
                                    &element.rejoinder_departments,
                                    &department,
                                )?;
                                element
                                    .rejoinder_departments
                                    .iter()
                                    .find(|name| name.eq_ignore_ascii_case(&department))
                                    .cloned()
                                    .unwrap_or(department)
                            }
                            None => department,
                        };
                        (element.id, department, false)
                    }
                    None => {
                        let placeholder = NewDocumentElement {
                            id: Uuid::new_v4(),
                            file_id: None,
                            para_id: para_id.clone(),
                            para_audit_id: None,
                            element_type: ElementKind::Paragraph.as_str().to_string(),
                            content: String::new(),
                            sort_order: 0,
                            remarks: String::new(),
                            departments: Vec::new(),
                            rejoinder_departments: Vec::new(),
                        };
                        diesel::insert_into(document_elements::table)
                            .values(&placeholder)
                            .execute(conn)?;
                        (placeholder.id, department, true)
                    }
                };

                let reply = NewRejoinderReply {
                    element_id,
                    department,
                    round,
                    reply: payload.reply.trim().to_string(),
                    replied_at: Utc::now().naive_utc(),
                };
                diesel::insert_into(rejoinder_replies::table)
                    .values(&reply)
                    .on_conflict((
                        rejoinder_replies::element_id,
                        rejoinder_replies::department,
                        rejoinder_replies::round,
                    ))
                    .do_update()
                    .set((
                        rejoinder_replies::reply.eq(excluded(rejoinder_replies::reply)),
                        rejoinder_replies::replied_at.eq(excluded(rejoinder_replies::replied_at)),
                    ))
                    .execute(conn)?;

                Ok((created, load_element_response(conn, element_id)?))
            })
        })
        .await?;

    if created {
        warn!(
            para_id = %log_para_id,
            department = %log_department,
            round,
            "reply received for unknown element; placeholder created"
        );
    }
    info!(
        para_id = %log_para_id,
        key = %reply_key(&log_department, round),
        "rejoinder reply saved"
    );
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(element)))
}
