use std::{collections::HashMap, time::Duration};

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::{dsl::exists, pg::upsert::excluded, prelude::*, select, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::task;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::elements::{
    assemble_elements, document_type_of, file_status, load_file, load_file_element_responses,
    lock_file, progress_of, ElementResponse,
};
use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    extract::looks_like_pdf,
    lifecycle::{
        check_freeze, department_progress, derive_status, ensure_editable, require_freezable,
        resolve_status_override, sequential_numbering, status_signals, DepartmentProgress,
        DocumentType, ElementKind, FileStatus, FreezeCheck, StatusSignals,
    },
    models::{AuditFile, DocumentElement, NewAuditFile, NewDocumentElement},
    schema::{
        department_remarks, document_elements, files, rejoinder_entries, rejoinder_replies,
    },
    segmenter,
    state::AppState,
    storage::{inline_content_disposition, report_key},
};

const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 300;

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub file_name: String,
    pub document_type: String,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub assignment_date: Option<String>,
    pub final_remarks: Option<String>,
    pub rejoinder_rounds: i32,
    pub checksum: String,
    pub uploaded_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<AuditFile> for FileResponse {
    fn from(file: AuditFile) -> Self {
        Self {
            id: file.id,
            file_name: file.file_name,
            document_type: file.document_type,
            status: file.status,
            start_date: file.start_date,
            end_date: file.end_date,
            assignment_date: file.assignment_date,
            final_remarks: file.final_remarks,
            rejoinder_rounds: file.rejoinder_rounds,
            checksum: file.checksum,
            uploaded_at: file.uploaded_at,
            updated_at: file.updated_at,
        }
    }
}

#[derive(Deserialize)]
pub struct FileListQuery {
    pub document_type: Option<String>,
    pub start_from: Option<NaiveDate>,
    pub start_to: Option<NaiveDate>,
}

pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileListQuery>,
) -> AppResult<Json<Vec<FileResponse>>> {
    let document_type = query
        .document_type
        .as_deref()
        .map(str::parse::<DocumentType>)
        .transpose()?;

    let rows = state
        .run_store("file listing", move |conn| {
            let mut statement = files::table.into_boxed();
            if let Some(document_type) = document_type {
                statement = statement.filter(files::document_type.eq(document_type.as_str()));
            }
            if let Some(from) = query.start_from {
                statement = statement.filter(files::start_date.ge(from));
            }
            if let Some(to) = query.start_to {
                statement = statement.filter(files::start_date.le(to));
            }
            Ok(statement
                .order(files::uploaded_at.desc())
                .load::<AuditFile>(conn)?)
        })
        .await?;

    Ok(Json(rows.into_iter().map(FileResponse::from).collect()))
}

pub async fn list_document_types(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    let types = state
        .run_store("document type listing", |conn| {
            Ok(files::table
                .select(files::document_type)
                .distinct()
                .order(files::document_type.asc())
                .load::<String>(conn)?)
        })
        .await?;
    Ok(Json(types))
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub file: FileResponse,
    pub elements: Vec<ElementResponse>,
    pub warnings: Vec<String>,
}

struct UploadRequest {
    bytes: Vec<u8>,
    file_name: String,
    document_type: DocumentType,
}

pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    user.ensure_auditor()?;

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut document_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|name| name.to_string());
        match name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(|name| name.trim().to_string());
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("document_type") => {
                document_type = Some(field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid document type: {err}"))
                })?);
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::bad_request("file is required"))?;
    let file_name = file_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::bad_request("file name is required"))?;
    let document_type: DocumentType = document_type
        .ok_or_else(|| AppError::bad_request("document_type is required"))?
        .parse()?;
    if !looks_like_pdf(&file_name, content_type.as_deref(), &bytes) {
        return Err(AppError::bad_request("only PDF uploads are accepted"));
    }

    let log_name = file_name.clone();
    match process_upload(
        &state,
        UploadRequest {
            bytes,
            file_name,
            document_type,
        },
    )
    .await
    {
        Ok(response) => {
            info!(
                file_id = %response.file.id,
                file_name = %response.file.file_name,
                document_type = %document_type,
                elements = response.elements.len(),
                warnings = response.warnings.len(),
                "file upload succeeded"
            );
            Ok((StatusCode::CREATED, Json(response)))
        }
        Err(err) => {
            error!(error = %err, file_name = %log_name, "file upload failed");
            Err(err)
        }
    }
}

fn lock_files(conn: &mut PgConnection, file_ids: &[Uuid]) -> AppResult<Vec<AuditFile>> {
    if file_ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(files::table
        .filter(files::id.eq_any(file_ids))
        .order(files::id.asc())
        .for_update()
        .load(conn)?)
}

async fn process_upload(state: &AppState, request: UploadRequest) -> AppResult<UploadResponse> {
    let UploadRequest {
        bytes,
        file_name,
        document_type,
    } = request;

    let name_for_check = file_name.clone();
    let duplicate = state
        .run_store("duplicate name check", move |conn| {
            Ok(select(exists(
                files::table.filter(files::file_name.eq(name_for_check)),
            ))
            .get_result::<bool>(conn)?)
        })
        .await?;
    if duplicate {
        return Err(AppError::conflict(format!(
            "a file named '{file_name}' already exists"
        )));
    }

    let mut warnings = Vec::new();
    let extractor = state.extractor.clone();
    let pdf = bytes.clone();
    let text = match task::spawn_blocking(move || extractor.extract_text(&pdf)).await {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => {
            warn!(file_name = %file_name, error = %err, "text extraction failed");
            warnings.push(format!("text extraction failed: {err}"));
            String::new()
        }
        Err(join_err) => {
            error!(file_name = %file_name, error = %join_err, "text extraction task panicked");
            warnings.push("text extraction failed".to_string());
            String::new()
        }
    };

    let paragraphs = segmenter::segment(&text);
    if paragraphs.is_empty() {
        warnings.push("no paragraphs were found in the document".to_string());
    }

    let file_id = Uuid::new_v4();
    let storage_key = report_key(file_id, &file_name);
    let checksum = hex::encode(Sha256::digest(&bytes));
    state
        .storage
        .put_object(
            &storage_key,
            bytes,
            Some("application/pdf".to_string()),
            Some(inline_content_disposition(&file_name)),
        )
        .await
        .map_err(|err| {
            error!(error = %err, key = %storage_key, "failed to store report");
            AppError::internal(format!("failed to store report: {err}"))
        })?;

    let new_file = NewAuditFile {
        id: file_id,
        file_name,
        storage_key: storage_key.clone(),
        checksum,
        document_type: document_type.as_str().to_string(),
        status: FileStatus::Pending.as_str().to_string(),
    };
    let kinds = vec![ElementKind::Paragraph; paragraphs.len()];
    let new_elements: Vec<NewDocumentElement> = paragraphs
        .into_iter()
        .zip(sequential_numbering(document_type, &kinds))
        .map(|(content, numbering)| NewDocumentElement {
            id: Uuid::new_v4(),
            file_id: Some(file_id),
            para_id: numbering.para_id,
            para_audit_id: Some(numbering.para_audit_id),
            element_type: ElementKind::Paragraph.as_str().to_string(),
            content,
            sort_order: numbering.order,
            remarks: String::new(),
            departments: Vec::new(),
            rejoinder_departments: Vec::new(),
        })
        .collect();

    let persisted = state
        .run_store("upload persistence", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                diesel::insert_into(files::table)
                    .values(&new_file)
                    .execute(conn)?;

                let para_ids: Vec<String> = new_elements
                    .iter()
                    .map(|element| element.para_id.clone())
                    .collect();
                // Files are locked before their elements, the order every
                // edit and freeze takes.
                let seen_owners: Vec<Uuid> = document_elements::table
                    .filter(document_elements::para_id.eq_any(&para_ids))
                    .filter(document_elements::file_id.is_not_null())
                    .select(document_elements::file_id.assume_not_null())
                    .distinct()
                    .load(conn)?;
                lock_files(conn, &seen_owners)?;
                let claimed: Vec<DocumentElement> = document_elements::table
                    .filter(document_elements::para_id.eq_any(&para_ids))
                    .filter(document_elements::file_id.is_not_null())
                    .for_update()
                    .load(conn)?;
                let owner_ids: Vec<Uuid> =
                    claimed.iter().filter_map(|element| element.file_id).collect();
                let frozen_owners: HashMap<Uuid, String> = lock_files(conn, &owner_ids)?
                    .into_iter()
                    .filter(|owner| file_status(owner) == FileStatus::Closed)
                    .map(|owner| (owner.id, owner.file_name))
                    .collect();
                let mut blocked: Vec<String> = claimed
                    .iter()
                    .filter_map(|element| {
                        let owner = frozen_owners.get(&element.file_id?)?;
                        Some(format!("{}: frozen in '{owner}'", element.para_id))
                    })
                    .collect();
                if !blocked.is_empty() {
                    blocked.sort();
                    return Err(AppError::precondition("paragraph ids belong to a frozen file")
                        .with_details(blocked));
                }
                let reclaimed_ids: Vec<Uuid> = claimed.iter().map(|element| element.id).collect();
                if !reclaimed_ids.is_empty() {
                    diesel::delete(
                        department_remarks::table
                            .filter(department_remarks::element_id.eq_any(&reclaimed_ids)),
                    )
                    .execute(conn)?;
                    diesel::delete(
                        rejoinder_entries::table
                            .filter(rejoinder_entries::element_id.eq_any(&reclaimed_ids)),
                    )
                    .execute(conn)?;
                    diesel::delete(
                        rejoinder_replies::table
                            .filter(rejoinder_replies::element_id.eq_any(&reclaimed_ids)),
                    )
                    .execute(conn)?;
                }

                if !new_elements.is_empty() {
                    let now = Utc::now().naive_utc();
                    diesel::insert_into(document_elements::table)
                        .values(&new_elements)
                        .on_conflict(document_elements::para_id)
                        .do_update()
                        .set((
                            document_elements::file_id.eq(excluded(document_elements::file_id)),
                            document_elements::para_audit_id
                                .eq(excluded(document_elements::para_audit_id)),
                            document_elements::element_type
                                .eq(excluded(document_elements::element_type)),
                            document_elements::content.eq(excluded(document_elements::content)),
                            document_elements::sort_order
                                .eq(excluded(document_elements::sort_order)),
                            document_elements::remarks.eq(excluded(document_elements::remarks)),
                            document_elements::departments
                                .eq(excluded(document_elements::departments)),
                            document_elements::rejoinder_departments
                                .eq(excluded(document_elements::rejoinder_departments)),
                            document_elements::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                }

                let file: AuditFile = files::table.find(file_id).first(conn)?;
                let elements = load_file_element_responses(conn, file_id)?;
                Ok((file, elements, claimed))
            })
        })
        .await;

    let (file, elements, claimed) = match persisted {
        Ok(result) => result,
        Err(err) => {
            if let Err(cleanup_err) = state.storage.delete_object(&storage_key).await {
                warn!(key = %storage_key, error = %cleanup_err, "failed to remove orphaned report");
            }
            return Err(err);
        }
    };

    for element in &claimed {
        warn!(
            file_id = %file_id,
            para_id = %element.para_id,
            previous_file_id = ?element.file_id,
            "para id reclaimed from another file"
        );
        warnings.push(format!(
            "{} was moved from another file and its remarks were reset",
            element.para_id
        ));
    }

    Ok(UploadResponse {
        file: FileResponse::from(file),
        elements,
        warnings,
    })
}

#[derive(Serialize)]
pub struct FileDetailResponse {
    pub file: FileResponse,
    pub derived_status: FileStatus,
    pub signals: StatusSignals,
    pub elements: Vec<ElementResponse>,
}

pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<FileDetailResponse>> {
    let (file, elements) = state
        .run_store("file lookup", move |conn| {
            let file = load_file(conn, file_id)?;
            let elements = load_file_element_responses(conn, file_id)?;
            Ok((file, elements))
        })
        .await?;

    let signals = status_signals(&progress_of(&elements));
    Ok(Json(FileDetailResponse {
        derived_status: derive_status(file_status(&file), &signals),
        file: FileResponse::from(file),
        signals,
        elements,
    }))
}

#[derive(Serialize)]
pub struct DashboardEntry {
    pub file: FileResponse,
    pub status: FileStatus,
    #[serde(flatten)]
    pub signals: StatusSignals,
    pub element_count: usize,
}

/// Recomputes every file's status from its elements.
pub async fn dashboard(State(state): State<AppState>) -> AppResult<Json<Vec<DashboardEntry>>> {
    let (all_files, elements) = state
        .run_store("dashboard", |conn| {
            let all_files: Vec<AuditFile> =
                files::table.order(files::uploaded_at.desc()).load(conn)?;
            let elements: Vec<DocumentElement> = document_elements::table
                .filter(document_elements::file_id.is_not_null())
                .order(document_elements::sort_order.asc())
                .load(conn)?;
            Ok((all_files, assemble_elements(conn, elements)?))
        })
        .await?;

    let mut by_file: HashMap<Uuid, Vec<ElementResponse>> = HashMap::new();
    for element in elements {
        if let Some(file_id) = element.file_id {
            by_file.entry(file_id).or_default().push(element);
        }
    }

    let entries = all_files
        .into_iter()
        .map(|file| {
            let elements = by_file.remove(&file.id).unwrap_or_default();
            let signals = status_signals(&progress_of(&elements));
            DashboardEntry {
                status: derive_status(file_status(&file), &signals),
                signals,
                element_count: elements.len(),
                file: FileResponse::from(file),
            }
        })
        .collect();
    Ok(Json(entries))
}

#[derive(Deserialize)]
pub struct DepartmentQuery {
    pub department: String,
}

#[derive(Serialize)]
pub struct DepartmentFileResponse {
    pub file: FileResponse,
    pub elements: Vec<ElementResponse>,
}

/// Files with at least one element assigned to the department, matched
/// case-insensitively, each with only the matching elements.
pub async fn files_by_department(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<DepartmentQuery>,
) -> AppResult<Json<Vec<DepartmentFileResponse>>> {
    let department = query.department.trim().to_string();
    if department.is_empty() {
        return Err(AppError::bad_request("department is required"));
    }
    user.ensure_can_act_for(&department)?;

    let (matched_files, elements) = state
        .run_store("files by department", move |conn| {
            let elements: Vec<DocumentElement> = document_elements::table
                .filter(document_elements::file_id.is_not_null())
                .order(document_elements::sort_order.asc())
                .load::<DocumentElement>(conn)?
                .into_iter()
                .filter(|element| {
                    element
                        .departments
                        .iter()
                        .any(|name| name.eq_ignore_ascii_case(&department))
                })
                .collect();
            let file_ids: Vec<Uuid> = elements.iter().filter_map(|el| el.file_id).collect();
            let matched_files: Vec<AuditFile> = files::table
                .filter(files::id.eq_any(&file_ids))
                .order(files::uploaded_at.desc())
                .load(conn)?;
            Ok((matched_files, assemble_elements(conn, elements)?))
        })
        .await?;

    let mut by_file: HashMap<Uuid, Vec<ElementResponse>> = HashMap::new();
    for element in elements {
        if let Some(file_id) = element.file_id {
            by_file.entry(file_id).or_default().push(element);
        }
    }

    Ok(Json(
        matched_files
            .into_iter()
            .map(|file| DepartmentFileResponse {
                elements: by_file.remove(&file.id).unwrap_or_default(),
                file: FileResponse::from(file),
            })
            .collect(),
    ))
}

pub async fn file_departments(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<Vec<DepartmentProgress>>> {
    let elements = state
        .run_store("file department progress", move |conn| {
            load_file(conn, file_id)?;
            Ok(load_file_element_responses(conn, file_id)?)
        })
        .await?;
    Ok(Json(department_progress(&progress_of(&elements))))
}

#[derive(Deserialize)]
pub struct ScheduleRequest {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<String>,
}

/// Sets the response window. Missing dates default to today and to the
/// document type's window; dates may still move on a frozen file.
pub async fn update_schedule(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
    Json(payload): Json<ScheduleRequest>,
) -> AppResult<Json<FileResponse>> {
    user.ensure_auditor()?;

    let file = state
        .run_store("schedule update", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let file = lock_file(conn, file_id)?;
                let status = resolve_status_override(file_status(&file), payload.status.as_deref())?;
                let document_type = document_type_of(&file)?;
                let start = payload
                    .start_date
                    .unwrap_or_else(|| Utc::now().date_naive());
                let end = payload
                    .end_date
                    .unwrap_or_else(|| document_type.end_date(start));
                if end < start {
                    return Err(AppError::bad_request("end_date must not precede start_date"));
                }

                Ok(diesel::update(files::table.find(file_id))
                    .set((
                        files::start_date.eq(Some(start)),
                        files::end_date.eq(Some(end)),
                        files::status.eq(status.as_str()),
                        files::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .get_result::<AuditFile>(conn)?)
            })
        })
        .await?;

    info!(file_id = %file_id, start_date = ?file.start_date, end_date = ?file.end_date, status = %file.status, "schedule updated");
    Ok(Json(FileResponse::from(file)))
}

#[derive(Deserialize)]
pub struct FinalRemarksRequest {
    pub final_remarks: String,
}

pub async fn update_final_remarks(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
    Json(payload): Json<FinalRemarksRequest>,
) -> AppResult<Json<FileResponse>> {
    user.ensure_auditor()?;

    let file = state
        .run_store("file final remarks", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let file = lock_file(conn, file_id)?;
                ensure_editable(file_status(&file))?;
                Ok(diesel::update(files::table.find(file_id))
                    .set((
                        files::final_remarks.eq(Some(payload.final_remarks)),
                        files::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .get_result::<AuditFile>(conn)?)
            })
        })
        .await?;
    Ok(Json(FileResponse::from(file)))
}

pub async fn freeze_check(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<FreezeCheck>> {
    let (file, elements) = state
        .run_store("freeze check", move |conn| {
            let file = load_file(conn, file_id)?;
            Ok((file, load_file_element_responses(conn, file_id)?))
        })
        .await?;
    Ok(Json(check_freeze(file_status(&file), &progress_of(&elements))))
}

/// Closes a file once every element is fully remarked. The row is locked
/// while obligations are checked.
pub async fn freeze_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<FileResponse>> {
    user.ensure_auditor()?;

    let result = state
        .run_store("freeze", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let file = lock_file(conn, file_id)?;
                let elements = load_file_element_responses(conn, file_id)?;
                require_freezable(file_status(&file), &progress_of(&elements))?;
                Ok(diesel::update(files::table.find(file_id))
                    .set((
                        files::status.eq(FileStatus::Closed.as_str()),
                        files::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .get_result::<AuditFile>(conn)?)
            })
        })
        .await;

    match result {
        Ok(file) => {
            info!(file_id = %file_id, "file frozen");
            Ok(Json(FileResponse::from(file)))
        }
        Err(err) => {
            warn!(file_id = %file_id, error = %err, details = ?err.details(), "freeze refused");
            Err(err)
        }
    }
}

pub async fn frozen_status(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let file = state
        .run_store("frozen check", move |conn| load_file(conn, file_id))
        .await?;
    let status = file_status(&file);
    Ok(Json(json!({
        "file_id": file.id,
        "frozen": status.is_closed(),
        "status": status,
    })))
}

#[derive(Serialize)]
pub struct DownloadResponse {
    pub url: String,
    pub expires_in: u64,
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<DownloadResponse>> {
    let file = state
        .run_store("download lookup", move |conn| load_file(conn, file_id))
        .await?;
    let url = state
        .storage
        .presign_get_object(
            &file.storage_key,
            Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
        )
        .await
        .map_err(|err| {
            error!(file_id = %file_id, error = %err, "failed to presign report");
            AppError::internal(format!("failed to prepare download: {err}"))
        })?;
    Ok(Json(DownloadResponse {
        url,
        expires_in: PRESIGNED_URL_EXPIRY_SECONDS,
    }))
}

#[derive(Serialize)]
pub struct PreviewResponse {
    pub file_id: Uuid,
    pub marker_found: bool,
    pub paragraphs: Vec<String>,
    pub warnings: Vec<String>,
}

/// Re-runs segmentation on the stored report without persisting anything.
pub async fn preview_segmentation(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<PreviewResponse>> {
    let file = state
        .run_store("preview lookup", move |conn| load_file(conn, file_id))
        .await?;
    let bytes = state
        .storage
        .get_object(&file.storage_key)
        .await
        .map_err(|err| AppError::internal(format!("failed to load report: {err}")))?;

    let extractor = state.extractor.clone();
    let mut warnings = Vec::new();
    let text = match task::spawn_blocking(move || extractor.extract_text(&bytes)).await {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => {
            warn!(file_id = %file_id, error = %err, "text extraction failed during preview");
            warnings.push(format!("text extraction failed: {err}"));
            String::new()
        }
        Err(join_err) => {
            error!(file_id = %file_id, error = %join_err, "text extraction task panicked");
            warnings.push("text extraction failed".to_string());
            String::new()
        }
    };

    let paragraphs = segmenter::segment(&text);
    if paragraphs.is_empty() {
        warnings.push("no paragraphs were found in the document".to_string());
    }
    Ok(Json(PreviewResponse {
        file_id,
        marker_found: segmenter::has_observations_marker(&text),
        paragraphs,
        warnings,
    }))
}

#[derive(Serialize)]
pub struct DeleteFileResponse {
    pub deleted: bool,
    pub file_id: Uuid,
    pub orphaned_artifacts: Vec<String>,
}

/// Deletes elements, then stored artifacts, then the file record. Artifact
/// failures are reported but never block the deletion.
pub async fn delete_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<DeleteFileResponse>> {
    user.ensure_auditor()?;

    let (file, signature_keys) = state
        .run_store("file element deletion", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let file = load_file(conn, file_id)?;
                let element_ids: Vec<Uuid> = document_elements::table
                    .filter(document_elements::file_id.eq(file_id))
                    .select(document_elements::id)
                    .load(conn)?;
                let signature_keys: Vec<String> = department_remarks::table
                    .filter(department_remarks::element_id.eq_any(&element_ids))
                    .select(department_remarks::signature_key)
                    .load::<Option<String>>(conn)?
                    .into_iter()
                    .flatten()
                    .collect();
                diesel::delete(
                    document_elements::table.filter(document_elements::file_id.eq(file_id)),
                )
                .execute(conn)?;
                Ok((file, signature_keys))
            })
        })
        .await?;

    let mut orphaned_artifacts = Vec::new();
    for key in signature_keys.iter().chain(std::iter::once(&file.storage_key)) {
        if let Err(err) = state.storage.delete_object(key).await {
            warn!(file_id = %file_id, key = %key, error = %err, "failed to delete artifact");
            orphaned_artifacts.push(key.clone());
        }
    }

    state
        .run_store("file deletion", move |conn| {
            diesel::delete(files::table.find(file_id)).execute(conn)?;
            Ok(())
        })
        .await?;

    info!(
        file_id = %file_id,
        artifacts = signature_keys.len() + 1,
        orphaned = orphaned_artifacts.len(),
        "file deleted"
    );
    Ok(Json(DeleteFileResponse {
        deleted: true,
        file_id,
        orphaned_artifacts,
    }))
}
