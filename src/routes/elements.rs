use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{pg::upsert::excluded, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    lifecycle::{
        ensure_editable, normalize_departments, plan_table_insert, reply_key,
        sequential_numbering, split_content, DocumentType, ElementKind, ElementProgress,
        FileStatus, RemarkState,
    },
    models::{
        AuditFile, DepartmentRemark, DocumentElement, NewDepartmentRemark, NewDocumentElement,
        RejoinderEntry, RejoinderReply,
    },
    schema::{department_remarks, document_elements, files, rejoinder_entries, rejoinder_replies},
    state::AppState,
    storage::signature_key,
};

#[derive(Debug, Serialize)]
pub struct DepartmentRemarkResponse {
    pub department: String,
    pub remark: String,
    pub signature_key: Option<String>,
    pub remarked_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct RejoinderReplyResponse {
    pub key: String,
    pub department: String,
    pub round: i32,
    pub reply: String,
    pub replied_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct ElementResponse {
    pub id: Uuid,
    pub file_id: Option<Uuid>,
    pub para_id: String,
    pub para_audit_id: Option<String>,
    pub element_type: ElementKind,
    pub content: String,
    pub order: i32,
    pub remarks: String,
    pub departments: Vec<String>,
    pub department_remarks: Vec<DepartmentRemarkResponse>,
    /// Indexed by rejoinder round.
    pub rejoinder_remarks: Vec<String>,
    pub rejoinder_final_remarks: Vec<String>,
    pub rejoinder_departments: Vec<String>,
    pub rejoinder_replies: Vec<RejoinderReplyResponse>,
}

impl ElementResponse {
    pub(crate) fn progress(&self) -> ElementProgress {
        ElementProgress {
            para_id: self.para_id.clone(),
            remarks: self.remarks.clone(),
            departments: self.departments.clone(),
            department_remarks: self
                .department_remarks
                .iter()
                .map(|entry| RemarkState {
                    department: entry.department.clone(),
                    remark: entry.remark.clone(),
                })
                .collect(),
        }
    }
}

pub(crate) fn progress_of(elements: &[ElementResponse]) -> Vec<ElementProgress> {
    elements.iter().map(ElementResponse::progress).collect()
}

pub(crate) fn load_file(conn: &mut PgConnection, file_id: Uuid) -> AppResult<AuditFile> {
    Ok(files::table.find(file_id).first(conn)?)
}

/// Loads the file row under `FOR UPDATE`; edits hold it until commit so a
/// freeze cannot land between their status check and their writes.
pub(crate) fn lock_file(conn: &mut PgConnection, file_id: Uuid) -> AppResult<AuditFile> {
    Ok(files::table.find(file_id).for_update().first(conn)?)
}

pub(crate) fn file_status(file: &AuditFile) -> FileStatus {
    FileStatus::from_stored(&file.status)
}

pub(crate) fn document_type_of(file: &AuditFile) -> AppResult<DocumentType> {
    Ok(file.document_type.parse()?)
}

/// Elements of a file in rendering order. A table inserted at a position
/// renders before the paragraph already holding that order value.
pub(crate) fn load_file_elements(
    conn: &mut PgConnection,
    file_id: Uuid,
) -> QueryResult<Vec<DocumentElement>> {
    document_elements::table
        .filter(document_elements::file_id.eq(file_id))
        .order((
            document_elements::sort_order.asc(),
            document_elements::element_type.desc(),
            document_elements::created_at.asc(),
        ))
        .load(conn)
}

pub(crate) fn load_element(conn: &mut PgConnection, para_id: &str) -> AppResult<DocumentElement> {
    Ok(document_elements::table
        .filter(document_elements::para_id.eq(para_id))
        .first(conn)?)
}

/// Attaches department remarks and rejoinder rows to each element.
pub(crate) fn assemble_elements(
    conn: &mut PgConnection,
    elements: Vec<DocumentElement>,
) -> QueryResult<Vec<ElementResponse>> {
    if elements.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = elements.iter().map(|element| element.id).collect();

    let remarks: Vec<DepartmentRemark> = department_remarks::table
        .filter(department_remarks::element_id.eq_any(&ids))
        .order(department_remarks::remarked_at.asc())
        .load(conn)?;
    let entries: Vec<RejoinderEntry> = rejoinder_entries::table
        .filter(rejoinder_entries::element_id.eq_any(&ids))
        .order(rejoinder_entries::round.asc())
        .load(conn)?;
    let replies: Vec<RejoinderReply> = rejoinder_replies::table
        .filter(rejoinder_replies::element_id.eq_any(&ids))
        .order((
            rejoinder_replies::round.asc(),
            rejoinder_replies::department.asc(),
        ))
        .load(conn)?;

    let mut remarks_by_element: HashMap<Uuid, Vec<DepartmentRemark>> = HashMap::new();
    for remark in remarks {
        remarks_by_element
            .entry(remark.element_id)
            .or_default()
            .push(remark);
    }
    let mut entries_by_element: HashMap<Uuid, Vec<RejoinderEntry>> = HashMap::new();
    for entry in entries {
        entries_by_element
            .entry(entry.element_id)
            .or_default()
            .push(entry);
    }
    let mut replies_by_element: HashMap<Uuid, Vec<RejoinderReply>> = HashMap::new();
    for reply in replies {
        replies_by_element
            .entry(reply.element_id)
            .or_default()
            .push(reply);
    }

    Ok(elements
        .into_iter()
        .map(|element| {
            let entries = entries_by_element.remove(&element.id).unwrap_or_default();
            let width = entries
                .iter()
                .map(|entry| entry.round + 1)
                .max()
                .unwrap_or(0)
                .max(0) as usize;
            let mut rejoinder_remarks = vec![String::new(); width];
            let mut rejoinder_final_remarks = vec![String::new(); width];
            for entry in entries {
                let slot = entry.round as usize;
                rejoinder_remarks[slot] = entry.remark;
                rejoinder_final_remarks[slot] = entry.final_remark;
            }

            ElementResponse {
                id: element.id,
                file_id: element.file_id,
                element_type: ElementKind::from_stored(&element.element_type),
                para_id: element.para_id,
                para_audit_id: element.para_audit_id,
                content: element.content,
                order: element.sort_order,
                remarks: element.remarks,
                departments: element.departments,
                department_remarks: remarks_by_element
                    .remove(&element.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|remark| DepartmentRemarkResponse {
                        department: remark.department,
                        remark: remark.remark,
                        signature_key: remark.signature_key,
                        remarked_at: remark.remarked_at,
                    })
                    .collect(),
                rejoinder_remarks,
                rejoinder_final_remarks,
                rejoinder_departments: element.rejoinder_departments,
                rejoinder_replies: replies_by_element
                    .remove(&element.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|reply| RejoinderReplyResponse {
                        key: reply_key(&reply.department, reply.round),
                        department: reply.department,
                        round: reply.round,
                        reply: reply.reply,
                        replied_at: reply.replied_at,
                    })
                    .collect(),
            }
        })
        .collect())
}

pub(crate) fn load_file_element_responses(
    conn: &mut PgConnection,
    file_id: Uuid,
) -> QueryResult<Vec<ElementResponse>> {
    let elements = load_file_elements(conn, file_id)?;
    assemble_elements(conn, elements)
}

pub(crate) fn load_element_response(
    conn: &mut PgConnection,
    element_id: Uuid,
) -> AppResult<ElementResponse> {
    let element: DocumentElement = document_elements::table.find(element_id).first(conn)?;
    assemble_elements(conn, vec![element])?
        .pop()
        .ok_or_else(AppError::not_found)
}

/// Renumbers a file by position. Para ids are parked on unique placeholders
/// first so the new numbering never collides with the old one mid-update.
fn renumber_file(
    conn: &mut PgConnection,
    document_type: DocumentType,
    ordered: &[(Uuid, ElementKind)],
) -> QueryResult<()> {
    for (id, _) in ordered {
        diesel::update(document_elements::table.find(*id))
            .set(document_elements::para_id.eq(format!("renumber-{id}")))
            .execute(conn)?;
    }

    let kinds: Vec<ElementKind> = ordered.iter().map(|(_, kind)| *kind).collect();
    let now = Utc::now().naive_utc();
    for ((id, _), numbering) in ordered
        .iter()
        .zip(sequential_numbering(document_type, &kinds))
    {
        diesel::update(document_elements::table.find(*id))
            .set((
                document_elements::para_id.eq(numbering.para_id),
                document_elements::para_audit_id.eq(Some(numbering.para_audit_id)),
                document_elements::sort_order.eq(numbering.order),
                document_elements::updated_at.eq(now),
            ))
            .execute(conn)?;
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct ElementUpsert {
    pub para_id: String,
    pub para_audit_id: Option<String>,
    pub element_type: Option<ElementKind>,
    pub content: Option<String>,
    pub remarks: Option<String>,
    pub departments: Option<Vec<String>>,
    pub order: Option<i32>,
}

#[derive(Deserialize)]
pub struct BulkUpsertRequest {
    pub elements: Vec<ElementUpsert>,
    pub assignment_date: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = document_elements)]
struct ElementChangeset {
    file_id: Option<Uuid>,
    para_audit_id: Option<String>,
    element_type: Option<String>,
    content: Option<String>,
    remarks: Option<String>,
    departments: Option<Vec<String>>,
    sort_order: Option<i32>,
    updated_at: NaiveDateTime,
}

/// Saves a batch of element edits by para id in one transaction. Unknown
/// para ids become new elements of the file; file-less placeholders are
/// adopted.
pub async fn bulk_upsert_elements(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
    Json(payload): Json<BulkUpsertRequest>,
) -> AppResult<Json<Vec<ElementResponse>>> {
    user.ensure_auditor()?;

    let mut seen = HashSet::new();
    for upsert in &payload.elements {
        let para_id = upsert.para_id.trim();
        if para_id.is_empty() {
            return Err(AppError::bad_request("para_id must not be empty"));
        }
        if !seen.insert(para_id.to_string()) {
            return Err(AppError::bad_request(format!(
                "para_id {para_id} appears more than once"
            )));
        }
    }

    let count = payload.elements.len();
    let elements = state
        .run_store("bulk element save", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let file = lock_file(conn, file_id)?;
                ensure_editable(file_status(&file))?;

                let para_ids: Vec<String> = payload
                    .elements
                    .iter()
                    .map(|upsert| upsert.para_id.trim().to_string())
                    .collect();
                let existing: HashMap<String, DocumentElement> = document_elements::table
                    .filter(document_elements::para_id.eq_any(&para_ids))
                    .load::<DocumentElement>(conn)?
                    .into_iter()
                    .map(|element| (element.para_id.clone(), element))
                    .collect();

                let mut next_order = document_elements::table
                    .filter(document_elements::file_id.eq(file_id))
                    .select(diesel::dsl::max(document_elements::sort_order))
                    .first::<Option<i32>>(conn)?
                    .unwrap_or(0)
                    + 1;
                let now = Utc::now().naive_utc();

                for upsert in payload.elements {
                    let para_id = upsert.para_id.trim().to_string();
                    let departments = upsert
                        .departments
                        .as_deref()
                        .map(normalize_departments);
                    match existing.get(&para_id) {
                        Some(element) if element.file_id.is_some_and(|id| id != file_id) => {
                            return Err(AppError::conflict(format!(
                                "element {para_id} belongs to another file"
                            )));
                        }
                        Some(element) => {
                            let changes = ElementChangeset {
                                file_id: element.file_id.is_none().then_some(file_id),
                                para_audit_id: upsert.para_audit_id,
                                element_type: upsert
                                    .element_type
                                    .map(|kind| kind.as_str().to_string()),
                                content: upsert.content,
                                remarks: upsert.remarks,
                                departments,
                                sort_order: upsert.order,
                                updated_at: now,
                            };
                            diesel::update(document_elements::table.find(element.id))
                                .set(&changes)
                                .execute(conn)?;
                        }
                        None => {
                            let sort_order = upsert.order.unwrap_or_else(|| {
                                let order = next_order;
                                next_order += 1;
                                order
                            });
                            let new_element = NewDocumentElement {
                                id: Uuid::new_v4(),
                                file_id: Some(file_id),
                                para_id,
                                para_audit_id: upsert.para_audit_id,
                                element_type: upsert
                                    .element_type
                                    .unwrap_or(ElementKind::Paragraph)
                                    .as_str()
                                    .to_string(),
                                content: upsert.content.unwrap_or_default(),
                                sort_order,
                                remarks: upsert.remarks.unwrap_or_default(),
                                departments: departments.unwrap_or_default(),
                                rejoinder_departments: Vec::new(),
                            };
                            diesel::insert_into(document_elements::table)
                                .values(&new_element)
                                .execute(conn)?;
                        }
                    }
                }

                let assignment_date = payload
                    .assignment_date
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty());
                if let Some(assignment_date) = assignment_date {
                    diesel::update(files::table.find(file_id))
                        .set((
                            files::assignment_date.eq(Some(assignment_date)),
                            files::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                }

                Ok(load_file_element_responses(conn, file_id)?)
            })
        })
        .await?;

    info!(file_id = %file_id, saved = count, "element batch saved");
    Ok(Json(elements))
}

#[derive(Deserialize)]
pub struct ResyncRequest {
    pub para_ids: Vec<String>,
}

#[derive(Serialize)]
pub struct ResyncResponse {
    pub removed: Vec<String>,
    pub elements: Vec<ElementResponse>,
}

/// Deletes every element of the file whose para id is not in the
/// authoritative set.
pub async fn resync_elements(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
    Json(payload): Json<ResyncRequest>,
) -> AppResult<Json<ResyncResponse>> {
    user.ensure_auditor()?;
    let keep: Vec<String> = payload
        .para_ids
        .iter()
        .map(|para_id| para_id.trim().to_string())
        .filter(|para_id| !para_id.is_empty())
        .collect();

    let response = state
        .run_store("element resync", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let file = lock_file(conn, file_id)?;
                ensure_editable(file_status(&file))?;

                let stale: Vec<(Uuid, String)> = document_elements::table
                    .filter(document_elements::file_id.eq(file_id))
                    .filter(document_elements::para_id.ne_all(&keep))
                    .select((document_elements::id, document_elements::para_id))
                    .load(conn)?;
                let stale_ids: Vec<Uuid> = stale.iter().map(|(id, _)| *id).collect();
                diesel::delete(
                    document_elements::table.filter(document_elements::id.eq_any(&stale_ids)),
                )
                .execute(conn)?;

                let mut removed: Vec<String> =
                    stale.into_iter().map(|(_, para_id)| para_id).collect();
                removed.sort();
                Ok(ResyncResponse {
                    removed,
                    elements: load_file_element_responses(conn, file_id)?,
                })
            })
        })
        .await?;

    if !response.removed.is_empty() {
        info!(file_id = %file_id, removed = ?response.removed, "stale elements pruned");
    }
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct SplitRequest {
    pub offset: usize,
}

/// Splits a paragraph at a character offset and renumbers the whole file.
/// The head keeps the original element and its remarks; the tail is new.
pub async fn split_element(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((file_id, para_id)): Path<(Uuid, String)>,
    Json(payload): Json<SplitRequest>,
) -> AppResult<Json<Vec<ElementResponse>>> {
    user.ensure_auditor()?;
    let log_para_id = para_id.clone();

    let elements = state
        .run_store("paragraph split", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let file = lock_file(conn, file_id)?;
                ensure_editable(file_status(&file))?;
                let document_type = document_type_of(&file)?;

                let elements = load_file_elements(conn, file_id)?;
                let index = elements
                    .iter()
                    .position(|element| element.para_id == para_id)
                    .ok_or_else(AppError::not_found)?;
                let target = &elements[index];
                let kind = ElementKind::from_stored(&target.element_type);
                if kind == ElementKind::Table {
                    return Err(AppError::bad_request("tables cannot be split"));
                }
                let (head, tail) = split_content(&target.content, payload.offset)?;

                let now = Utc::now().naive_utc();
                diesel::update(document_elements::table.find(target.id))
                    .set((
                        document_elements::content.eq(head),
                        document_elements::updated_at.eq(now),
                    ))
                    .execute(conn)?;

                let tail_id = Uuid::new_v4();
                let tail_element = NewDocumentElement {
                    id: tail_id,
                    file_id: Some(file_id),
                    para_id: format!("renumber-{tail_id}"),
                    para_audit_id: None,
                    element_type: target.element_type.clone(),
                    content: tail,
                    sort_order: target.sort_order,
                    remarks: String::new(),
                    departments: Vec::new(),
                    rejoinder_departments: Vec::new(),
                };
                diesel::insert_into(document_elements::table)
                    .values(&tail_element)
                    .execute(conn)?;

                let mut ordered: Vec<(Uuid, ElementKind)> = elements
                    .iter()
                    .map(|element| (element.id, ElementKind::from_stored(&element.element_type)))
                    .collect();
                ordered.insert(index + 1, (tail_id, kind));
                renumber_file(conn, document_type, &ordered)?;

                Ok(load_file_element_responses(conn, file_id)?)
            })
        })
        .await?;

    info!(file_id = %file_id, para_id = %log_para_id, total = elements.len(), "paragraph split");
    Ok(Json(elements))
}

#[derive(Deserialize)]
pub struct TableInsertRequest {
    pub position: i64,
    pub rows: i64,
    pub columns: i64,
    #[serde(default)]
    pub cells: Vec<Vec<String>>,
}

/// Inserts a table at a 1-based position. Sibling order values are left
/// untouched.
pub async fn insert_table(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
    Json(payload): Json<TableInsertRequest>,
) -> AppResult<(StatusCode, Json<ElementResponse>)> {
    user.ensure_auditor()?;

    let element = state
        .run_store("table insert", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                let file = lock_file(conn, file_id)?;
                ensure_editable(file_status(&file))?;
                let count: i64 = document_elements::table
                    .filter(document_elements::file_id.eq(file_id))
                    .count()
                    .get_result(conn)?;
                let placement = plan_table_insert(
                    payload.position,
                    payload.rows,
                    payload.columns,
                    &payload.cells,
                    count as usize,
                )?;

                let id = Uuid::new_v4();
                let table = NewDocumentElement {
                    id,
                    file_id: Some(file_id),
                    para_id: format!("T_{}", id.simple()),
                    para_audit_id: Some(placement.para_audit_id),
                    element_type: ElementKind::Table.as_str().to_string(),
                    content: placement.content,
                    sort_order: placement.order,
                    remarks: String::new(),
                    departments: Vec::new(),
                    rejoinder_departments: Vec::new(),
                };
                diesel::insert_into(document_elements::table)
                    .values(&table)
                    .execute(conn)?;
                load_element_response(conn, id)
            })
        })
        .await?;

    info!(file_id = %file_id, para_id = %element.para_id, order = element.order, "table inserted");
    Ok((StatusCode::CREATED, Json(element)))
}

struct RemarkSubmission {
    department: String,
    remark: String,
    signature: Option<(Vec<u8>, Option<String>, Option<String>)>,
}

async fn read_remark_submission(mut multipart: Multipart) -> AppResult<RemarkSubmission> {
    let mut department = None;
    let mut remark = None;
    let mut signature = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|name| name.to_string());
        match name.as_deref() {
            Some("department") => {
                department = Some(field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid department field: {err}"))
                })?);
            }
            Some("remark") => {
                remark = Some(field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid remark field: {err}"))
                })?);
            }
            Some("signature") => {
                let extension = field
                    .file_name()
                    .and_then(|name| name.rsplit_once('.'))
                    .map(|(_, ext)| ext.to_lowercase());
                let content_type = field.content_type().map(|mime| mime.to_string());
                let bytes = field.bytes().await.map_err(|err| {
                    AppError::bad_request(format!("failed to read signature: {err}"))
                })?;
                if !bytes.is_empty() {
                    signature = Some((bytes.to_vec(), extension, content_type));
                }
            }
            _ => {}
        }
    }

    let department = department
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request("department is required"))?;
    let remark = remark
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request("remark is required"))?;

    Ok(RemarkSubmission {
        department,
        remark,
        signature,
    })
}

/// Records a department's remark on an element. Last write wins per
/// department; a submission without a signature keeps the previous one.
pub async fn submit_department_remark(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(para_id): Path<String>,
    multipart: Multipart,
) -> AppResult<Json<ElementResponse>> {
    let submission = read_remark_submission(multipart).await?;
    user.ensure_can_act_for(&submission.department)?;

    let lookup_para_id = para_id.clone();
    let (element, existing_remarks) = state
        .run_store("department remark lookup", move |conn| {
            let element = load_element(conn, &lookup_para_id)?;
            let remarks: Vec<DepartmentRemark> = department_remarks::table
                .filter(department_remarks::element_id.eq(element.id))
                .load(conn)?;
            Ok((element, remarks))
        })
        .await?;

    let previous = existing_remarks
        .into_iter()
        .find(|remark| remark.department.eq_ignore_ascii_case(&submission.department));
    // Keep the spelling already on record for this department.
    let department = previous
        .as_ref()
        .map(|remark| remark.department.clone())
        .or_else(|| {
            element
                .departments
                .iter()
                .find(|name| name.eq_ignore_ascii_case(&submission.department))
                .cloned()
        })
        .unwrap_or_else(|| submission.department.clone());

    let new_signature_key = match submission.signature {
        Some((bytes, extension, content_type)) => {
            let key = signature_key(&element.para_id, &department, extension.as_deref());
            state
                .storage
                .put_object(&key, bytes, content_type, None)
                .await
                .map_err(|err| {
                    error!(error = %err, key = %key, "failed to store signature");
                    AppError::internal(format!("failed to store signature: {err}"))
                })?;
            Some(key)
        }
        None => None,
    };

    let element_id = element.id;
    let looked_up_file = element.file_id;
    let remark = NewDepartmentRemark {
        element_id,
        department: department.clone(),
        remark: submission.remark,
        signature_key: new_signature_key.clone(),
        remarked_at: Utc::now().naive_utc(),
    };
    let result = state
        .run_store("department remark save", move |conn| {
            conn.transaction::<_, AppError, _>(|conn| {
                // Checked under lock so a concurrent freeze cannot interleave.
                if let Some(file_id) = looked_up_file {
                    ensure_editable(file_status(&lock_file(conn, file_id)?))?;
                }
                let current: DocumentElement = document_elements::table
                    .find(element_id)
                    .for_update()
                    .first(conn)?;
                if current.file_id != looked_up_file {
                    return Err(AppError::conflict(format!(
                        "{} moved to another file; retry the remark",
                        current.para_id
                    )));
                }

                let query = diesel::insert_into(department_remarks::table)
                    .values(&remark)
                    .on_conflict((department_remarks::element_id, department_remarks::department));
                if remark.signature_key.is_some() {
                    query
                        .do_update()
                        .set((
                            department_remarks::remark.eq(excluded(department_remarks::remark)),
                            department_remarks::signature_key
                                .eq(excluded(department_remarks::signature_key)),
                            department_remarks::remarked_at
                                .eq(excluded(department_remarks::remarked_at)),
                        ))
                        .execute(conn)?;
                } else {
                    query
                        .do_update()
                        .set((
                            department_remarks::remark.eq(excluded(department_remarks::remark)),
                            department_remarks::remarked_at
                                .eq(excluded(department_remarks::remarked_at)),
                        ))
                        .execute(conn)?;
                }
                load_element_response(conn, element_id)
            })
        })
        .await;

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            if let Some(key) = &new_signature_key {
                if let Err(cleanup_err) = state.storage.delete_object(key).await {
                    warn!(key = %key, error = %cleanup_err, "failed to remove unsaved signature");
                }
            }
            return Err(err);
        }
    };

    if let (Some(_), Some(old_key)) = (
        &new_signature_key,
        previous.and_then(|remark| remark.signature_key),
    ) {
        if let Err(err) = state.storage.delete_object(&old_key).await {
            warn!(key = %old_key, error = %err, "failed to remove replaced signature");
        }
    }

    info!(para_id = %para_id, department = %department, signed = new_signature_key.is_some(), "department remark saved");
    Ok(Json(response))
}
