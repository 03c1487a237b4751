use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub department: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub department: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = departments)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub password_hash: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = departments)]
pub struct NewDepartment {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = files)]
pub struct AuditFile {
    pub id: Uuid,
    pub file_name: String,
    pub storage_key: String,
    pub checksum: String,
    pub document_type: String,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub assignment_date: Option<String>,
    pub final_remarks: Option<String>,
    pub rejoinder_rounds: i32,
    pub uploaded_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = files)]
pub struct NewAuditFile {
    pub id: Uuid,
    pub file_name: String,
    pub storage_key: String,
    pub checksum: String,
    pub document_type: String,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_elements)]
#[diesel(belongs_to(AuditFile, foreign_key = file_id))]
pub struct DocumentElement {
    pub id: Uuid,
    pub file_id: Option<Uuid>,
    pub para_id: String,
    pub para_audit_id: Option<String>,
    pub element_type: String,
    pub content: String,
    pub sort_order: i32,
    pub remarks: String,
    pub departments: Vec<String>,
    pub rejoinder_departments: Vec<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = document_elements)]
pub struct NewDocumentElement {
    pub id: Uuid,
    pub file_id: Option<Uuid>,
    pub para_id: String,
    pub para_audit_id: Option<String>,
    pub element_type: String,
    pub content: String,
    pub sort_order: i32,
    pub remarks: String,
    pub departments: Vec<String>,
    pub rejoinder_departments: Vec<String>,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = department_remarks)]
#[diesel(belongs_to(DocumentElement, foreign_key = element_id))]
#[diesel(primary_key(element_id, department))]
pub struct DepartmentRemark {
    pub element_id: Uuid,
    pub department: String,
    pub remark: String,
    pub signature_key: Option<String>,
    pub remarked_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = department_remarks)]
pub struct NewDepartmentRemark {
    pub element_id: Uuid,
    pub department: String,
    pub remark: String,
    pub signature_key: Option<String>,
    pub remarked_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = rejoinder_entries)]
#[diesel(belongs_to(DocumentElement, foreign_key = element_id))]
#[diesel(primary_key(element_id, round))]
pub struct RejoinderEntry {
    pub element_id: Uuid,
    pub round: i32,
    pub remark: String,
    pub final_remark: String,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = rejoinder_entries)]
pub struct NewRejoinderEntry {
    pub element_id: Uuid,
    pub round: i32,
    pub remark: String,
    pub final_remark: String,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = rejoinder_replies)]
#[diesel(belongs_to(DocumentElement, foreign_key = element_id))]
#[diesel(primary_key(element_id, department, round))]
pub struct RejoinderReply {
    pub element_id: Uuid,
    pub department: String,
    pub round: i32,
    pub reply: String,
    pub replied_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = rejoinder_replies)]
pub struct NewRejoinderReply {
    pub element_id: Uuid,
    pub department: String,
    pub round: i32,
    pub reply: String,
    pub replied_at: NaiveDateTime,
}
