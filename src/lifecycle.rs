//! Lifecycle rules for audit files and their elements.
//!
//! Everything here is pure: callers load the relevant rows, hand over plain
//! values, and persist whatever the rule returns. The HTTP layer maps
//! [`LifecycleError`] onto validation and precondition failures.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("file is frozen and cannot be edited")]
    FileFrozen,
    #[error("file is already frozen")]
    AlreadyFrozen,
    #[error("file cannot be frozen until all obligations are met")]
    FreezeBlocked(Vec<String>),
    #[error("unknown document type '{0}'")]
    UnknownDocumentType(String),
    #[error("unknown file status '{0}'")]
    UnknownStatus(String),
    #[error("status can only become Closed through freeze")]
    StatusOverrideToClosed,
    #[error("split offset {offset} is outside content of length {length}")]
    SplitOffsetOutOfRange { offset: usize, length: usize },
    #[error("split would produce an empty part")]
    EmptySplitPart,
    #[error("invalid table")]
    InvalidTable(Vec<String>),
    #[error("rejoinder rounds can only be opened on a frozen file")]
    RejoinderRequiresFrozen,
    #[error("round {round} cannot be opened before round {previous} has a rejoinder remark")]
    PreviousRoundEmpty { round: i32, previous: i32 },
    #[error("round {requested} does not follow the latest round; next round is {next}")]
    UnexpectedRound { requested: i32, next: i32 },
    #[error("no rejoinder round is open")]
    NoOpenRound,
    #[error("round {round} is not open; {open} round(s) opened")]
    RoundNotOpen { round: i32, open: i32 },
    #[error("round {round} is locked; only round {latest} is editable")]
    RoundLocked { round: i32, latest: i32 },
    #[error("round {round} requires the rejoinder final remark of round {previous}")]
    PreviousFinalRemarkMissing { round: i32, previous: i32 },
    #[error("department '{department}' is not assigned to this rejoinder round")]
    DepartmentNotAssigned { department: String },
}

impl LifecycleError {
    /// Precondition failures concern the state of the file rather than the
    /// shape of the request.
    pub fn is_precondition(&self) -> bool {
        !matches!(
            self,
            LifecycleError::UnknownDocumentType(_)
                | LifecycleError::UnknownStatus(_)
                | LifecycleError::StatusOverrideToClosed
                | LifecycleError::SplitOffsetOutOfRange { .. }
                | LifecycleError::EmptySplitPart
                | LifecycleError::InvalidTable(_)
                | LifecycleError::UnexpectedRound { .. }
        )
    }

    pub fn details(&self) -> Vec<String> {
        match self {
            LifecycleError::FreezeBlocked(reasons) | LifecycleError::InvalidTable(reasons) => {
                reasons.clone()
            }
            _ => Vec::new(),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentType {
    SpecialLetter,
    PerformanceAudit,
    DraftParagraph,
    ProvisionalPara,
    AuditPara,
    ActionTakenNotes,
}

impl DocumentType {
    pub const ALL: [DocumentType; 6] = [
        DocumentType::SpecialLetter,
        DocumentType::PerformanceAudit,
        DocumentType::DraftParagraph,
        DocumentType::ProvisionalPara,
        DocumentType::AuditPara,
        DocumentType::ActionTakenNotes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::SpecialLetter => "special-letter",
            DocumentType::PerformanceAudit => "performance-audit",
            DocumentType::DraftParagraph => "draft-paragraph",
            DocumentType::ProvisionalPara => "provisional-para",
            DocumentType::AuditPara => "audit-para",
            DocumentType::ActionTakenNotes => "action-taken-notes",
        }
    }

    /// Days departments are given to respond.
    pub fn response_days(&self) -> u64 {
        match self {
            DocumentType::SpecialLetter => 30,
            DocumentType::PerformanceAudit | DocumentType::DraftParagraph => 42,
            DocumentType::ProvisionalPara => 14,
            DocumentType::AuditPara | DocumentType::ActionTakenNotes => 21,
        }
    }

    pub fn end_date(&self, start: NaiveDate) -> NaiveDate {
        start
            .checked_add_days(Days::new(self.response_days()))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn para_id(&self, position: usize) -> String {
        format!("{}P{position}", self.as_str())
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        DocumentType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == normalized)
            .ok_or_else(|| LifecycleError::UnknownDocumentType(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    #[serde(rename = "Pending")]
    Pending,
    #[serde(rename = "Department Assigned")]
    DepartmentAssigned,
    #[serde(rename = "Department Remarks Given")]
    DepartmentRemarksGiven,
    #[serde(rename = "Final Remarks Pending")]
    FinalRemarksPending,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Closed")]
    Closed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "Pending",
            FileStatus::DepartmentAssigned => "Department Assigned",
            FileStatus::DepartmentRemarksGiven => "Department Remarks Given",
            FileStatus::FinalRemarksPending => "Final Remarks Pending",
            FileStatus::Completed => "Completed",
            FileStatus::Closed => "Closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, FileStatus::Closed)
    }

    /// Parses a stored status. Unknown values read as Pending so a bad row
    /// never hides a file from the dashboard.
    pub fn from_stored(value: &str) -> FileStatus {
        value.parse().unwrap_or(FileStatus::Pending)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(FileStatus::Pending),
            "department assigned" => Ok(FileStatus::DepartmentAssigned),
            "department remarks given" => Ok(FileStatus::DepartmentRemarksGiven),
            "final remarks pending" => Ok(FileStatus::FinalRemarksPending),
            "completed" => Ok(FileStatus::Completed),
            "closed" => Ok(FileStatus::Closed),
            _ => Err(LifecycleError::UnknownStatus(value.to_string())),
        }
    }
}

/// Refuses edits to element content, assignments and final remarks once a
/// file is frozen.
pub fn ensure_editable(status: FileStatus) -> LifecycleResult<()> {
    if status.is_closed() {
        Err(LifecycleError::FileFrozen)
    } else {
        Ok(())
    }
}

/// Validates an operator status override made alongside a schedule update.
pub fn resolve_status_override(
    current: FileStatus,
    requested: Option<&str>,
) -> LifecycleResult<FileStatus> {
    let requested = match requested.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => Some(value.parse::<FileStatus>()?),
        None => None,
    };

    match (current, requested) {
        (FileStatus::Closed, None) | (FileStatus::Closed, Some(FileStatus::Closed)) => {
            Ok(FileStatus::Closed)
        }
        (FileStatus::Closed, Some(_)) => Err(LifecycleError::FileFrozen),
        (_, Some(FileStatus::Closed)) => Err(LifecycleError::StatusOverrideToClosed),
        (_, Some(status)) => Ok(status),
        (_, None) => Ok(FileStatus::Pending),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemarkState {
    pub department: String,
    pub remark: String,
}

/// The slice of an element the status and freeze rules look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementProgress {
    pub para_id: String,
    pub remarks: String,
    pub departments: Vec<String>,
    pub department_remarks: Vec<RemarkState>,
}

impl ElementProgress {
    fn has_final_remark(&self) -> bool {
        !self.remarks.trim().is_empty()
    }

    fn has_remark_from(&self, department: &str) -> bool {
        self.department_remarks
            .iter()
            .any(|entry| {
                entry.department.eq_ignore_ascii_case(department) && !entry.remark.trim().is_empty()
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSignals {
    pub departments_assigned: bool,
    pub department_remarks_given: bool,
    /// Vacuously true for a file without elements.
    pub final_remarks_given: bool,
}

pub fn status_signals(elements: &[ElementProgress]) -> StatusSignals {
    StatusSignals {
        departments_assigned: elements.iter().any(|el| !el.departments.is_empty()),
        department_remarks_given: elements.iter().any(|el| !el.department_remarks.is_empty()),
        final_remarks_given: elements.iter().all(ElementProgress::has_final_remark),
    }
}

/// Recomputes the dashboard status. Later rules override earlier ones and a
/// Closed file is never touched.
pub fn derive_status(persisted: FileStatus, signals: &StatusSignals) -> FileStatus {
    if persisted.is_closed() {
        return FileStatus::Closed;
    }

    let mut status = persisted;
    if signals.departments_assigned {
        status = FileStatus::DepartmentAssigned;
    }
    if signals.department_remarks_given {
        status = FileStatus::DepartmentRemarksGiven;
    }
    if signals.department_remarks_given && !signals.final_remarks_given {
        status = FileStatus::FinalRemarksPending;
    }
    if signals.department_remarks_given && signals.final_remarks_given {
        status = FileStatus::Completed;
    }
    status
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreezeBlocker {
    pub para_id: String,
    pub missing_final_remark: bool,
    pub missing_department_remarks: Vec<String>,
}

impl FreezeBlocker {
    fn reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.missing_final_remark {
            reasons.push(format!("{}: missing final remark", self.para_id));
        }
        if !self.missing_department_remarks.is_empty() {
            reasons.push(format!(
                "{}: missing department remarks from {}",
                self.para_id,
                self.missing_department_remarks.join(", ")
            ));
        }
        reasons
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreezeCheck {
    pub eligible: bool,
    pub blockers: Vec<FreezeBlocker>,
    pub reasons: Vec<String>,
}

/// Lists every unmet freeze obligation. A file with no elements is not
/// freezable.
pub fn check_freeze(status: FileStatus, elements: &[ElementProgress]) -> FreezeCheck {
    if status.is_closed() {
        return FreezeCheck {
            eligible: false,
            blockers: Vec::new(),
            reasons: vec![LifecycleError::AlreadyFrozen.to_string()],
        };
    }
    if elements.is_empty() {
        return FreezeCheck {
            eligible: false,
            blockers: Vec::new(),
            reasons: vec!["file has no elements".to_string()],
        };
    }

    let blockers: Vec<FreezeBlocker> = elements
        .iter()
        .filter_map(|element| {
            let missing_department_remarks: Vec<String> = element
                .departments
                .iter()
                .filter(|department| !element.has_remark_from(department))
                .cloned()
                .collect();
            let missing_final_remark = !element.has_final_remark();
            (missing_final_remark || !missing_department_remarks.is_empty()).then(|| {
                FreezeBlocker {
                    para_id: element.para_id.clone(),
                    missing_final_remark,
                    missing_department_remarks,
                }
            })
        })
        .collect();

    let reasons = blockers.iter().flat_map(FreezeBlocker::reasons).collect();
    FreezeCheck {
        eligible: blockers.is_empty(),
        blockers,
        reasons,
    }
}

/// Converts a failed check into the error the freeze operation reports.
pub fn require_freezable(status: FileStatus, elements: &[ElementProgress]) -> LifecycleResult<()> {
    if status.is_closed() {
        return Err(LifecycleError::AlreadyFrozen);
    }
    let check = check_freeze(status, elements);
    if check.eligible {
        Ok(())
    } else {
        Err(LifecycleError::FreezeBlocked(check.reasons))
    }
}

/// Splits `content` at a character offset. Both parts are trimmed and must
/// be non-empty.
pub fn split_content(content: &str, offset: usize) -> LifecycleResult<(String, String)> {
    let length = content.chars().count();
    if offset == 0 || offset >= length {
        return Err(LifecycleError::SplitOffsetOutOfRange { offset, length });
    }

    let byte_offset = content
        .char_indices()
        .nth(offset)
        .map(|(idx, _)| idx)
        .unwrap_or(content.len());
    let (head, tail) = content.split_at(byte_offset);
    let (head, tail) = (head.trim(), tail.trim());
    if head.is_empty() || tail.is_empty() {
        return Err(LifecycleError::EmptySplitPart);
    }
    Ok((head.to_string(), tail.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Paragraph,
    Table,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Paragraph => "paragraph",
            ElementKind::Table => "table",
        }
    }

    pub fn from_stored(value: &str) -> ElementKind {
        if value.eq_ignore_ascii_case("table") {
            ElementKind::Table
        } else {
            ElementKind::Paragraph
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Numbering {
    pub order: i32,
    pub para_id: String,
    pub para_audit_id: String,
}

/// Positional numbering for a file's elements in rendering order: order `n`,
/// paraId `<type>P<n>`, paraAuditId `P<n>` (`T<n>` for tables), from 1.
pub fn sequential_numbering(document_type: DocumentType, kinds: &[ElementKind]) -> Vec<Numbering> {
    kinds
        .iter()
        .enumerate()
        .map(|(idx, kind)| {
            let position = idx + 1;
            let prefix = match kind {
                ElementKind::Paragraph => 'P',
                ElementKind::Table => 'T',
            };
            Numbering {
                order: position as i32,
                para_id: document_type.para_id(position),
                para_audit_id: format!("{prefix}{position}"),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlacement {
    pub order: i32,
    pub para_audit_id: String,
    pub content: String,
}

/// Validates a table insert and serialises its cells as `{"data": [[..]]}`.
///
/// `position` is 1-based and may be one past the last element. Siblings are
/// not renumbered.
pub fn plan_table_insert(
    position: i64,
    rows: i64,
    columns: i64,
    cells: &[Vec<String>],
    element_count: usize,
) -> LifecycleResult<TablePlacement> {
    let mut problems = Vec::new();
    let max_position = element_count as i64 + 1;
    if position < 1 || position > max_position {
        problems.push(format!("position must be between 1 and {max_position}"));
    }
    if rows <= 0 {
        problems.push("rows must be greater than zero".to_string());
    }
    if columns <= 0 {
        problems.push("columns must be greater than zero".to_string());
    }
    if rows > 0 && cells.len() as i64 != rows {
        problems.push(format!("expected {rows} rows of cells, got {}", cells.len()));
    }
    if columns > 0 {
        for (idx, row) in cells.iter().enumerate() {
            if row.len() as i64 != columns {
                problems.push(format!(
                    "row {} has {} cells, expected {columns}",
                    idx + 1,
                    row.len()
                ));
            }
        }
    }
    if !problems.is_empty() {
        return Err(LifecycleError::InvalidTable(problems));
    }

    let data: Vec<Vec<String>> = cells
        .iter()
        .map(|row| row.iter().map(|cell| cell.trim().to_string()).collect())
        .collect();
    Ok(TablePlacement {
        order: position as i32,
        para_audit_id: format!("T{position}"),
        content: json!({ "data": data }).to_string(),
    })
}

/// Legacy map key for a department reply in a given round.
pub fn reply_key(department: &str, round: i32) -> String {
    format!("{department}-{round}")
}

/// Checks that a new rejoinder round may be opened and returns its index.
///
/// `latest_remarks` are the rejoinder remarks of the current latest round,
/// one per element. `requested` is an optional explicit round index from the
/// caller, which must match the next round.
pub fn plan_open_round(
    status: FileStatus,
    rounds_open: i32,
    latest_remarks: &[&str],
    requested: Option<i32>,
) -> LifecycleResult<i32> {
    if !status.is_closed() {
        return Err(LifecycleError::RejoinderRequiresFrozen);
    }
    let next = rounds_open;
    if let Some(requested) = requested {
        if requested != next {
            return Err(LifecycleError::UnexpectedRound { requested, next });
        }
    }
    if next > 0 && latest_remarks.iter().all(|remark| remark.trim().is_empty()) {
        return Err(LifecycleError::PreviousRoundEmpty {
            round: next,
            previous: next - 1,
        });
    }
    Ok(next)
}

/// Only the latest opened round accepts writes.
pub fn ensure_latest_round(rounds_open: i32, round: i32) -> LifecycleResult<()> {
    if rounds_open <= 0 {
        return Err(LifecycleError::NoOpenRound);
    }
    if round < 0 || round >= rounds_open {
        return Err(LifecycleError::RoundNotOpen {
            round,
            open: rounds_open,
        });
    }
    let latest = rounds_open - 1;
    if round != latest {
        return Err(LifecycleError::RoundLocked { round, latest });
    }
    Ok(())
}

/// A rejoinder remark for round k>0 needs the element's rejoinder final
/// remark from round k-1.
pub fn ensure_rejoinder_remark_writable(
    rounds_open: i32,
    round: i32,
    previous_final_remark: Option<&str>,
) -> LifecycleResult<()> {
    ensure_latest_round(rounds_open, round)?;
    if round > 0
        && previous_final_remark
            .map(|remark| remark.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(LifecycleError::PreviousFinalRemarkMissing {
            round,
            previous: round - 1,
        });
    }
    Ok(())
}

pub fn ensure_reply_allowed(
    rounds_open: i32,
    round: i32,
    assigned: &[String],
    department: &str,
) -> LifecycleResult<()> {
    ensure_latest_round(rounds_open, round)?;
    if !assigned
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(department))
    {
        return Err(LifecycleError::DepartmentNotAssigned {
            department: department.to_string(),
        });
    }
    Ok(())
}

/// Trims names, drops blanks and removes case-insensitive duplicates while
/// keeping first-seen order.
pub fn normalize_departments(departments: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for department in departments {
        let trimmed = department.trim();
        if trimmed.is_empty() {
            continue;
        }
        if normalized
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(trimmed))
        {
            continue;
        }
        normalized.push(trimmed.to_string());
    }
    normalized
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentProgress {
    pub name: String,
    pub total_assignments: u32,
    pub remarks_given: u32,
    pub completion_percentage: u32,
}

/// Per-department assignment and remark counts, grouped case-insensitively
/// and sorted by name.
pub fn department_progress(elements: &[ElementProgress]) -> Vec<DepartmentProgress> {
    let mut by_name: HashMap<String, DepartmentProgress> = HashMap::new();
    for element in elements {
        for department in &element.departments {
            let key = department.to_lowercase();
            let entry = by_name
                .entry(key.clone())
                .or_insert_with(|| DepartmentProgress {
                    name: department.clone(),
                    total_assignments: 0,
                    remarks_given: 0,
                    completion_percentage: 0,
                });
            entry.total_assignments += 1;
            if element
                .department_remarks
                .iter()
                .any(|remark| remark.department.to_lowercase() == key)
            {
                entry.remarks_given += 1;
            }
        }
    }

    let mut progress: Vec<DepartmentProgress> = by_name
        .into_values()
        .map(|mut entry| {
            entry.completion_percentage = ((entry.remarks_given as f64
                / entry.total_assignments as f64)
                * 100.0)
                .round() as u32;
            entry
        })
        .collect();
    progress.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    progress
}
