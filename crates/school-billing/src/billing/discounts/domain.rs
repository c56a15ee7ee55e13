use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_type!(
    /// Tenant boundary for every policy and assignment.
    SchoolId
);
id_type!(SchoolYearId);
id_type!(ClassroomId);
id_type!(PolicyId);
id_type!(StudentId);
id_type!(ContactId);
id_type!(
    /// Login identity; links guardians to staff records.
    UserId
);

/// Caller tenant, threaded explicitly into every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub school_id: SchoolId,
    pub school_year_id: SchoolYearId,
}

impl TenantContext {
    pub fn new(school_id: impl Into<String>, school_year_id: impl Into<String>) -> Self {
        Self {
            school_id: SchoolId(school_id.into()),
            school_year_id: SchoolYearId(school_year_id.into()),
        }
    }
}

/// Eligibility predicate families understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriterionType {
    Always,
    SiblingCount,
    StaffChild,
    Religion,
}

impl CriterionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriterionType::Always => "ALWAYS",
            CriterionType::SiblingCount => "SIBLING_COUNT",
            CriterionType::StaffChild => "STAFF_CHILD",
            CriterionType::Religion => "RELIGION",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "ALWAYS" => Some(Self::Always),
            "SIBLING_COUNT" => Some(Self::SiblingCount),
            "STAFF_CHILD" => Some(Self::StaffChild),
            "RELIGION" => Some(Self::Religion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    #[default]
    Percent,
    Fixed,
}

/// Stored decision. `Allow` sorts before `Deny`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Allow,
    Deny,
}

/// Who wrote an assignment. `Manual` sorts before `Auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentSource {
    Manual,
    Auto,
}

/// Discount rule owned by a school.
///
/// `criterion_type` and `criterion_config` hold the persisted shape; the engine decodes
/// them into a typed criterion before evaluating anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountPolicy {
    pub id: PolicyId,
    pub school_id: SchoolId,
    pub name: String,
    pub description: Option<String>,
    pub criterion_type: String,
    pub criterion_config: Option<Value>,
    pub value_type: ValueType,
    pub value: f64,
    pub max_amount: Option<f64>,
    pub stackable: bool,
    pub priority: i32,
    pub is_active: bool,
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
    pub school_year_id: Option<SchoolYearId>,
    pub classroom_id: Option<ClassroomId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiscountPolicy {
    /// Active flag plus validity window; open bounds are unbounded.
    pub fn is_live_at(&self, as_of: DateTime<Utc>) -> bool {
        self.is_active
            && self.active_from.map_or(true, |from| from <= as_of)
            && self.active_to.map_or(true, |to| as_of <= to)
    }

    pub fn covers_school_year(&self, school_year_id: &SchoolYearId) -> bool {
        self.school_year_id
            .as_ref()
            .map_or(true, |scoped| scoped == school_year_id)
    }

    pub(crate) fn from_fields(
        id: PolicyId,
        school_id: SchoolId,
        fields: PolicyFields,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            school_id,
            name: fields.name.trim().to_string(),
            description: fields.description,
            criterion_type: fields.criterion_type.trim().to_string(),
            criterion_config: fields.criterion_config,
            value_type: fields.value_type,
            value: fields.value,
            max_amount: fields.max_amount,
            stackable: fields.stackable,
            priority: fields.priority,
            is_active: fields.is_active,
            active_from: fields.active_from,
            active_to: fields.active_to,
            school_year_id: fields.school_year_id,
            classroom_id: fields.classroom_id,
            created_at: now,
            updated_at: now,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    100
}

/// Administrator-supplied policy attributes for create and full-replace update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyFields {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub criterion_type: String,
    #[serde(default)]
    pub criterion_config: Option<Value>,
    #[serde(default)]
    pub value_type: ValueType,
    pub value: f64,
    #[serde(default)]
    pub max_amount: Option<f64>,
    #[serde(default = "default_true")]
    pub stackable: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub active_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub school_year_id: Option<SchoolYearId>,
    #[serde(default)]
    pub classroom_id: Option<ClassroomId>,
}

impl PolicyFields {
    /// Fields with the same defaults the HTTP payload applies.
    pub fn new(name: impl Into<String>, criterion: CriterionType, value: f64) -> Self {
        Self {
            name: name.into(),
            description: None,
            criterion_type: criterion.as_str().to_string(),
            criterion_config: None,
            value_type: ValueType::default(),
            value,
            max_amount: None,
            stackable: true,
            priority: default_priority(),
            is_active: true,
            active_from: None,
            active_to: None,
            school_year_id: None,
            classroom_id: None,
        }
    }
}

/// Resolved link between one policy and one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountAssignment {
    pub policy_id: PolicyId,
    pub student_id: StudentId,
    pub status: AssignmentStatus,
    pub source: AssignmentSource,
    pub note: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload keyed by (policy, student).
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentWrite {
    pub policy_id: PolicyId,
    pub student_id: StudentId,
    pub status: AssignmentStatus,
    pub source: AssignmentSource,
    pub note: Option<String>,
    pub metadata: Option<Value>,
    pub at: DateTime<Utc>,
}

impl AssignmentWrite {
    /// Row as it looks once written, keeping `created_at` from any prior row.
    pub fn into_assignment(self, previous: Option<&DiscountAssignment>) -> DiscountAssignment {
        DiscountAssignment {
            created_at: previous.map_or(self.at, |row| row.created_at),
            updated_at: self.at,
            policy_id: self.policy_id,
            student_id: self.student_id,
            status: self.status,
            source: self.source,
            note: self.note,
            metadata: self.metadata,
        }
    }
}

/// Explicit per-pair state; storage omits rows for `NoDecision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoDecision,
    Allow(AssignmentSource),
    Deny(AssignmentSource),
}

impl Decision {
    pub fn of(assignment: Option<&DiscountAssignment>) -> Self {
        match assignment {
            None => Decision::NoDecision,
            Some(row) => match row.status {
                AssignmentStatus::Allow => Decision::Allow(row.source),
                AssignmentStatus::Deny => Decision::Deny(row.source),
            },
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(
            self,
            Decision::Allow(AssignmentSource::Manual) | Decision::Deny(AssignmentSource::Manual)
        )
    }
}

/// Event that prompted an automatic sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncTrigger {
    StudentCreated,
    StudentUpdated,
    ContactLinked,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::StudentCreated => "STUDENT_CREATED",
            SyncTrigger::StudentUpdated => "STUDENT_UPDATED",
            SyncTrigger::ContactLinked => "CONTACT_LINKED",
        }
    }
}

/// Student attributes read from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: StudentId,
    pub school_id: SchoolId,
    pub religion_id: Option<String>,
    pub religion_name: Option<String>,
    pub is_baptized: bool,
}

/// Contact that pays fees for a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactLink {
    pub contact_id: ContactId,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub student_id: StudentId,
    pub classroom_id: ClassroomId,
    pub school_year_id: SchoolYearId,
}
