use super::domain::{
    AssignmentSource, AssignmentWrite, ContactId, ContactLink, DiscountAssignment,
    DiscountPolicy, Enrollment, PolicyId, SchoolId, SchoolYearId, StudentId, StudentRecord,
    UserId,
};

/// How an upsert treats an existing manual row for the same pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Replace whatever row exists.
    Overwrite,
    /// Leave a manual row untouched and report it.
    PreserveManual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Written(DiscountAssignment),
    HeldByManual(DiscountAssignment),
}

/// Storage for policies and assignments. Every call is atomic for one (policy, student) pair.
pub trait DiscountRepository: Send + Sync {
    fn insert_policy(&self, policy: DiscountPolicy) -> Result<DiscountPolicy, RepositoryError>;
    fn replace_policy(&self, policy: DiscountPolicy) -> Result<DiscountPolicy, RepositoryError>;
    fn fetch_policy(&self, id: &PolicyId) -> Result<Option<DiscountPolicy>, RepositoryError>;
    fn policies_for_school(
        &self,
        school_id: &SchoolId,
    ) -> Result<Vec<DiscountPolicy>, RepositoryError>;
    /// Hard delete; assignments referencing the policy go with it.
    fn delete_policy(&self, id: &PolicyId) -> Result<(), RepositoryError>;

    fn fetch_assignment(
        &self,
        policy_id: &PolicyId,
        student_id: &StudentId,
    ) -> Result<Option<DiscountAssignment>, RepositoryError>;
    fn assignments_for_policy(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Vec<DiscountAssignment>, RepositoryError>;
    fn assignments_for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<DiscountAssignment>, RepositoryError>;
    fn upsert_assignment(
        &self,
        write: AssignmentWrite,
        mode: UpsertMode,
    ) -> Result<UpsertOutcome, RepositoryError>;
    /// Removes the pair's row only when it was written by `source`.
    fn delete_assignment(
        &self,
        policy_id: &PolicyId,
        student_id: &StudentId,
        source: AssignmentSource,
    ) -> Result<Option<DiscountAssignment>, RepositoryError>;
}

/// Read-only view over students, guardians, enrollments and staff.
pub trait StudentDirectory: Send + Sync {
    fn student(&self, id: &StudentId) -> Result<Option<StudentRecord>, RepositoryError>;
    fn fee_payers(&self, student_id: &StudentId) -> Result<Vec<ContactLink>, RepositoryError>;
    fn students_paid_by(&self, contacts: &[ContactId]) -> Result<Vec<StudentId>, RepositoryError>;
    /// Enrollments for `school_year_id` in classrooms belonging to `school_id`.
    fn enrollments(
        &self,
        school_id: &SchoolId,
        school_year_id: &SchoolYearId,
        students: &[StudentId],
    ) -> Result<Vec<Enrollment>, RepositoryError>;
    fn has_staff_member(
        &self,
        school_id: &SchoolId,
        users: &[UserId],
    ) -> Result<bool, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
