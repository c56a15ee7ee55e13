use chrono::{DateTime, Utc};

use super::super::domain::{AssignmentSource, ClassroomId, Decision, DiscountPolicy, SchoolYearId};

/// Classroom rule used by the applicability pre-filter.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ClassroomScope<'a> {
    /// Sync: any classroom the student is enrolled in this year.
    Enrolled(&'a [ClassroomId]),
    /// Quote: the fee's classroom; without one only unscoped policies apply.
    Fee(Option<&'a ClassroomId>),
}

pub(crate) fn is_applicable(
    policy: &DiscountPolicy,
    school_year_id: &SchoolYearId,
    scope: ClassroomScope<'_>,
    as_of: DateTime<Utc>,
) -> bool {
    if !policy.is_live_at(as_of) || !policy.covers_school_year(school_year_id) {
        return false;
    }

    match (&policy.classroom_id, scope) {
        (None, _) => true,
        (Some(scoped), ClassroomScope::Enrolled(classrooms)) => classrooms.contains(scoped),
        (Some(scoped), ClassroomScope::Fee(classroom)) => classroom == Some(scoped),
    }
}

/// Write required to move one (policy, student) pair to its converged state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Grant,
    Revoke,
    HeldByManual,
    Unchanged,
}

pub(crate) fn plan(current: Decision, eligible: bool) -> SyncAction {
    if current.is_manual() {
        return SyncAction::HeldByManual;
    }

    match (current, eligible) {
        (Decision::Allow(AssignmentSource::Auto), true) => SyncAction::Unchanged,
        (Decision::NoDecision | Decision::Deny(AssignmentSource::Auto), true) => SyncAction::Grant,
        (Decision::Allow(AssignmentSource::Auto), false) => SyncAction::Revoke,
        _ => SyncAction::Unchanged,
    }
}
