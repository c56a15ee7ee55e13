use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::domain::{
    DiscountAssignment, DiscountPolicy, PolicyFields, PolicyId, SchoolId, StudentId,
};
use super::engine::{Criterion, CriterionError};
use super::repository::DiscountRepository;
use super::service::DiscountServiceError;

static POLICY_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_policy_id() -> PolicyId {
    let id = POLICY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    PolicyId(format!("policy-{id:06}"))
}

/// Tenant-scoped CRUD over policies and reads over assignments. Evaluates nothing.
pub struct PolicyCatalog<R> {
    repository: Arc<R>,
}

impl<R> PolicyCatalog<R>
where
    R: DiscountRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Ordered by priority ascending, newest first within a priority.
    pub fn list_policies(
        &self,
        school_id: &SchoolId,
    ) -> Result<Vec<DiscountPolicy>, DiscountServiceError> {
        let mut policies = self.repository.policies_for_school(school_id)?;
        policies.retain(|policy| &policy.school_id == school_id);
        policies.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(b.created_at.cmp(&a.created_at))
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(policies)
    }

    pub fn create_policy(
        &self,
        school_id: &SchoolId,
        fields: PolicyFields,
        now: DateTime<Utc>,
    ) -> Result<DiscountPolicy, DiscountServiceError> {
        validate_fields(&fields)?;
        let policy = DiscountPolicy::from_fields(next_policy_id(), school_id.clone(), fields, now);
        Ok(self.repository.insert_policy(policy)?)
    }

    /// Full replace; identity, tenant and creation time are preserved.
    pub fn update_policy(
        &self,
        id: &PolicyId,
        school_id: &SchoolId,
        fields: PolicyFields,
        now: DateTime<Utc>,
    ) -> Result<DiscountPolicy, DiscountServiceError> {
        validate_fields(&fields)?;
        let current = self.owned_policy(id, school_id)?;
        let mut replacement =
            DiscountPolicy::from_fields(current.id, current.school_id, fields, now);
        replacement.created_at = current.created_at;
        Ok(self.repository.replace_policy(replacement)?)
    }

    pub fn delete_policy(
        &self,
        id: &PolicyId,
        school_id: &SchoolId,
    ) -> Result<(), DiscountServiceError> {
        let policy = self.owned_policy(id, school_id)?;
        self.repository.delete_policy(&policy.id)?;
        Ok(())
    }

    /// Another tenant's policy reads exactly like a missing one.
    pub fn owned_policy(
        &self,
        id: &PolicyId,
        school_id: &SchoolId,
    ) -> Result<DiscountPolicy, DiscountServiceError> {
        self.repository
            .fetch_policy(id)?
            .filter(|policy| &policy.school_id == school_id)
            .ok_or(DiscountServiceError::NotFound { entity: "policy" })
    }

    pub fn assignments_for_policy(
        &self,
        policy_id: &PolicyId,
        school_id: &SchoolId,
    ) -> Result<Vec<DiscountAssignment>, DiscountServiceError> {
        let policy = self.owned_policy(policy_id, school_id)?;
        let mut assignments = self.repository.assignments_for_policy(&policy.id)?;
        sort_for_review(&mut assignments);
        Ok(assignments)
    }

    /// Only assignments whose policy belongs to `school_id`.
    pub fn assignments_for_student(
        &self,
        student_id: &StudentId,
        school_id: &SchoolId,
    ) -> Result<Vec<DiscountAssignment>, DiscountServiceError> {
        let owned: HashSet<PolicyId> = self
            .repository
            .policies_for_school(school_id)?
            .into_iter()
            .filter(|policy| &policy.school_id == school_id)
            .map(|policy| policy.id)
            .collect();
        let mut assignments = self.repository.assignments_for_student(student_id)?;
        assignments.retain(|assignment| owned.contains(&assignment.policy_id));
        sort_for_review(&mut assignments);
        Ok(assignments)
    }
}

/// ALLOW before DENY, manual before auto, newest first.
fn sort_for_review(assignments: &mut [DiscountAssignment]) {
    assignments.sort_by(|a, b| {
        a.status
            .cmp(&b.status)
            .then(a.source.cmp(&b.source))
            .then(b.created_at.cmp(&a.created_at))
            .then_with(|| review_tiebreak(a, b))
    });
}

fn review_tiebreak(a: &DiscountAssignment, b: &DiscountAssignment) -> CmpOrdering {
    a.policy_id
        .cmp(&b.policy_id)
        .then_with(|| a.student_id.cmp(&b.student_id))
}

fn invalid(field: &'static str, message: impl Into<String>) -> DiscountServiceError {
    DiscountServiceError::InvalidArgument {
        field,
        message: message.into(),
    }
}

/// Field checks shared by create and update; the first failing field is reported.
pub fn validate_fields(fields: &PolicyFields) -> Result<(), DiscountServiceError> {
    if fields.name.trim().is_empty() {
        return Err(invalid("name", "name is required"));
    }
    if !fields.value.is_finite() || fields.value < 0.0 {
        return Err(invalid("value", "value must be a non-negative number"));
    }
    if let Some(cap) = fields.max_amount {
        if !cap.is_finite() || cap < 0.0 {
            return Err(invalid(
                "max_amount",
                "max_amount must be a non-negative number",
            ));
        }
    }
    match Criterion::decode(&fields.criterion_type, fields.criterion_config.as_ref()) {
        Ok(_) => {}
        Err(err @ CriterionError::UnknownType(_)) => {
            return Err(invalid("criterion_type", err.to_string()))
        }
        Err(err @ CriterionError::MalformedConfig { .. }) => {
            return Err(invalid("criterion_config", err.to_string()))
        }
    }
    if let (Some(from), Some(to)) = (fields.active_from, fields.active_to) {
        if from > to {
            return Err(invalid("active_to", "active_to must not precede active_from"));
        }
    }
    Ok(())
}
