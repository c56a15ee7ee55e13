//! Automatic discount eligibility and its reconciliation with stored assignments.
//!
//! Sync walks every policy of the school independently. A policy that cannot be evaluated
//! or written is recorded in the [`SyncReport`] and the pass moves on; only failures to load
//! the student or the policy list abort the call.

mod config;
pub(crate) mod criteria;
pub(crate) mod reconcile;

pub use config::EngineConfig;
pub use criteria::{Criterion, CriterionError, ReligionMatch, SiblingThreshold};
pub use reconcile::SyncAction;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::domain::{
    AssignmentSource, AssignmentStatus, AssignmentWrite, ClassroomId, ContactId, Decision,
    DiscountAssignment, DiscountPolicy, PolicyId, SchoolId, SchoolYearId, StudentId,
    SyncTrigger, TenantContext,
};
use super::eligibility::{build_context, EligibilityContext};
use super::pricing::{stack_discounts, DiscountQuote};
use super::repository::{
    DiscountRepository, RepositoryError, StudentDirectory, UpsertMode, UpsertOutcome,
};
use reconcile::{is_applicable, plan, ClassroomScope};

/// Evaluation and assignment-writing operations consumed by the service layer.
pub trait DiscountEngine: Send + Sync {
    fn sync_student(&self, request: &SyncRequest) -> Result<SyncReport, EngineError>;

    fn sync_contacts(
        &self,
        contacts: &[ContactId],
        tenant: &TenantContext,
    ) -> Result<ContactSyncReport, EngineError>;

    /// Upsert a manual row for the pair, replacing any manual or automatic row.
    fn set_manual_assignment(
        &self,
        policy_id: &PolicyId,
        student_id: &StudentId,
        status: AssignmentStatus,
        note: Option<String>,
    ) -> Result<DiscountAssignment, EngineError>;

    /// Remove the manual row for the pair. Does not recompute eligibility.
    fn clear_manual_assignment(
        &self,
        policy_id: &PolicyId,
        student_id: &StudentId,
    ) -> Result<Option<DiscountAssignment>, EngineError>;

    fn quote(&self, request: &QuoteRequest) -> Result<DiscountQuote, EngineError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("student {0} not found")]
    StudentNotFound(StudentId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub student_id: StudentId,
    pub school_id: SchoolId,
    pub school_year_id: SchoolYearId,
    pub trigger: SyncTrigger,
    pub as_of: DateTime<Utc>,
}

impl SyncRequest {
    pub fn new(student_id: StudentId, tenant: &TenantContext, trigger: SyncTrigger) -> Self {
        Self {
            student_id,
            school_id: tenant.school_id.clone(),
            school_year_id: tenant.school_year_id.clone(),
            trigger,
            as_of: Utc::now(),
        }
    }

    pub fn at(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = as_of;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyFailure {
    pub policy_id: PolicyId,
    pub reason: String,
}

/// Per-policy outcome of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub student_id: StudentId,
    pub created: Vec<PolicyId>,
    pub removed: Vec<PolicyId>,
    pub unchanged: usize,
    pub held_by_manual: Vec<PolicyId>,
    pub failures: Vec<PolicyFailure>,
}

impl SyncReport {
    fn new(student_id: StudentId) -> Self {
        Self {
            student_id,
            created: Vec::new(),
            removed: Vec::new(),
            unchanged: 0,
            held_by_manual: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Number of rows created or removed.
    pub fn writes(&self) -> usize {
        self.created.len() + self.removed.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentFailure {
    pub student_id: StudentId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactSyncReport {
    pub synced: Vec<SyncReport>,
    pub failures: Vec<StudentFailure>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuoteRequest {
    pub student_id: StudentId,
    pub school_id: SchoolId,
    pub school_year_id: SchoolYearId,
    pub classroom_id: Option<ClassroomId>,
    pub fee_total: f64,
    pub as_of: DateTime<Utc>,
}

/// Default engine backed by the repository and student directory ports.
pub struct DiscountSyncEngine<R, D> {
    repository: Arc<R>,
    directory: Arc<D>,
    config: EngineConfig,
}

impl<R, D> DiscountSyncEngine<R, D>
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    pub fn new(repository: Arc<R>, directory: Arc<D>, config: EngineConfig) -> Self {
        Self {
            repository,
            directory,
            config,
        }
    }

    /// Pre-filter then criterion. Inapplicable policies are ineligible without decoding.
    fn evaluate(
        &self,
        policy: &DiscountPolicy,
        context: &EligibilityContext,
        scope: ClassroomScope<'_>,
        as_of: DateTime<Utc>,
    ) -> Result<bool, CriterionError> {
        if !is_applicable(policy, &context.school_year_id, scope, as_of) {
            return Ok(false);
        }
        let criterion = Criterion::for_policy(policy)?;
        Ok(criterion.matches(context, &self.config))
    }

    fn auto_grant(
        &self,
        policy: &DiscountPolicy,
        context: &EligibilityContext,
        request: &SyncRequest,
    ) -> Result<UpsertOutcome, RepositoryError> {
        let write = AssignmentWrite {
            policy_id: policy.id.clone(),
            student_id: request.student_id.clone(),
            status: AssignmentStatus::Allow,
            source: AssignmentSource::Auto,
            note: Some(format!("auto:{}", request.trigger.as_str())),
            metadata: Some(json!({
                "trigger": request.trigger.as_str(),
                "siblingCount": context.sibling_count,
                "isStaffChild": context.is_staff_child,
                "religionId": context.religion_id,
            })),
            at: request.as_of,
        };
        self.repository
            .upsert_assignment(write, UpsertMode::PreserveManual)
    }
}

fn sorted_for_evaluation(mut policies: Vec<DiscountPolicy>) -> Vec<DiscountPolicy> {
    policies.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    policies
}

impl<R, D> DiscountEngine for DiscountSyncEngine<R, D>
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    fn sync_student(&self, request: &SyncRequest) -> Result<SyncReport, EngineError> {
        let context = build_context(
            self.directory.as_ref(),
            &request.student_id,
            &request.school_id,
            &request.school_year_id,
        )?;
        let policies =
            sorted_for_evaluation(self.repository.policies_for_school(&request.school_id)?);
        let existing: HashMap<PolicyId, DiscountAssignment> = self
            .repository
            .assignments_for_student(&request.student_id)?
            .into_iter()
            .map(|assignment| (assignment.policy_id.clone(), assignment))
            .collect();

        let mut report = SyncReport::new(request.student_id.clone());
        let scope = ClassroomScope::Enrolled(&context.classroom_ids);

        for policy in &policies {
            let eligible = match self.evaluate(policy, &context, scope, request.as_of) {
                Ok(eligible) => eligible,
                Err(err) => {
                    warn!(
                        policy_id = %policy.id,
                        student_id = %request.student_id,
                        error = %err,
                        "discount policy could not be evaluated; treating as ineligible"
                    );
                    report.failures.push(PolicyFailure {
                        policy_id: policy.id.clone(),
                        reason: err.to_string(),
                    });
                    false
                }
            };

            match plan(Decision::of(existing.get(&policy.id)), eligible) {
                SyncAction::Unchanged => report.unchanged += 1,
                SyncAction::HeldByManual => report.held_by_manual.push(policy.id.clone()),
                SyncAction::Grant => match self.auto_grant(policy, &context, request) {
                    Ok(UpsertOutcome::Written(_)) => {
                        debug!(policy_id = %policy.id, student_id = %request.student_id, "auto discount granted");
                        report.created.push(policy.id.clone());
                    }
                    Ok(UpsertOutcome::HeldByManual(_)) => {
                        report.held_by_manual.push(policy.id.clone())
                    }
                    Err(err) => {
                        warn!(policy_id = %policy.id, error = %err, "auto discount grant failed");
                        report.failures.push(PolicyFailure {
                            policy_id: policy.id.clone(),
                            reason: err.to_string(),
                        });
                    }
                },
                SyncAction::Revoke => match self.repository.delete_assignment(
                    &policy.id,
                    &request.student_id,
                    AssignmentSource::Auto,
                ) {
                    Ok(Some(_)) => {
                        debug!(policy_id = %policy.id, student_id = %request.student_id, "auto discount revoked");
                        report.removed.push(policy.id.clone());
                    }
                    Ok(None) => report.unchanged += 1,
                    Err(err) => {
                        warn!(policy_id = %policy.id, error = %err, "auto discount revoke failed");
                        report.failures.push(PolicyFailure {
                            policy_id: policy.id.clone(),
                            reason: err.to_string(),
                        });
                    }
                },
            }
        }

        info!(
            student_id = %request.student_id,
            trigger = request.trigger.as_str(),
            created = report.created.len(),
            removed = report.removed.len(),
            unchanged = report.unchanged,
            held_by_manual = report.held_by_manual.len(),
            failed = report.failures.len(),
            "discount assignments synced"
        );

        Ok(report)
    }

    fn sync_contacts(
        &self,
        contacts: &[ContactId],
        tenant: &TenantContext,
    ) -> Result<ContactSyncReport, EngineError> {
        let normalized: Vec<ContactId> = contacts
            .iter()
            .map(|contact| contact.as_str().trim())
            .filter(|contact| !contact.is_empty())
            .map(ContactId::from)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut report = ContactSyncReport::default();
        if normalized.is_empty() {
            return Ok(report);
        }

        let mut students = BTreeSet::new();
        for student_id in self.directory.students_paid_by(&normalized)? {
            let in_school = self
                .directory
                .student(&student_id)?
                .is_some_and(|record| record.school_id == tenant.school_id);
            if in_school {
                students.insert(student_id);
            } else {
                debug!(%student_id, "contact-linked student outside tenant school skipped");
            }
        }

        for student_id in students {
            let request = SyncRequest::new(student_id.clone(), tenant, SyncTrigger::ContactLinked);
            match self.sync_student(&request) {
                Ok(synced) => report.synced.push(synced),
                Err(err) => {
                    warn!(student_id = %student_id, error = %err, "contact-triggered discount sync failed");
                    report.failures.push(StudentFailure {
                        student_id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    fn set_manual_assignment(
        &self,
        policy_id: &PolicyId,
        student_id: &StudentId,
        status: AssignmentStatus,
        note: Option<String>,
    ) -> Result<DiscountAssignment, EngineError> {
        let write = AssignmentWrite {
            policy_id: policy_id.clone(),
            student_id: student_id.clone(),
            status,
            source: AssignmentSource::Manual,
            note,
            metadata: None,
            at: Utc::now(),
        };

        match self.repository.upsert_assignment(write, UpsertMode::Overwrite)? {
            UpsertOutcome::Written(assignment) | UpsertOutcome::HeldByManual(assignment) => {
                info!(%policy_id, %student_id, status = ?assignment.status, "manual discount decision recorded");
                Ok(assignment)
            }
        }
    }

    fn clear_manual_assignment(
        &self,
        policy_id: &PolicyId,
        student_id: &StudentId,
    ) -> Result<Option<DiscountAssignment>, EngineError> {
        let current = self.repository.fetch_assignment(policy_id, student_id)?;
        if !current.is_some_and(|row| row.source == AssignmentSource::Manual) {
            return Ok(None);
        }
        let removed =
            self.repository
                .delete_assignment(policy_id, student_id, AssignmentSource::Manual)?;
        if removed.is_some() {
            info!(%policy_id, %student_id, "manual discount decision cleared");
        }
        Ok(removed)
    }

    fn quote(&self, request: &QuoteRequest) -> Result<DiscountQuote, EngineError> {
        if request.fee_total <= 0.0 {
            return Ok(DiscountQuote::default());
        }

        let context = build_context(
            self.directory.as_ref(),
            &request.student_id,
            &request.school_id,
            &request.school_year_id,
        )?;
        let scope = ClassroomScope::Fee(request.classroom_id.as_ref());
        let policies: Vec<DiscountPolicy> =
            sorted_for_evaluation(self.repository.policies_for_school(&request.school_id)?)
                .into_iter()
                .filter(|policy| {
                    is_applicable(policy, &request.school_year_id, scope, request.as_of)
                })
                .collect();
        let decisions: HashMap<PolicyId, AssignmentStatus> = self
            .repository
            .assignments_for_student(&request.student_id)?
            .into_iter()
            .map(|assignment| (assignment.policy_id, assignment.status))
            .collect();

        let allowed = policies.iter().filter(|policy| {
            match decisions.get(&policy.id) {
                Some(AssignmentStatus::Deny) => false,
                Some(AssignmentStatus::Allow) => true,
                None => match Criterion::for_policy(policy) {
                    Ok(criterion) => criterion.matches(&context, &self.config),
                    Err(err) => {
                        warn!(policy_id = %policy.id, error = %err, "discount policy skipped in quote");
                        false
                    }
                },
            }
        });

        Ok(stack_discounts(request.fee_total, allowed))
    }
}
