use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::catalog::PolicyCatalog;
use super::domain::{
    AssignmentStatus, ClassroomId, ContactId, DiscountAssignment, DiscountPolicy, PolicyFields,
    PolicyId, StudentId, StudentRecord, SyncTrigger, TenantContext,
};
use super::engine::{
    ContactSyncReport, DiscountEngine, DiscountSyncEngine, EngineConfig, EngineError,
    QuoteRequest, SyncReport, SyncRequest,
};
use super::pricing::DiscountQuote;
use super::repository::{DiscountRepository, RepositoryError, StudentDirectory};

/// Administrator decision payload for one (policy, student) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentDecision {
    pub status: AssignmentStatus,
    #[serde(default)]
    pub note: Option<String>,
}

/// Fee context for an automatic discount quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteInput {
    pub fee_total: f64,
    #[serde(default)]
    pub classroom_id: Option<ClassroomId>,
}

/// Service composing the policy catalog, student directory, and discount engine with
/// tenant ownership checks on every call.
pub struct DiscountPolicyService<R, D> {
    catalog: PolicyCatalog<R>,
    directory: Arc<D>,
    engine: Arc<dyn DiscountEngine>,
}

impl<R, D> DiscountPolicyService<R, D>
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    pub fn new(repository: Arc<R>, directory: Arc<D>, config: EngineConfig) -> Self {
        let engine = Arc::new(DiscountSyncEngine::new(
            repository.clone(),
            directory.clone(),
            config,
        ));
        Self::with_engine(repository, directory, engine)
    }

    pub fn with_engine(
        repository: Arc<R>,
        directory: Arc<D>,
        engine: Arc<dyn DiscountEngine>,
    ) -> Self {
        Self {
            catalog: PolicyCatalog::new(repository),
            directory,
            engine,
        }
    }

    pub fn list_policies(
        &self,
        tenant: &TenantContext,
    ) -> Result<Vec<DiscountPolicy>, DiscountServiceError> {
        self.catalog.list_policies(&tenant.school_id)
    }

    pub fn create_policy(
        &self,
        tenant: &TenantContext,
        fields: PolicyFields,
    ) -> Result<DiscountPolicy, DiscountServiceError> {
        self.catalog
            .create_policy(&tenant.school_id, fields, Utc::now())
    }

    pub fn update_policy(
        &self,
        tenant: &TenantContext,
        policy_id: &PolicyId,
        fields: PolicyFields,
    ) -> Result<DiscountPolicy, DiscountServiceError> {
        self.catalog
            .update_policy(policy_id, &tenant.school_id, fields, Utc::now())
    }

    pub fn delete_policy(
        &self,
        tenant: &TenantContext,
        policy_id: &PolicyId,
    ) -> Result<(), DiscountServiceError> {
        self.catalog.delete_policy(policy_id, &tenant.school_id)
    }

    pub fn policy_assignments(
        &self,
        tenant: &TenantContext,
        policy_id: &PolicyId,
    ) -> Result<Vec<DiscountAssignment>, DiscountServiceError> {
        self.catalog
            .assignments_for_policy(policy_id, &tenant.school_id)
    }

    pub fn student_assignments(
        &self,
        tenant: &TenantContext,
        student_id: &StudentId,
    ) -> Result<Vec<DiscountAssignment>, DiscountServiceError> {
        let student = self.owned_student(tenant, student_id)?;
        self.catalog
            .assignments_for_student(&student.id, &tenant.school_id)
    }

    pub fn set_student_decision(
        &self,
        tenant: &TenantContext,
        policy_id: &PolicyId,
        student_id: &StudentId,
        decision: StudentDecision,
    ) -> Result<DiscountAssignment, DiscountServiceError> {
        let policy = self.catalog.owned_policy(policy_id, &tenant.school_id)?;
        let student = self.owned_student(tenant, student_id)?;
        Ok(self.engine.set_manual_assignment(
            &policy.id,
            &student.id,
            decision.status,
            decision.note,
        )?)
    }

    pub fn clear_student_decision(
        &self,
        tenant: &TenantContext,
        policy_id: &PolicyId,
        student_id: &StudentId,
    ) -> Result<Option<DiscountAssignment>, DiscountServiceError> {
        let policy = self.catalog.owned_policy(policy_id, &tenant.school_id)?;
        let student = self.owned_student(tenant, student_id)?;
        Ok(self.engine.clear_manual_assignment(&policy.id, &student.id)?)
    }

    pub fn sync_student(
        &self,
        tenant: &TenantContext,
        student_id: &StudentId,
        trigger: SyncTrigger,
    ) -> Result<SyncReport, DiscountServiceError> {
        let student = self.owned_student(tenant, student_id)?;
        let request = SyncRequest::new(student.id, tenant, trigger);
        Ok(self.engine.sync_student(&request)?)
    }

    pub fn sync_contacts(
        &self,
        tenant: &TenantContext,
        contacts: &[ContactId],
    ) -> Result<ContactSyncReport, DiscountServiceError> {
        Ok(self.engine.sync_contacts(contacts, tenant)?)
    }

    pub fn quote(
        &self,
        tenant: &TenantContext,
        student_id: &StudentId,
        input: QuoteInput,
    ) -> Result<DiscountQuote, DiscountServiceError> {
        if !input.fee_total.is_finite() {
            return Err(DiscountServiceError::InvalidArgument {
                field: "fee_total",
                message: "fee_total must be a finite number".to_string(),
            });
        }
        let student = self.owned_student(tenant, student_id)?;
        let request = QuoteRequest {
            student_id: student.id,
            school_id: tenant.school_id.clone(),
            school_year_id: tenant.school_year_id.clone(),
            classroom_id: input.classroom_id,
            fee_total: input.fee_total,
            as_of: Utc::now(),
        };
        Ok(self.engine.quote(&request)?)
    }

    fn owned_student(
        &self,
        tenant: &TenantContext,
        student_id: &StudentId,
    ) -> Result<StudentRecord, DiscountServiceError> {
        self.directory
            .student(student_id)?
            .filter(|student| student.school_id == tenant.school_id)
            .ok_or(DiscountServiceError::NotFound { entity: "student" })
    }
}

/// Error raised by the discount policy service.
#[derive(Debug, thiserror::Error)]
pub enum DiscountServiceError {
    #[error("invalid {field}: {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<EngineError> for DiscountServiceError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::StudentNotFound(_) => Self::NotFound { entity: "student" },
            EngineError::Repository(err) => Self::Repository(err),
        }
    }
}
