//! Fee discount policies: the per-school rule catalog, automatic eligibility evaluation,
//! and reconciliation of computed eligibility with administrator overrides.

pub mod catalog;
pub mod domain;
pub mod eligibility;
pub mod engine;
pub mod pricing;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use catalog::{validate_fields, PolicyCatalog};
pub use domain::{
    AssignmentSource, AssignmentStatus, AssignmentWrite, ClassroomId, ContactId, ContactLink,
    CriterionType, Decision, DiscountAssignment, DiscountPolicy, Enrollment, PolicyFields,
    PolicyId, SchoolId, SchoolYearId, StudentId, StudentRecord, SyncTrigger, TenantContext,
    UserId, ValueType,
};
pub use eligibility::{build_context, EligibilityContext};
pub use engine::{
    ContactSyncReport, Criterion, CriterionError, DiscountEngine, DiscountSyncEngine,
    EngineConfig, EngineError, PolicyFailure, QuoteRequest, StudentFailure, SyncReport,
    SyncRequest,
};
pub use pricing::{AppliedDiscount, DiscountQuote};
pub use repository::{
    DiscountRepository, RepositoryError, StudentDirectory, UpsertMode, UpsertOutcome,
};
pub use router::{discount_router, SCHOOL_HEADER, SCHOOL_YEAR_HEADER};
pub use service::{DiscountPolicyService, DiscountServiceError, QuoteInput, StudentDecision};
