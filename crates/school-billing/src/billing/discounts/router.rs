use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{ContactId, PolicyFields, PolicyId, StudentId, SyncTrigger, TenantContext};
use super::repository::{DiscountRepository, StudentDirectory};
use super::service::{DiscountPolicyService, DiscountServiceError, QuoteInput, StudentDecision};

pub const SCHOOL_HEADER: &str = "x-school-id";
pub const SCHOOL_YEAR_HEADER: &str = "x-school-year-id";

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        match (header(SCHOOL_HEADER), header(SCHOOL_YEAR_HEADER)) {
            (Some(school_id), Some(school_year_id)) => {
                Ok(TenantContext::new(school_id, school_year_id))
            }
            _ => {
                let payload = json!({ "error": "missing school context" });
                Err((StatusCode::UNAUTHORIZED, Json(payload)).into_response())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContactSyncRequest {
    pub(crate) contact_ids: Vec<ContactId>,
}

/// Router builder exposing the discount policy procedures.
pub fn discount_router<R, D>(service: Arc<DiscountPolicyService<R, D>>) -> Router
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    Router::new()
        .route(
            "/api/v1/discount-policies",
            get(list_handler::<R, D>).post(create_handler::<R, D>),
        )
        .route(
            "/api/v1/discount-policies/:policy_id",
            put(update_handler::<R, D>).delete(delete_handler::<R, D>),
        )
        .route(
            "/api/v1/discount-policies/:policy_id/assignments",
            get(policy_assignments_handler::<R, D>),
        )
        .route(
            "/api/v1/discount-policies/:policy_id/students/:student_id/decision",
            put(set_decision_handler::<R, D>).delete(clear_decision_handler::<R, D>),
        )
        .route(
            "/api/v1/students/:student_id/discount-assignments",
            get(student_assignments_handler::<R, D>),
        )
        .route(
            "/api/v1/students/:student_id/discount-sync",
            post(sync_handler::<R, D>),
        )
        .route(
            "/api/v1/students/:student_id/discount-quote",
            post(quote_handler::<R, D>),
        )
        .route(
            "/api/v1/contacts/discount-sync",
            post(contact_sync_handler::<R, D>),
        )
        .with_state(service)
}

pub(crate) fn error_response(error: DiscountServiceError) -> Response {
    match error {
        DiscountServiceError::InvalidArgument { field, message } => {
            let payload = json!({
                "error": message,
                "field": field,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, Json(payload)).into_response()
        }
        DiscountServiceError::NotFound { entity } => {
            let payload = json!({
                "error": format!("{entity} not found"),
            });
            (StatusCode::NOT_FOUND, Json(payload)).into_response()
        }
        other => {
            tracing::error!(error = %other, "discount request failed");
            let payload = json!({
                "error": other.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

pub(crate) async fn list_handler<R, D>(
    State(service): State<Arc<DiscountPolicyService<R, D>>>,
    tenant: TenantContext,
) -> Response
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    match service.list_policies(&tenant) {
        Ok(policies) => (StatusCode::OK, Json(policies)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn create_handler<R, D>(
    State(service): State<Arc<DiscountPolicyService<R, D>>>,
    tenant: TenantContext,
    Json(fields): Json<PolicyFields>,
) -> Response
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    match service.create_policy(&tenant, fields) {
        Ok(policy) => (StatusCode::CREATED, Json(policy)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn update_handler<R, D>(
    State(service): State<Arc<DiscountPolicyService<R, D>>>,
    tenant: TenantContext,
    Path(policy_id): Path<String>,
    Json(fields): Json<PolicyFields>,
) -> Response
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    match service.update_policy(&tenant, &PolicyId(policy_id), fields) {
        Ok(policy) => (StatusCode::OK, Json(policy)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn delete_handler<R, D>(
    State(service): State<Arc<DiscountPolicyService<R, D>>>,
    tenant: TenantContext,
    Path(policy_id): Path<String>,
) -> Response
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    match service.delete_policy(&tenant, &PolicyId(policy_id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn policy_assignments_handler<R, D>(
    State(service): State<Arc<DiscountPolicyService<R, D>>>,
    tenant: TenantContext,
    Path(policy_id): Path<String>,
) -> Response
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    match service.policy_assignments(&tenant, &PolicyId(policy_id)) {
        Ok(assignments) => (StatusCode::OK, Json(assignments)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn student_assignments_handler<R, D>(
    State(service): State<Arc<DiscountPolicyService<R, D>>>,
    tenant: TenantContext,
    Path(student_id): Path<String>,
) -> Response
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    match service.student_assignments(&tenant, &StudentId(student_id)) {
        Ok(assignments) => (StatusCode::OK, Json(assignments)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn set_decision_handler<R, D>(
    State(service): State<Arc<DiscountPolicyService<R, D>>>,
    tenant: TenantContext,
    Path((policy_id, student_id)): Path<(String, String)>,
    Json(decision): Json<StudentDecision>,
) -> Response
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    match service.set_student_decision(
        &tenant,
        &PolicyId(policy_id),
        &StudentId(student_id),
        decision,
    ) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn clear_decision_handler<R, D>(
    State(service): State<Arc<DiscountPolicyService<R, D>>>,
    tenant: TenantContext,
    Path((policy_id, student_id)): Path<(String, String)>,
) -> Response
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    match service.clear_student_decision(&tenant, &PolicyId(policy_id), &StudentId(student_id)) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn sync_handler<R, D>(
    State(service): State<Arc<DiscountPolicyService<R, D>>>,
    tenant: TenantContext,
    Path(student_id): Path<String>,
) -> Response
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    match service.sync_student(&tenant, &StudentId(student_id), SyncTrigger::StudentUpdated) {
        Ok(_) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn quote_handler<R, D>(
    State(service): State<Arc<DiscountPolicyService<R, D>>>,
    tenant: TenantContext,
    Path(student_id): Path<String>,
    Json(input): Json<QuoteInput>,
) -> Response
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    match service.quote(&tenant, &StudentId(student_id), input) {
        Ok(quote) => (StatusCode::OK, Json(quote)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn contact_sync_handler<R, D>(
    State(service): State<Arc<DiscountPolicyService<R, D>>>,
    tenant: TenantContext,
    Json(request): Json<ContactSyncRequest>,
) -> Response
where
    R: DiscountRepository + 'static,
    D: StudentDirectory + 'static,
{
    match service.sync_contacts(&tenant, &request.contact_ids) {
        Ok(report) => {
            let payload = json!({
                "ok": true,
                "students": report.synced.len(),
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}
