use crate::cli::ServeArgs;
use crate::infra::{demo_policies, AppState, InMemoryDiscountRepository, InMemoryStudentDirectory};
use crate::routes::with_discount_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use school_billing::billing::discounts::{DiscountPolicyService, SyncTrigger, TenantContext};
use school_billing::config::AppConfig;
use school_billing::error::AppError;
use school_billing::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = Arc::new(InMemoryDiscountRepository::default());
    let directory = Arc::new(InMemoryStudentDirectory::default());
    let discount_service = Arc::new(DiscountPolicyService::new(
        repository,
        directory.clone(),
        config.discounts.engine_config(),
    ));

    if let Some(school) = args.seed_demo.take() {
        let tenant = TenantContext::new(school, args.school_year.clone());
        seed(&discount_service, &directory, &tenant)?;
    }

    let app = with_discount_routes(discount_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "school billing service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn seed(
    service: &DiscountPolicyService<InMemoryDiscountRepository, InMemoryStudentDirectory>,
    directory: &InMemoryStudentDirectory,
    tenant: &TenantContext,
) -> Result<(), AppError> {
    for fields in demo_policies() {
        service.create_policy(tenant, fields)?;
    }
    let students = directory.seed_demo_school(tenant);
    for student in &students {
        service.sync_student(tenant, student, SyncTrigger::StudentCreated)?;
    }
    info!(school_id = %tenant.school_id, students = students.len(), "demo school seeded");
    Ok(())
}
