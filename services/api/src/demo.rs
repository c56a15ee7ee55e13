use crate::infra::{demo_policies, InMemoryDiscountRepository, InMemoryStudentDirectory};
use clap::Args;
use school_billing::billing::discounts::{
    AssignmentStatus, DiscountAssignment, DiscountPolicy, DiscountPolicyService, DiscountQuote,
    EngineConfig, QuoteInput, StudentDecision, StudentId, SyncReport, SyncTrigger, TenantContext,
};
use school_billing::error::AppError;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// School id used for the seeded tenant
    #[arg(long, default_value = "school-demo")]
    pub(crate) school: String,
    /// School year id used for the seeded enrollments
    #[arg(long, default_value = "year-2025")]
    pub(crate) school_year: String,
    /// Fee total to quote for every student
    #[arg(long, default_value_t = 1200.0)]
    pub(crate) fee_total: f64,
    /// Minimum enrolled siblings for sibling policies without their own threshold
    #[arg(long, default_value_t = 2)]
    pub(crate) min_siblings: u32,
    /// Skip the manual override walkthrough
    #[arg(long)]
    pub(crate) skip_override: bool,
}

type DemoService = DiscountPolicyService<InMemoryDiscountRepository, InMemoryStudentDirectory>;

pub(crate) struct StudentSnapshot {
    pub(crate) student_id: StudentId,
    pub(crate) assignments: Vec<DiscountAssignment>,
    pub(crate) quote: DiscountQuote,
}

pub(crate) struct OverrideWalkthrough {
    pub(crate) policy: DiscountPolicy,
    pub(crate) student_id: StudentId,
    pub(crate) held: SyncReport,
    pub(crate) restored: SyncReport,
}

pub(crate) struct DemoOutcome {
    pub(crate) tenant: TenantContext,
    pub(crate) policies: Vec<DiscountPolicy>,
    pub(crate) initial_sync: Vec<SyncReport>,
    pub(crate) walkthrough: Option<OverrideWalkthrough>,
    pub(crate) students: Vec<StudentSnapshot>,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let outcome = simulate(&args)?;
    render(&outcome, args.fee_total);
    Ok(())
}

pub(crate) fn simulate(args: &DemoArgs) -> Result<DemoOutcome, AppError> {
    let tenant = TenantContext::new(args.school.as_str(), args.school_year.as_str());
    let directory = Arc::new(InMemoryStudentDirectory::default());
    let service: DemoService = DiscountPolicyService::new(
        Arc::new(InMemoryDiscountRepository::default()),
        directory.clone(),
        EngineConfig {
            default_min_siblings: args.min_siblings,
        },
    );

    for fields in demo_policies() {
        service.create_policy(&tenant, fields)?;
    }
    let policies = service.list_policies(&tenant)?;

    let students = directory.seed_demo_school(&tenant);
    let mut initial_sync = Vec::with_capacity(students.len());
    for student in &students {
        initial_sync.push(service.sync_student(&tenant, student, SyncTrigger::StudentCreated)?);
    }

    let walkthrough = match (args.skip_override, policies.first(), students.first()) {
        (false, Some(policy), Some(student)) => {
            Some(override_walkthrough(&service, &tenant, policy, student)?)
        }
        _ => None,
    };

    let mut snapshots = Vec::with_capacity(students.len());
    for student in students {
        let assignments = service.student_assignments(&tenant, &student)?;
        let quote = service.quote(
            &tenant,
            &student,
            QuoteInput {
                fee_total: args.fee_total,
                classroom_id: None,
            },
        )?;
        snapshots.push(StudentSnapshot {
            student_id: student,
            assignments,
            quote,
        });
    }

    Ok(DemoOutcome {
        tenant,
        policies,
        initial_sync,
        walkthrough,
        students: snapshots,
    })
}

/// Deny a policy by hand, show that sync keeps it, then clear and converge again.
fn override_walkthrough(
    service: &DemoService,
    tenant: &TenantContext,
    policy: &DiscountPolicy,
    student: &StudentId,
) -> Result<OverrideWalkthrough, AppError> {
    service.set_student_decision(
        tenant,
        &policy.id,
        student,
        StudentDecision {
            status: AssignmentStatus::Deny,
            note: Some("demo: administrator opt-out".to_string()),
        },
    )?;
    let held = service.sync_student(tenant, student, SyncTrigger::StudentUpdated)?;

    service.clear_student_decision(tenant, &policy.id, student)?;
    let restored = service.sync_student(tenant, student, SyncTrigger::StudentUpdated)?;

    Ok(OverrideWalkthrough {
        policy: policy.clone(),
        student_id: student.clone(),
        held,
        restored,
    })
}

fn render(outcome: &DemoOutcome, fee_total: f64) {
    println!(
        "School discount demo ({} / {})",
        outcome.tenant.school_id, outcome.tenant.school_year_id
    );

    println!("\nPolicies (evaluation order):");
    for policy in &outcome.policies {
        let cap = policy
            .max_amount
            .map(|cap| format!(" cap {cap:.2}"))
            .unwrap_or_default();
        println!(
            "  - [{}] {} | {} {:?} {}{} | stackable={}",
            policy.priority,
            policy.name,
            policy.criterion_type,
            policy.value_type,
            policy.value,
            cap,
            policy.stackable
        );
    }

    println!("\nInitial sync:");
    for report in &outcome.initial_sync {
        println!(
            "  - {}: {} granted | {} failed",
            report.student_id,
            report.created.len(),
            report.failures.len()
        );
    }

    if let Some(walkthrough) = &outcome.walkthrough {
        println!(
            "\nManual override on '{}' for {}:",
            walkthrough.policy.name, walkthrough.student_id
        );
        println!(
            "  - after DENY + sync: {} held by manual decision",
            walkthrough.held.held_by_manual.len()
        );
        println!(
            "  - after clear + sync: {} re-granted automatically",
            walkthrough.restored.created.len()
        );
    }

    println!("\nAssignments and quotes (fee {fee_total:.2}):");
    for snapshot in &outcome.students {
        println!(
            "  - {}: discount {:.2}",
            snapshot.student_id, snapshot.quote.amount
        );
        for assignment in &snapshot.assignments {
            println!(
                "    * {} {:?}/{:?} {}",
                assignment.policy_id,
                assignment.status,
                assignment.source,
                assignment.note.as_deref().unwrap_or("")
            );
        }
        for applied in &snapshot.quote.applied_policies {
            println!("    + {} -> {:.2}", applied.name, applied.amount);
        }
    }
}
