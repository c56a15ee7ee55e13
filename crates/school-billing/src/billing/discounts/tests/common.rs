use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use crate::billing::discounts::domain::{
    AssignmentSource, AssignmentWrite, ClassroomId, ContactId, ContactLink, CriterionType,
    DiscountAssignment, DiscountPolicy, Enrollment, PolicyFields, PolicyId, SchoolId,
    SchoolYearId, StudentId, StudentRecord, TenantContext, UserId,
};
use crate::billing::discounts::engine::{DiscountSyncEngine, EngineConfig};
use crate::billing::discounts::repository::{
    DiscountRepository, RepositoryError, StudentDirectory, UpsertMode, UpsertOutcome,
};
use crate::billing::discounts::{discount_router, DiscountPolicyService};

pub(super) const SCHOOL: &str = "school-north";
pub(super) const OTHER_SCHOOL: &str = "school-south";
pub(super) const YEAR: &str = "year-2025";

pub(super) fn tenant() -> TenantContext {
    TenantContext::new(SCHOOL, YEAR)
}

pub(super) fn other_tenant() -> TenantContext {
    TenantContext::new(OTHER_SCHOOL, YEAR)
}

pub(super) fn fields(name: &str, criterion: CriterionType, config: Option<Value>) -> PolicyFields {
    let mut fields = PolicyFields::new(name, criterion, 10.0);
    fields.criterion_config = config;
    fields
}

/// Policy row stored as-is, bypassing validation.
pub(super) fn raw_policy(id: &str, criterion_type: &str, config: Option<Value>) -> DiscountPolicy {
    let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let mut policy = DiscountPolicy::from_fields(
        PolicyId::from(id),
        SchoolId::from(SCHOOL),
        PolicyFields::new(id, CriterionType::Always, 10.0),
        created,
    );
    policy.criterion_type = criterion_type.to_string();
    policy.criterion_config = config;
    policy
}

#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    policies: Arc<Mutex<BTreeMap<PolicyId, DiscountPolicy>>>,
    assignments: Arc<Mutex<BTreeMap<(PolicyId, StudentId), DiscountAssignment>>>,
    writes: Arc<AtomicUsize>,
    failing_policy: Arc<Mutex<Option<PolicyId>>>,
}

impl MemoryRepository {
    /// Assignment rows written or deleted since creation.
    pub(super) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(super) fn seed_policy(&self, policy: DiscountPolicy) {
        self.policies
            .lock()
            .expect("repository mutex poisoned")
            .insert(policy.id.clone(), policy);
    }

    pub(super) fn assignment(
        &self,
        policy_id: &PolicyId,
        student_id: &StudentId,
    ) -> Option<DiscountAssignment> {
        self.assignments
            .lock()
            .expect("repository mutex poisoned")
            .get(&(policy_id.clone(), student_id.clone()))
            .cloned()
    }

    pub(super) fn all_assignments(&self) -> Vec<DiscountAssignment> {
        self.assignments
            .lock()
            .expect("repository mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub(super) fn fail_writes_for(&self, policy_id: &PolicyId) {
        *self.failing_policy.lock().expect("repository mutex poisoned") = Some(policy_id.clone());
    }

    fn check_writable(&self, policy_id: &PolicyId) -> Result<(), RepositoryError> {
        let failing = self.failing_policy.lock().expect("repository mutex poisoned");
        if failing.as_ref() == Some(policy_id) {
            return Err(RepositoryError::Unavailable("write rejected".to_string()));
        }
        Ok(())
    }
}

impl DiscountRepository for MemoryRepository {
    fn insert_policy(&self, policy: DiscountPolicy) -> Result<DiscountPolicy, RepositoryError> {
        let mut guard = self.policies.lock().expect("repository mutex poisoned");
        if guard.contains_key(&policy.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    fn replace_policy(&self, policy: DiscountPolicy) -> Result<DiscountPolicy, RepositoryError> {
        let mut guard = self.policies.lock().expect("repository mutex poisoned");
        if !guard.contains_key(&policy.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    fn fetch_policy(&self, id: &PolicyId) -> Result<Option<DiscountPolicy>, RepositoryError> {
        let guard = self.policies.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn policies_for_school(
        &self,
        school_id: &SchoolId,
    ) -> Result<Vec<DiscountPolicy>, RepositoryError> {
        let guard = self.policies.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|policy| &policy.school_id == school_id)
            .cloned()
            .collect())
    }

    fn delete_policy(&self, id: &PolicyId) -> Result<(), RepositoryError> {
        let mut policies = self.policies.lock().expect("repository mutex poisoned");
        if policies.remove(id).is_none() {
            return Err(RepositoryError::NotFound);
        }
        self.assignments
            .lock()
            .expect("repository mutex poisoned")
            .retain(|(policy_id, _), _| policy_id != id);
        Ok(())
    }

    fn fetch_assignment(
        &self,
        policy_id: &PolicyId,
        student_id: &StudentId,
    ) -> Result<Option<DiscountAssignment>, RepositoryError> {
        Ok(self.assignment(policy_id, student_id))
    }

    fn assignments_for_policy(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Vec<DiscountAssignment>, RepositoryError> {
        let guard = self.assignments.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|assignment| &assignment.policy_id == policy_id)
            .cloned()
            .collect())
    }

    fn assignments_for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<DiscountAssignment>, RepositoryError> {
        let guard = self.assignments.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|assignment| &assignment.student_id == student_id)
            .cloned()
            .collect())
    }

    fn upsert_assignment(
        &self,
        write: AssignmentWrite,
        mode: UpsertMode,
    ) -> Result<UpsertOutcome, RepositoryError> {
        self.check_writable(&write.policy_id)?;
        let mut guard = self.assignments.lock().expect("repository mutex poisoned");
        let key = (write.policy_id.clone(), write.student_id.clone());
        let previous = guard.get(&key).cloned();
        if let Some(existing) = &previous {
            if mode == UpsertMode::PreserveManual && existing.source == AssignmentSource::Manual {
                return Ok(UpsertOutcome::HeldByManual(existing.clone()));
            }
        }
        let assignment = write.into_assignment(previous.as_ref());
        guard.insert(key, assignment.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(UpsertOutcome::Written(assignment))
    }

    fn delete_assignment(
        &self,
        policy_id: &PolicyId,
        student_id: &StudentId,
        source: AssignmentSource,
    ) -> Result<Option<DiscountAssignment>, RepositoryError> {
        self.check_writable(policy_id)?;
        let mut guard = self.assignments.lock().expect("repository mutex poisoned");
        let key = (policy_id.clone(), student_id.clone());
        match guard.get(&key) {
            Some(existing) if existing.source == source => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(guard.remove(&key))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Default)]
struct DirectoryState {
    students: HashMap<StudentId, StudentRecord>,
    payers: Vec<(StudentId, ContactLink)>,
    enrollments: Vec<(SchoolId, Enrollment)>,
    staff: Vec<(SchoolId, UserId)>,
}

#[derive(Default, Clone)]
pub(super) struct MemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl MemoryDirectory {
    pub(super) fn add_student(&self, id: &str, school: &str) -> StudentId {
        let student_id = StudentId::from(id);
        self.state
            .lock()
            .expect("directory mutex poisoned")
            .students
            .insert(
                student_id.clone(),
                StudentRecord {
                    id: student_id.clone(),
                    school_id: SchoolId::from(school),
                    religion_id: None,
                    religion_name: None,
                    is_baptized: false,
                },
            );
        student_id
    }

    pub(super) fn set_religion(&self, student: &StudentId, id: &str, name: &str, baptized: bool) {
        let mut state = self.state.lock().expect("directory mutex poisoned");
        if let Some(record) = state.students.get_mut(student) {
            record.religion_id = Some(id.to_string());
            record.religion_name = Some(name.to_string());
            record.is_baptized = baptized;
        }
    }

    pub(super) fn link_payer(&self, student: &StudentId, contact: &str, user: Option<&str>) {
        self.state
            .lock()
            .expect("directory mutex poisoned")
            .payers
            .push((
                student.clone(),
                ContactLink {
                    contact_id: ContactId::from(contact),
                    user_id: user.map(UserId::from),
                },
            ));
    }

    pub(super) fn enroll(&self, student: &StudentId, school: &str, classroom: &str) {
        self.state
            .lock()
            .expect("directory mutex poisoned")
            .enrollments
            .push((
                SchoolId::from(school),
                Enrollment {
                    student_id: student.clone(),
                    classroom_id: ClassroomId::from(classroom),
                    school_year_id: SchoolYearId::from(YEAR),
                },
            ));
    }

    pub(super) fn unenroll(&self, student: &StudentId) {
        self.state
            .lock()
            .expect("directory mutex poisoned")
            .enrollments
            .retain(|(_, enrollment)| &enrollment.student_id != student);
    }

    pub(super) fn add_staff(&self, school: &str, user: &str) {
        self.state
            .lock()
            .expect("directory mutex poisoned")
            .staff
            .push((SchoolId::from(school), UserId::from(user)));
    }

    /// `count` enrolled students in `SCHOOL` sharing one fee-paying contact.
    pub(super) fn family(&self, prefix: &str, count: usize) -> Vec<StudentId> {
        (0..count)
            .map(|index| {
                let student = self.add_student(&format!("{prefix}-{index}"), SCHOOL);
                self.link_payer(&student, &format!("{prefix}-parent"), None);
                self.enroll(&student, SCHOOL, "grade-3");
                student
            })
            .collect()
    }
}

impl StudentDirectory for MemoryDirectory {
    fn student(&self, id: &StudentId) -> Result<Option<StudentRecord>, RepositoryError> {
        let state = self.state.lock().expect("directory mutex poisoned");
        Ok(state.students.get(id).cloned())
    }

    fn fee_payers(&self, student_id: &StudentId) -> Result<Vec<ContactLink>, RepositoryError> {
        let state = self.state.lock().expect("directory mutex poisoned");
        Ok(state
            .payers
            .iter()
            .filter(|(student, _)| student == student_id)
            .map(|(_, link)| link.clone())
            .collect())
    }

    fn students_paid_by(&self, contacts: &[ContactId]) -> Result<Vec<StudentId>, RepositoryError> {
        let state = self.state.lock().expect("directory mutex poisoned");
        Ok(state
            .payers
            .iter()
            .filter(|(_, link)| contacts.contains(&link.contact_id))
            .map(|(student, _)| student.clone())
            .collect())
    }

    fn enrollments(
        &self,
        school_id: &SchoolId,
        school_year_id: &SchoolYearId,
        students: &[StudentId],
    ) -> Result<Vec<Enrollment>, RepositoryError> {
        let state = self.state.lock().expect("directory mutex poisoned");
        Ok(state
            .enrollments
            .iter()
            .filter(|(school, enrollment)| {
                school == school_id
                    && &enrollment.school_year_id == school_year_id
                    && students.contains(&enrollment.student_id)
            })
            .map(|(_, enrollment)| enrollment.clone())
            .collect())
    }

    fn has_staff_member(
        &self,
        school_id: &SchoolId,
        users: &[UserId],
    ) -> Result<bool, RepositoryError> {
        let state = self.state.lock().expect("directory mutex poisoned");
        Ok(state
            .staff
            .iter()
            .any(|(school, user)| school == school_id && users.contains(user)))
    }
}

pub(super) struct Harness {
    pub(super) repository: Arc<MemoryRepository>,
    pub(super) directory: Arc<MemoryDirectory>,
    pub(super) service: Arc<DiscountPolicyService<MemoryRepository, MemoryDirectory>>,
}

pub(super) fn harness() -> Harness {
    let repository = Arc::new(MemoryRepository::default());
    let directory = Arc::new(MemoryDirectory::default());
    let service = Arc::new(DiscountPolicyService::new(
        repository.clone(),
        directory.clone(),
        EngineConfig::default(),
    ));
    Harness {
        repository,
        directory,
        service,
    }
}

impl Harness {
    pub(super) fn engine(&self) -> DiscountSyncEngine<MemoryRepository, MemoryDirectory> {
        DiscountSyncEngine::new(
            self.repository.clone(),
            self.directory.clone(),
            EngineConfig::default(),
        )
    }

    pub(super) fn create(&self, fields: PolicyFields) -> DiscountPolicy {
        self.service
            .create_policy(&tenant(), fields)
            .expect("policy created")
    }

    pub(super) fn router(&self) -> axum::Router {
        discount_router(self.service.clone())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
