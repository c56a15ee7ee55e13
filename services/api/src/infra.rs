use metrics_exporter_prometheus::PrometheusHandle;
use school_billing::billing::discounts::{
    AssignmentSource, AssignmentWrite, ClassroomId, ContactId, ContactLink, CriterionType,
    DiscountAssignment, DiscountPolicy, DiscountRepository, Enrollment, PolicyFields, PolicyId,
    RepositoryError, SchoolId, SchoolYearId, StudentDirectory, StudentId, StudentRecord,
    TenantContext, UpsertMode, UpsertOutcome, UserId, ValueType,
};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

type AssignmentKey = (PolicyId, StudentId);

#[derive(Default, Clone)]
pub(crate) struct InMemoryDiscountRepository {
    policies: Arc<Mutex<BTreeMap<PolicyId, DiscountPolicy>>>,
    assignments: Arc<Mutex<BTreeMap<AssignmentKey, DiscountAssignment>>>,
}

impl DiscountRepository for InMemoryDiscountRepository {
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
        if guard.contains_key(&policy.id) {
            guard.insert(policy.id.clone(), policy.clone());
            Ok(policy)
        } else {
            Err(RepositoryError::NotFound)
        }
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
        let mut assignments = self.assignments.lock().expect("repository mutex poisoned");
        assignments.retain(|(policy_id, _), _| policy_id != id);
        Ok(())
    }

    fn fetch_assignment(
        &self,
        policy_id: &PolicyId,
        student_id: &StudentId,
    ) -> Result<Option<DiscountAssignment>, RepositoryError> {
        let guard = self.assignments.lock().expect("repository mutex poisoned");
        Ok(guard.get(&(policy_id.clone(), student_id.clone())).cloned())
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
        let mut guard = self.assignments.lock().expect("repository mutex poisoned");
        let key = (write.policy_id.clone(), write.student_id.clone());
        let previous = guard.get(&key);
        if let Some(existing) = previous {
            if mode == UpsertMode::PreserveManual && existing.source == AssignmentSource::Manual {
                return Ok(UpsertOutcome::HeldByManual(existing.clone()));
            }
        }
        let assignment = write.into_assignment(previous);
        guard.insert(key, assignment.clone());
        Ok(UpsertOutcome::Written(assignment))
    }

    fn delete_assignment(
        &self,
        policy_id: &PolicyId,
        student_id: &StudentId,
        source: AssignmentSource,
    ) -> Result<Option<DiscountAssignment>, RepositoryError> {
        let mut guard = self.assignments.lock().expect("repository mutex poisoned");
        let key = (policy_id.clone(), student_id.clone());
        let matches_source = guard
            .get(&key)
            .is_some_and(|existing| existing.source == source);
        Ok(if matches_source { guard.remove(&key) } else { None })
    }
}

#[derive(Default)]
struct Directory {
    students: HashMap<StudentId, StudentRecord>,
    fee_payers: Vec<(StudentId, ContactLink)>,
    enrollments: Vec<(SchoolId, Enrollment)>,
    staff: Vec<(SchoolId, UserId)>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryStudentDirectory {
    inner: Arc<Mutex<Directory>>,
}

impl InMemoryStudentDirectory {
    pub(crate) fn register_student(&self, school: &SchoolId, id: &str) -> StudentId {
        let student_id = StudentId::from(id);
        let mut guard = self.inner.lock().expect("directory mutex poisoned");
        guard.students.insert(
            student_id.clone(),
            StudentRecord {
                id: student_id.clone(),
                school_id: school.clone(),
                religion_id: None,
                religion_name: None,
                is_baptized: false,
            },
        );
        student_id
    }

    pub(crate) fn set_religion(&self, student: &StudentId, name: &str, baptized: bool) {
        let mut guard = self.inner.lock().expect("directory mutex poisoned");
        if let Some(record) = guard.students.get_mut(student) {
            record.religion_name = Some(name.to_string());
            record.is_baptized = baptized;
        }
    }

    pub(crate) fn link_fee_payer(&self, student: &StudentId, contact: &str, user: Option<&str>) {
        let mut guard = self.inner.lock().expect("directory mutex poisoned");
        guard.fee_payers.push((
            student.clone(),
            ContactLink {
                contact_id: ContactId::from(contact),
                user_id: user.map(UserId::from),
            },
        ));
    }

    pub(crate) fn enroll(&self, tenant: &TenantContext, student: &StudentId, classroom: &str) {
        let mut guard = self.inner.lock().expect("directory mutex poisoned");
        guard.enrollments.push((
            tenant.school_id.clone(),
            Enrollment {
                student_id: student.clone(),
                classroom_id: ClassroomId::from(classroom),
                school_year_id: tenant.school_year_id.clone(),
            },
        ));
    }

    pub(crate) fn add_staff_member(&self, school: &SchoolId, user: &str) {
        let mut guard = self.inner.lock().expect("directory mutex poisoned");
        guard.staff.push((school.clone(), UserId::from(user)));
    }

    /// Two siblings paid by a staff member plus an only child with a recorded religion.
    pub(crate) fn seed_demo_school(&self, tenant: &TenantContext) -> Vec<StudentId> {
        let school = &tenant.school_id;
        let elder = self.register_student(school, "stu-ana");
        let younger = self.register_student(school, "stu-ben");
        let only_child = self.register_student(school, "stu-caro");

        for sibling in [&elder, &younger] {
            self.link_fee_payer(sibling, "contact-garcia", Some("user-garcia"));
        }
        self.link_fee_payer(&only_child, "contact-okafor", None);
        self.add_staff_member(school, "user-garcia");
        self.set_religion(&only_child, "Catholic", true);

        self.enroll(tenant, &elder, "grade-6");
        self.enroll(tenant, &younger, "grade-2");
        self.enroll(tenant, &only_child, "grade-2");

        vec![elder, younger, only_child]
    }
}

impl StudentDirectory for InMemoryStudentDirectory {
    fn student(&self, id: &StudentId) -> Result<Option<StudentRecord>, RepositoryError> {
        let guard = self.inner.lock().expect("directory mutex poisoned");
        Ok(guard.students.get(id).cloned())
    }

    fn fee_payers(&self, student_id: &StudentId) -> Result<Vec<ContactLink>, RepositoryError> {
        let guard = self.inner.lock().expect("directory mutex poisoned");
        Ok(guard
            .fee_payers
            .iter()
            .filter(|(student, _)| student == student_id)
            .map(|(_, link)| link.clone())
            .collect())
    }

    fn students_paid_by(&self, contacts: &[ContactId]) -> Result<Vec<StudentId>, RepositoryError> {
        let guard = self.inner.lock().expect("directory mutex poisoned");
        Ok(guard
            .fee_payers
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
        let guard = self.inner.lock().expect("directory mutex poisoned");
        Ok(guard
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
        let guard = self.inner.lock().expect("directory mutex poisoned");
        Ok(guard
            .staff
            .iter()
            .any(|(school, user)| school == school_id && users.contains(user)))
    }
}

/// Sibling, staff and religion policies used by the demo and `serve --seed-demo`.
pub(crate) fn demo_policies() -> Vec<PolicyFields> {
    let mut siblings = PolicyFields::new("Sibling discount", CriterionType::SiblingCount, 10.0);
    siblings.criterion_config = Some(json!({ "minChildren": 2 }));
    siblings.priority = 10;

    let mut staff = PolicyFields::new("Staff family", CriterionType::StaffChild, 25.0);
    staff.max_amount = Some(400.0);
    staff.priority = 20;

    let mut parish = PolicyFields::new("Parish grant", CriterionType::Religion, 150.0);
    parish.value_type = ValueType::Fixed;
    parish.criterion_config = Some(json!({ "religionName": "catholic", "isBaptized": true }));
    parish.stackable = false;
    parish.priority = 30;

    vec![siblings, staff, parish]
}
