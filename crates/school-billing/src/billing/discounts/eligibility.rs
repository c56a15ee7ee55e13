use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::domain::{ClassroomId, SchoolId, SchoolYearId, StudentId};
use super::engine::EngineError;
use super::repository::StudentDirectory;

/// Student attributes the criteria are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityContext {
    pub student_id: StudentId,
    pub school_id: SchoolId,
    pub school_year_id: SchoolYearId,
    /// Enrolled students sharing a fee-paying contact, the student included. Never below 1.
    pub sibling_count: u32,
    pub is_staff_child: bool,
    pub religion_id: Option<String>,
    pub religion_name: Option<String>,
    pub is_baptized: bool,
    pub classroom_ids: Vec<ClassroomId>,
}

/// Assemble the context from the directory. Students outside `school_id` read as missing.
pub fn build_context<D>(
    directory: &D,
    student_id: &StudentId,
    school_id: &SchoolId,
    school_year_id: &SchoolYearId,
) -> Result<EligibilityContext, EngineError>
where
    D: StudentDirectory + ?Sized,
{
    let student = directory
        .student(student_id)?
        .filter(|record| &record.school_id == school_id)
        .ok_or_else(|| EngineError::StudentNotFound(student_id.clone()))?;

    let payers = directory.fee_payers(student_id)?;
    let contact_ids: Vec<_> = payers
        .iter()
        .map(|link| link.contact_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let user_ids: Vec<_> = payers
        .iter()
        .filter_map(|link| link.user_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut sibling_count = 1;
    if !contact_ids.is_empty() {
        let linked: Vec<_> = directory
            .students_paid_by(&contact_ids)?
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !linked.is_empty() {
            let enrolled: BTreeSet<_> = directory
                .enrollments(school_id, school_year_id, &linked)?
                .into_iter()
                .map(|enrollment| enrollment.student_id)
                .collect();
            sibling_count = (enrolled.len() as u32).max(1);
        }
    }

    let is_staff_child = !user_ids.is_empty() && directory.has_staff_member(school_id, &user_ids)?;

    let classroom_ids = directory
        .enrollments(school_id, school_year_id, std::slice::from_ref(student_id))?
        .into_iter()
        .map(|enrollment| enrollment.classroom_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    Ok(EligibilityContext {
        student_id: student.id,
        school_id: school_id.clone(),
        school_year_id: school_year_id.clone(),
        sibling_count,
        is_staff_child,
        religion_id: student.religion_id,
        religion_name: student.religion_name,
        is_baptized: student.is_baptized,
        classroom_ids,
    })
}
