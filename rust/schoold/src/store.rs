use crate::error::{required_text, StoreError, StoreResult};
use crate::ids::IdAllocator;
use crate::model::{
    AttendanceRecord, DomainState, EntityKind, Grade, GradePatch, NewAttendanceRecord, NewGrade,
    NewSection, NewStudent, NewSubject, NewTeacher, NewTimetableEntry, SchoolSettings, Section,
    SectionPatch, Session, SettingsPatch, Student, StudentPatch, Subject, SubjectPatch, Teacher,
    TeacherPatch, TimetableEntry, TimetableEntryPatch,
};
use crate::observer::{ListenerId, Listeners};
use crate::views;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// What happens to records that point at a grade, section, student, teacher
/// or subject being deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Refuse the delete with `Conflict` while anything still refers to it.
    #[default]
    Restrict,
    /// Delete the dependents too.
    Cascade,
    /// Delete only the target and leave dangling references behind.
    Orphan,
}

impl DeletePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restrict => "restrict",
            Self::Cascade => "cascade",
            Self::Orphan => "orphan",
        }
    }
}

impl fmt::Display for DeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restrict" => Ok(Self::Restrict),
            "cascade" => Ok(Self::Cascade),
            "orphan" => Ok(Self::Orphan),
            other => Err(format!(
                "unknown delete policy {other:?} (expected restrict, cascade or orphan)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Added,
    Updated,
    Deleted,
    /// Bulk attendance: some records inserted, some updated in place.
    Marked,
    /// The whole state was swapped, e.g. after opening a workspace.
    Replaced,
}

/// Broadcast to listeners after every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// `None` when the whole state was replaced.
    pub kind: Option<EntityKind>,
    pub op: ChangeOp,
    pub ids: Vec<String>,
}

/// Counts of records removed by a delete, dependents included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Removed {
    pub grades: usize,
    pub sections: usize,
    pub students: usize,
    pub teachers: usize,
    pub subjects: usize,
    pub timetable_entries: usize,
    pub attendance_records: usize,
}

/// The in-process repository behind every console screen.
///
/// All mutations are synchronous. A successful one is visible to readers
/// immediately and is broadcast to listeners before the call returns; a
/// failed one leaves the state untouched.
pub struct DomainStore {
    state: DomainState,
    ids: Box<dyn IdAllocator>,
    policy: DeletePolicy,
    listeners: Listeners<dyn FnMut(&Change, &DomainState)>,
}

impl fmt::Debug for DomainStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainStore")
            .field("grades", &self.state.grades.len())
            .field("students", &self.state.students.len())
            .field("policy", &self.policy)
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl DomainStore {
    pub fn new(ids: impl IdAllocator + 'static) -> Self {
        Self {
            state: DomainState::default(),
            ids: Box::new(ids),
            policy: DeletePolicy::default(),
            listeners: Listeners::default(),
        }
    }

    pub fn with_policy(mut self, policy: DeletePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> DeletePolicy {
        self.policy
    }

    pub fn state(&self) -> &DomainState {
        &self.state
    }

    pub fn snapshot(&self) -> DomainState {
        self.state.clone()
    }

    pub fn replace_state(&mut self, state: DomainState) {
        self.state = state;
        self.emit(None, ChangeOp::Replaced, Vec::new());
    }

    pub fn subscribe(&mut self, f: impl FnMut(&Change, &DomainState) + 'static) -> ListenerId {
        self.listeners.subscribe(Box::new(f))
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn emit(&mut self, kind: Option<EntityKind>, op: ChangeOp, ids: Vec<String>) {
        debug!(kind = ?kind, op = ?op, ids = ?ids, "store change");
        let change = Change { kind, op, ids };
        for f in self.listeners.iter_mut() {
            f(&change, &self.state);
        }
    }

    // ---- reads ----

    pub fn grades(&self) -> &[Grade] {
        &self.state.grades
    }

    pub fn grade(&self, id: &str) -> Option<&Grade> {
        self.state.grades.iter().find(|g| g.id == id)
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.state.section(id)
    }

    pub fn students(&self) -> &[Student] {
        &self.state.students
    }

    pub fn student(&self, id: &str) -> Option<&Student> {
        self.state.students.iter().find(|s| s.id == id)
    }

    pub fn teachers(&self) -> &[Teacher] {
        &self.state.teachers
    }

    pub fn teacher(&self, id: &str) -> Option<&Teacher> {
        self.state.teachers.iter().find(|t| t.id == id)
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.state.subjects
    }

    pub fn subject(&self, id: &str) -> Option<&Subject> {
        self.state.subjects.iter().find(|s| s.id == id)
    }

    pub fn timetable(&self) -> &[TimetableEntry] {
        &self.state.timetable
    }

    pub fn entry(&self, id: &str) -> Option<&TimetableEntry> {
        self.state.timetable.iter().find(|e| e.id == id)
    }

    pub fn attendance(&self) -> &[AttendanceRecord] {
        &self.state.attendance
    }

    pub fn settings(&self) -> &SchoolSettings {
        &self.state.settings
    }

    // ---- grades ----

    pub fn add_grade(&mut self, new: NewGrade) -> StoreResult<Grade> {
        let name = required_text("name", &new.name)?;
        let grade = Grade {
            id: self.ids.next_id(EntityKind::Grade),
            name,
            sections: Vec::new(),
        };
        self.state.grades.push(grade.clone());
        self.emit(Some(EntityKind::Grade), ChangeOp::Added, vec![grade.id.clone()]);
        Ok(grade)
    }

    pub fn update_grade(&mut self, id: &str, patch: GradePatch) -> StoreResult<Grade> {
        let idx = self
            .state
            .grades
            .iter()
            .position(|g| g.id == id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Grade, id))?;
        let name = patch
            .name
            .as_deref()
            .map(|n| required_text("name", n))
            .transpose()?;

        let grade = &mut self.state.grades[idx];
        if let Some(name) = name {
            grade.name = name;
        }
        let out = grade.clone();
        self.emit(Some(EntityKind::Grade), ChangeOp::Updated, vec![out.id.clone()]);
        Ok(out)
    }

    /// Removes the grade together with its sections. Students, timetable
    /// entries and attendance of those sections follow the delete policy.
    pub fn delete_grade(&mut self, id: &str) -> StoreResult<Removed> {
        let idx = self
            .state
            .grades
            .iter()
            .position(|g| g.id == id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Grade, id))?;
        let section_ids: HashSet<String> = self.state.grades[idx]
            .sections
            .iter()
            .map(|s| s.id.clone())
            .collect();

        let mut removed = self.release_sections(EntityKind::Grade, id, &section_ids)?;
        let grade = self.state.grades.remove(idx);
        removed.grades = 1;
        removed.sections = grade.sections.len();
        self.emit(Some(EntityKind::Grade), ChangeOp::Deleted, vec![grade.id]);
        Ok(removed)
    }

    // ---- sections ----

    fn locate_section(&self, id: &str) -> Option<(usize, usize)> {
        self.state.grades.iter().enumerate().find_map(|(gi, g)| {
            g.sections
                .iter()
                .position(|s| s.id == id)
                .map(|si| (gi, si))
        })
    }

    fn grade_index(&self, grade_id: &str) -> StoreResult<usize> {
        self.state
            .grades
            .iter()
            .position(|g| g.id == grade_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Grade, grade_id))
    }

    fn check_section_name(&self, gi: usize, name: &str, exclude: Option<&str>) -> StoreResult<()> {
        let grade = &self.state.grades[gi];
        let clash = grade
            .sections
            .iter()
            .any(|s| Some(s.id.as_str()) != exclude && s.name.eq_ignore_ascii_case(name));
        if clash {
            return Err(StoreError::conflict(
                EntityKind::Section,
                format!("{} already has a section named {name}", grade.name),
            ));
        }
        Ok(())
    }

    /// Inserts into the sections of the grade named by `new.grade_id`.
    pub fn add_section(&mut self, new: NewSection) -> StoreResult<Section> {
        let name = required_text("name", &new.name)?;
        let gi = self.grade_index(&new.grade_id)?;
        self.check_section_name(gi, &name, None)?;

        let section = Section {
            id: self.ids.next_id(EntityKind::Section),
            name,
            grade_id: new.grade_id,
            room_number: new.room_number.trim().to_string(),
        };
        self.state.grades[gi].sections.push(section.clone());
        self.emit(
            Some(EntityKind::Section),
            ChangeOp::Added,
            vec![section.id.clone()],
        );
        Ok(section)
    }

    /// A patch naming another grade moves the section to the end of that
    /// grade's list.
    pub fn update_section(&mut self, id: &str, patch: SectionPatch) -> StoreResult<Section> {
        let (gi, si) = self
            .locate_section(id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Section, id))?;
        let mut next = self.state.grades[gi].sections[si].clone();
        if let Some(name) = patch.name.as_deref() {
            next.name = required_text("name", name)?;
        }
        if let Some(room) = patch.room_number.as_deref() {
            next.room_number = room.trim().to_string();
        }
        let target = match patch.grade_id {
            Some(grade_id) if grade_id != next.grade_id => {
                let ti = self.grade_index(&grade_id)?;
                next.grade_id = grade_id;
                ti
            }
            _ => gi,
        };
        self.check_section_name(target, &next.name, Some(id))?;

        if target == gi {
            self.state.grades[gi].sections[si] = next.clone();
        } else {
            self.state.grades[gi].sections.remove(si);
            self.state.grades[target].sections.push(next.clone());
        }
        self.emit(Some(EntityKind::Section), ChangeOp::Updated, vec![next.id.clone()]);
        Ok(next)
    }

    pub fn delete_section(&mut self, id: &str) -> StoreResult<Removed> {
        let (gi, si) = self
            .locate_section(id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Section, id))?;
        let section_ids = HashSet::from([id.to_string()]);
        let mut removed = self.release_sections(EntityKind::Section, id, &section_ids)?;
        let section = self.state.grades[gi].sections.remove(si);
        removed.sections = 1;
        self.emit(Some(EntityKind::Section), ChangeOp::Deleted, vec![section.id]);
        Ok(removed)
    }

    /// Applies the delete policy to everything hanging off `section_ids`.
    /// Nothing is touched when the policy refuses.
    fn release_sections(
        &mut self,
        kind: EntityKind,
        id: &str,
        section_ids: &HashSet<String>,
    ) -> StoreResult<Removed> {
        let student_ids: HashSet<String> = self
            .state
            .students
            .iter()
            .filter(|s| section_ids.contains(&s.section_id))
            .map(|s| s.id.clone())
            .collect();
        let entries = self
            .state
            .timetable
            .iter()
            .filter(|e| section_ids.contains(&e.section_id))
            .count();

        match self.policy {
            DeletePolicy::Orphan => Ok(Removed::default()),
            DeletePolicy::Restrict => {
                if student_ids.is_empty() && entries == 0 {
                    Ok(Removed::default())
                } else {
                    Err(StoreError::conflict(
                        kind,
                        format!(
                            "{id} still has {} students and {entries} timetable entries",
                            student_ids.len()
                        ),
                    ))
                }
            }
            DeletePolicy::Cascade => {
                let attendance_before = self.state.attendance.len();
                self.state
                    .attendance
                    .retain(|r| !student_ids.contains(&r.student_id));
                self.state
                    .students
                    .retain(|s| !section_ids.contains(&s.section_id));
                self.state
                    .timetable
                    .retain(|e| !section_ids.contains(&e.section_id));
                Ok(Removed {
                    students: student_ids.len(),
                    timetable_entries: entries,
                    attendance_records: attendance_before - self.state.attendance.len(),
                    ..Removed::default()
                })
            }
        }
    }

    // ---- students ----

    /// `kept_section` names a section id the student already held; it is
    /// accepted even when dangling under the orphan policy.
    fn check_student(
        &self,
        s: &Student,
        exclude: Option<&str>,
        kept_section: Option<&str>,
    ) -> StoreResult<()> {
        if s.roll_number == 0 {
            return Err(StoreError::invalid("rollNumber", "must be at least 1"));
        }
        if kept_section != Some(s.section_id.as_str())
            && self.state.section(&s.section_id).is_none()
        {
            return Err(StoreError::not_found(EntityKind::Section, &s.section_id));
        }
        for other in self
            .state
            .students
            .iter()
            .filter(|o| Some(o.id.as_str()) != exclude)
        {
            if other.student_id == s.student_id {
                return Err(StoreError::conflict(
                    EntityKind::Student,
                    format!("student code {} is already in use", s.student_id),
                ));
            }
            if other.section_id == s.section_id && other.roll_number == s.roll_number {
                return Err(StoreError::conflict(
                    EntityKind::Student,
                    format!(
                        "roll number {} is already taken in this section",
                        s.roll_number
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn add_student(&mut self, new: NewStudent) -> StoreResult<Student> {
        let mut student = Student {
            id: String::new(),
            student_id: required_text("studentId", &new.student_id)?,
            first_name: required_text("firstName", &new.first_name)?,
            last_name: required_text("lastName", &new.last_name)?,
            section_id: new.section_id,
            roll_number: new.roll_number,
            status: new.status,
        };
        self.check_student(&student, None, None)?;
        student.id = self.ids.next_id(EntityKind::Student);
        self.state.students.push(student.clone());
        self.emit(
            Some(EntityKind::Student),
            ChangeOp::Added,
            vec![student.id.clone()],
        );
        Ok(student)
    }

    pub fn update_student(&mut self, id: &str, patch: StudentPatch) -> StoreResult<Student> {
        let idx = self
            .state
            .students
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Student, id))?;
        let current = &self.state.students[idx];
        let kept_section = current.section_id.clone();
        let mut next = current.clone();
        if let Some(v) = patch.student_id.as_deref() {
            next.student_id = required_text("studentId", v)?;
        }
        if let Some(v) = patch.first_name.as_deref() {
            next.first_name = required_text("firstName", v)?;
        }
        if let Some(v) = patch.last_name.as_deref() {
            next.last_name = required_text("lastName", v)?;
        }
        if let Some(v) = patch.section_id {
            next.section_id = v;
        }
        if let Some(v) = patch.roll_number {
            next.roll_number = v;
        }
        if let Some(v) = patch.status {
            next.status = v;
        }
        self.check_student(&next, Some(id), Some(kept_section.as_str()))?;
        self.state.students[idx] = next.clone();
        self.emit(Some(EntityKind::Student), ChangeOp::Updated, vec![next.id.clone()]);
        Ok(next)
    }

    pub fn delete_student(&mut self, id: &str) -> StoreResult<Removed> {
        let idx = self
            .state
            .students
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Student, id))?;
        let records = self
            .state
            .attendance
            .iter()
            .filter(|r| r.student_id == id)
            .count();

        let mut removed = Removed::default();
        match self.policy {
            DeletePolicy::Restrict if records > 0 => {
                return Err(StoreError::conflict(
                    EntityKind::Student,
                    format!("{id} still has {records} attendance records"),
                ));
            }
            DeletePolicy::Cascade => {
                self.state.attendance.retain(|r| r.student_id != id);
                removed.attendance_records = records;
            }
            _ => {}
        }
        let student = self.state.students.remove(idx);
        removed.students = 1;
        self.emit(Some(EntityKind::Student), ChangeOp::Deleted, vec![student.id]);
        Ok(removed)
    }

    // ---- subjects ----

    fn check_subject_code(&self, code: &str, exclude: Option<&str>) -> StoreResult<()> {
        let clash = self
            .state
            .subjects
            .iter()
            .any(|s| Some(s.id.as_str()) != exclude && s.code.eq_ignore_ascii_case(code));
        if clash {
            return Err(StoreError::conflict(
                EntityKind::Subject,
                format!("subject code {code} is already in use"),
            ));
        }
        Ok(())
    }

    pub fn add_subject(&mut self, new: NewSubject) -> StoreResult<Subject> {
        let name = required_text("name", &new.name)?;
        let code = required_text("code", &new.code)?;
        self.check_subject_code(&code, None)?;
        let subject = Subject {
            id: self.ids.next_id(EntityKind::Subject),
            name,
            code,
        };
        self.state.subjects.push(subject.clone());
        self.emit(
            Some(EntityKind::Subject),
            ChangeOp::Added,
            vec![subject.id.clone()],
        );
        Ok(subject)
    }

    pub fn update_subject(&mut self, id: &str, patch: SubjectPatch) -> StoreResult<Subject> {
        let idx = self
            .state
            .subjects
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Subject, id))?;
        let mut next = self.state.subjects[idx].clone();
        if let Some(v) = patch.name.as_deref() {
            next.name = required_text("name", v)?;
        }
        if let Some(v) = patch.code.as_deref() {
            next.code = required_text("code", v)?;
            self.check_subject_code(&next.code, Some(id))?;
        }
        self.state.subjects[idx] = next.clone();
        self.emit(Some(EntityKind::Subject), ChangeOp::Updated, vec![next.id.clone()]);
        Ok(next)
    }

    /// Timetable entries and teacher subject lists that reference the subject
    /// follow the delete policy.
    pub fn delete_subject(&mut self, id: &str) -> StoreResult<Removed> {
        let idx = self
            .state
            .subjects
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Subject, id))?;
        let entries = self
            .state
            .timetable
            .iter()
            .filter(|e| e.subject_id == id)
            .count();
        let teachers = self
            .state
            .teachers
            .iter()
            .filter(|t| t.subject_ids.iter().any(|s| s == id))
            .count();

        let mut removed = Removed::default();
        match self.policy {
            DeletePolicy::Restrict if entries > 0 || teachers > 0 => {
                return Err(StoreError::conflict(
                    EntityKind::Subject,
                    format!("{id} is used by {entries} timetable entries and {teachers} teachers"),
                ));
            }
            DeletePolicy::Cascade => {
                self.state.timetable.retain(|e| e.subject_id != id);
                for t in self.state.teachers.iter_mut() {
                    t.subject_ids.retain(|s| s != id);
                }
                removed.timetable_entries = entries;
            }
            _ => {}
        }
        let subject = self.state.subjects.remove(idx);
        removed.subjects = 1;
        self.emit(Some(EntityKind::Subject), ChangeOp::Deleted, vec![subject.id]);
        Ok(removed)
    }

    // ---- teachers ----

    /// Subject ids in `kept_subjects` were already linked and are not
    /// re-checked.
    fn check_teacher(
        &self,
        t: &Teacher,
        exclude: Option<&str>,
        kept_subjects: &[String],
    ) -> StoreResult<()> {
        if !t.email.contains('@') {
            return Err(StoreError::invalid("email", "must be an email address"));
        }
        let clash = self
            .state
            .teachers
            .iter()
            .any(|o| Some(o.id.as_str()) != exclude && o.email.eq_ignore_ascii_case(&t.email));
        if clash {
            return Err(StoreError::conflict(
                EntityKind::Teacher,
                format!("email {} is already in use", t.email),
            ));
        }
        if let Some(missing) = t
            .subject_ids
            .iter()
            .find(|sid| !kept_subjects.contains(*sid) && self.subject(sid).is_none())
        {
            return Err(StoreError::not_found(EntityKind::Subject, missing));
        }
        Ok(())
    }

    fn dedup_ids(ids: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        ids.into_iter().filter(|s| seen.insert(s.clone())).collect()
    }

    pub fn add_teacher(&mut self, new: NewTeacher) -> StoreResult<Teacher> {
        let mut teacher = Teacher {
            id: String::new(),
            name: required_text("name", &new.name)?,
            email: required_text("email", &new.email)?,
            subject_ids: Self::dedup_ids(new.subject_ids),
        };
        self.check_teacher(&teacher, None, &[])?;
        teacher.id = self.ids.next_id(EntityKind::Teacher);
        self.state.teachers.push(teacher.clone());
        self.emit(
            Some(EntityKind::Teacher),
            ChangeOp::Added,
            vec![teacher.id.clone()],
        );
        Ok(teacher)
    }

    pub fn update_teacher(&mut self, id: &str, patch: TeacherPatch) -> StoreResult<Teacher> {
        let idx = self
            .state
            .teachers
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Teacher, id))?;
        let kept_subjects = self.state.teachers[idx].subject_ids.clone();
        let mut next = self.state.teachers[idx].clone();
        if let Some(v) = patch.name.as_deref() {
            next.name = required_text("name", v)?;
        }
        if let Some(v) = patch.email.as_deref() {
            next.email = required_text("email", v)?;
        }
        if let Some(v) = patch.subject_ids {
            next.subject_ids = Self::dedup_ids(v);
        }
        self.check_teacher(&next, Some(id), &kept_subjects)?;
        self.state.teachers[idx] = next.clone();
        self.emit(Some(EntityKind::Teacher), ChangeOp::Updated, vec![next.id.clone()]);
        Ok(next)
    }

    pub fn delete_teacher(&mut self, id: &str) -> StoreResult<Removed> {
        let idx = self
            .state
            .teachers
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Teacher, id))?;
        let entries = self
            .state
            .timetable
            .iter()
            .filter(|e| e.teacher_id == id)
            .count();

        let mut removed = Removed::default();
        match self.policy {
            DeletePolicy::Restrict if entries > 0 => {
                return Err(StoreError::conflict(
                    EntityKind::Teacher,
                    format!("{id} still teaches {entries} timetable entries"),
                ));
            }
            DeletePolicy::Cascade => {
                self.state.timetable.retain(|e| e.teacher_id != id);
                removed.timetable_entries = entries;
            }
            _ => {}
        }
        let teacher = self.state.teachers.remove(idx);
        removed.teachers = 1;
        self.emit(Some(EntityKind::Teacher), ChangeOp::Deleted, vec![teacher.id]);
        Ok(removed)
    }

    // ---- timetable ----

    fn check_entry(&self, e: &TimetableEntry, exclude: Option<&str>) -> StoreResult<()> {
        let dow = e.day_of_week as usize;
        if dow > 6 {
            return Err(StoreError::invalid(
                "dayOfWeek",
                "must be between 0 (Sunday) and 6 (Saturday)",
            ));
        }
        if !self.state.settings.working_days[dow] {
            return Err(StoreError::invalid("dayOfWeek", "not a working day"));
        }
        if self.state.section(&e.section_id).is_none() {
            return Err(StoreError::not_found(EntityKind::Section, &e.section_id));
        }
        if self.subject(&e.subject_id).is_none() {
            return Err(StoreError::not_found(EntityKind::Subject, &e.subject_id));
        }
        if self.teacher(&e.teacher_id).is_none() {
            return Err(StoreError::not_found(EntityKind::Teacher, &e.teacher_id));
        }
        if !views::is_period_slot(&self.state.settings, &e.time_slot_id) {
            return Err(StoreError::invalid(
                "timeSlotId",
                format!("{} is not a teaching period", e.time_slot_id),
            ));
        }

        let same_time = |o: &&TimetableEntry| {
            Some(o.id.as_str()) != exclude
                && o.day_of_week == e.day_of_week
                && o.time_slot_id == e.time_slot_id
        };
        if let Some(taken) = self
            .state
            .timetable
            .iter()
            .filter(same_time)
            .find(|o| o.section_id == e.section_id)
        {
            return Err(StoreError::conflict(
                EntityKind::TimetableEntry,
                format!(
                    "section {} already has entry {} on day {} in {}",
                    e.section_id, taken.id, e.day_of_week, e.time_slot_id
                ),
            ));
        }
        if let Some(busy) = self
            .state
            .timetable
            .iter()
            .filter(same_time)
            .find(|o| o.teacher_id == e.teacher_id)
        {
            return Err(StoreError::conflict(
                EntityKind::TimetableEntry,
                format!(
                    "teacher {} is already teaching section {} on day {} in {}",
                    e.teacher_id, busy.section_id, e.day_of_week, e.time_slot_id
                ),
            ));
        }
        Ok(())
    }

    pub fn add_timetable_entry(&mut self, new: NewTimetableEntry) -> StoreResult<TimetableEntry> {
        let mut entry = TimetableEntry {
            id: String::new(),
            section_id: new.section_id,
            subject_id: new.subject_id,
            teacher_id: new.teacher_id,
            time_slot_id: new.time_slot_id,
            day_of_week: new.day_of_week,
        };
        self.check_entry(&entry, None)?;
        entry.id = self.ids.next_id(EntityKind::TimetableEntry);
        self.state.timetable.push(entry.clone());
        self.emit(
            Some(EntityKind::TimetableEntry),
            ChangeOp::Added,
            vec![entry.id.clone()],
        );
        Ok(entry)
    }

    pub fn update_timetable_entry(
        &mut self,
        id: &str,
        patch: TimetableEntryPatch,
    ) -> StoreResult<TimetableEntry> {
        let idx = self
            .state
            .timetable
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| StoreError::not_found(EntityKind::TimetableEntry, id))?;
        let mut next = self.state.timetable[idx].clone();
        if let Some(v) = patch.section_id {
            next.section_id = v;
        }
        if let Some(v) = patch.subject_id {
            next.subject_id = v;
        }
        if let Some(v) = patch.teacher_id {
            next.teacher_id = v;
        }
        if let Some(v) = patch.time_slot_id {
            next.time_slot_id = v;
        }
        if let Some(v) = patch.day_of_week {
            next.day_of_week = v;
        }
        self.check_entry(&next, Some(id))?;
        self.state.timetable[idx] = next.clone();
        self.emit(
            Some(EntityKind::TimetableEntry),
            ChangeOp::Updated,
            vec![next.id.clone()],
        );
        Ok(next)
    }

    pub fn delete_timetable_entry(&mut self, id: &str) -> StoreResult<Removed> {
        let idx = self
            .state
            .timetable
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| StoreError::not_found(EntityKind::TimetableEntry, id))?;
        let entry = self.state.timetable.remove(idx);
        self.emit(
            Some(EntityKind::TimetableEntry),
            ChangeOp::Deleted,
            vec![entry.id],
        );
        Ok(Removed {
            timetable_entries: 1,
            ..Removed::default()
        })
    }

    // ---- attendance ----

    /// Records a batch of marks. Every new record gets its own fresh id; a
    /// mark for a (student, date, session) that already has a record updates
    /// that record in place. The batch is all-or-nothing.
    pub fn mark_attendance(
        &mut self,
        records: Vec<NewAttendanceRecord>,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch_keys = HashSet::new();
        for r in &records {
            if self.student(&r.student_id).is_none() {
                return Err(StoreError::not_found(EntityKind::Student, &r.student_id));
            }
            required_text("markedBy", &r.marked_by)?;
            if !batch_keys.insert(r.key()) {
                return Err(StoreError::conflict(
                    EntityKind::AttendanceRecord,
                    format!(
                        "{} is marked twice for {} {}",
                        r.student_id,
                        r.date,
                        r.session.as_str()
                    ),
                ));
            }
        }

        let mut existing: HashMap<(String, NaiveDate, Session), usize> = self
            .state
            .attendance
            .iter()
            .enumerate()
            .map(|(i, r)| ((r.student_id.clone(), r.date, r.session), i))
            .collect();

        let mut out = Vec::with_capacity(records.len());
        for r in records {
            let key = (r.student_id.clone(), r.date, r.session);
            let marked_by = r.marked_by.trim().to_string();
            match existing.get(&key) {
                Some(&i) => {
                    let rec = &mut self.state.attendance[i];
                    rec.status = r.status;
                    rec.marked_by = marked_by;
                    out.push(rec.clone());
                }
                None => {
                    let rec = AttendanceRecord {
                        id: self.ids.next_id(EntityKind::AttendanceRecord),
                        student_id: r.student_id,
                        date: r.date,
                        session: r.session,
                        status: r.status,
                        marked_by,
                    };
                    existing.insert(key, self.state.attendance.len());
                    self.state.attendance.push(rec.clone());
                    out.push(rec);
                }
            }
        }

        let ids = out.iter().map(|r| r.id.clone()).collect();
        self.emit(Some(EntityKind::AttendanceRecord), ChangeOp::Marked, ids);
        Ok(out)
    }

    // ---- settings ----

    /// Only the fields present in the patch change.
    pub fn update_settings(&mut self, patch: SettingsPatch) -> StoreResult<SchoolSettings> {
        let mut next = self.state.settings.clone();
        if let Some(v) = patch.name.as_deref() {
            next.name = required_text("name", v)?;
        }
        if let Some(v) = patch.address {
            next.address = v.trim().to_string();
        }
        if let Some(v) = patch.working_days {
            next.working_days = v;
        }
        if let Some(v) = patch.start_time {
            next.start_time = v;
        }
        if let Some(v) = patch.end_time {
            next.end_time = v;
        }
        if let Some(v) = patch.period_duration {
            next.period_duration = v;
        }
        if let Some(v) = patch.interval_duration {
            next.interval_duration = v;
        }
        if let Some(v) = patch.lunch_break_duration {
            next.lunch_break_duration = v;
        }
        if let Some(v) = patch.lunch_break_start {
            next.lunch_break_start = v;
        }
        validate_settings(&next)?;

        self.state.settings = next.clone();
        self.emit(Some(EntityKind::Settings), ChangeOp::Updated, Vec::new());
        Ok(next)
    }
}

pub fn validate_settings(s: &SchoolSettings) -> StoreResult<()> {
    if s.start_time >= s.end_time {
        return Err(StoreError::invalid("endTime", "must be after startTime"));
    }
    if s.period_duration == 0 {
        return Err(StoreError::invalid("periodDuration", "must be greater than 0"));
    }
    let day = views::minutes(s.end_time) - views::minutes(s.start_time);
    for (field, value) in [
        ("periodDuration", s.period_duration),
        ("intervalDuration", s.interval_duration),
        ("lunchBreakDuration", s.lunch_break_duration),
    ] {
        if value > day {
            return Err(StoreError::invalid(
                field,
                format!("must not exceed the school day ({day} minutes)"),
            ));
        }
    }
    if !s.working_days.iter().any(|d| *d) {
        return Err(StoreError::invalid(
            "workingDays",
            "at least one day must be a working day",
        ));
    }
    Ok(())
}
