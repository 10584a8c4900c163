use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Grade,
    Section,
    Student,
    Teacher,
    Subject,
    TimetableEntry,
    AttendanceRecord,
    Settings,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Grade => "grade",
            Self::Section => "section",
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Subject => "subject",
            Self::TimetableEntry => "timetable entry",
            Self::AttendanceRecord => "attendance record",
            Self::Settings => "settings",
        }
    }

    /// Prefix used by id allocators that produce readable ids.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::User => "usr",
            Self::Grade => "grd",
            Self::Section => "sec",
            Self::Student => "stu",
            Self::Teacher => "tch",
            Self::Subject => "sub",
            Self::TimetableEntry => "tte",
            Self::AttendanceRecord => "att",
            Self::Settings => "set",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SystemAdmin,
    Management,
    Teacher,
    Student,
    Parent,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemAdmin => "system_admin",
            Self::Management => "management",
            Self::Teacher => "teacher",
            Self::Student => "student",
            Self::Parent => "parent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "system_admin" => Ok(Self::SystemAdmin),
            "management" => Ok(Self::Management),
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            "parent" => Ok(Self::Parent),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGrade {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GradePatch {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub name: String,
    pub grade_id: String,
    pub room_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSection {
    pub name: String,
    pub grade_id: String,
    #[serde(default)]
    pub room_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SectionPatch {
    pub name: Option<String>,
    pub grade_id: Option<String>,
    pub room_number: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    #[default]
    Active,
    Inactive,
    Graduated,
    Transferred,
}

impl StudentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Graduated => "graduated",
            Self::Transferred => "transferred",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "graduated" => Some(Self::Graduated),
            "transferred" => Some(Self::Transferred),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    /// Display code shown on rosters and report cards, e.g. "STU-2024-017".
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub section_id: String,
    pub roll_number: u32,
    pub status: StudentStatus,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub section_id: String,
    pub roll_number: u32,
    #[serde(default)]
    pub status: StudentStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StudentPatch {
    pub student_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub section_id: Option<String>,
    pub roll_number: Option<u32>,
    pub status: Option<StudentStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub subject_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTeacher {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub subject_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TeacherPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub subject_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubject {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubjectPatch {
    pub name: Option<String>,
    pub code: Option<String>,
}

/// One cell of a section's weekly timetable.
///
/// `day_of_week` uses the same indexing as [`SchoolSettings::working_days`]:
/// Sunday = 0, Monday = 1, ... Saturday = 6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableEntry {
    pub id: String,
    pub section_id: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub time_slot_id: String,
    pub day_of_week: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTimetableEntry {
    pub section_id: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub time_slot_id: String,
    pub day_of_week: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimetableEntryPatch {
    pub section_id: Option<String>,
    pub subject_id: Option<String>,
    pub teacher_id: Option<String>,
    pub time_slot_id: Option<String>,
    pub day_of_week: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Morning,
    Afternoon,
}

impl Session {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "morning" => Some(Self::Morning),
            "afternoon" => Some(Self::Afternoon),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub date: NaiveDate,
    pub session: Session,
    pub status: AttendanceStatus,
    pub marked_by: String,
}

impl AttendanceRecord {
    pub fn key(&self) -> (&str, NaiveDate, Session) {
        (self.student_id.as_str(), self.date, self.session)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAttendanceRecord {
    pub student_id: String,
    pub date: NaiveDate,
    pub session: Session,
    pub status: AttendanceStatus,
    pub marked_by: String,
}

impl NewAttendanceRecord {
    pub fn key(&self) -> (&str, NaiveDate, Session) {
        (self.student_id.as_str(), self.date, self.session)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolSettings {
    pub name: String,
    pub address: String,
    /// Index 0 is Sunday.
    pub working_days: [bool; 7],
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub period_duration: u32,
    pub interval_duration: u32,
    pub lunch_break_duration: u32,
    #[serde(with = "hhmm")]
    pub lunch_break_start: NaiveTime,
}

impl Default for SchoolSettings {
    fn default() -> Self {
        Self {
            name: "School".to_string(),
            address: String::new(),
            working_days: [false, true, true, true, true, true, false],
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            end_time: NaiveTime::from_hms_opt(15, 0, 0).unwrap_or_default(),
            period_duration: 45,
            interval_duration: 5,
            lunch_break_duration: 30,
            lunch_break_start: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsPatch {
    pub name: Option<String>,
    pub address: Option<String>,
    pub working_days: Option<[bool; 7]>,
    #[serde(default, with = "hhmm::option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "hhmm::option")]
    pub end_time: Option<NaiveTime>,
    pub period_duration: Option<u32>,
    pub interval_duration: Option<u32>,
    pub lunch_break_duration: Option<u32>,
    #[serde(default, with = "hhmm::option")]
    pub lunch_break_start: Option<NaiveTime>,
}

/// Everything the domain store holds. This is the snapshot broadcast to
/// listeners and the unit the persistence adapter saves and loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainState {
    pub grades: Vec<Grade>,
    pub students: Vec<Student>,
    pub teachers: Vec<Teacher>,
    pub subjects: Vec<Subject>,
    pub timetable: Vec<TimetableEntry>,
    pub attendance: Vec<AttendanceRecord>,
    pub settings: SchoolSettings,
}

impl DomainState {
    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.grades
            .iter()
            .flat_map(|g| g.sections.iter())
            .find(|s| s.id == section_id)
    }
}

/// `HH:MM` wall-clock times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn parse(s: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(s.trim(), FORMAT).ok()
    }

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("expected HH:MM, got {raw}")))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => super::serialize(t, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            match raw {
                None => Ok(None),
                Some(raw) => super::parse(&raw).map(Some).ok_or_else(|| {
                    serde::de::Error::custom(format!("expected HH:MM, got {raw}"))
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_serialize_times_as_hhmm() {
        let v = serde_json::to_value(SchoolSettings::default()).expect("serialize");
        assert_eq!(v["startTime"], "08:00");
        assert_eq!(v["lunchBreakStart"], "12:00");
        assert_eq!(v["workingDays"][0], false);
        assert_eq!(v["workingDays"][1], true);
    }

    #[test]
    fn settings_patch_parses_partial_times() {
        let p: SettingsPatch =
            serde_json::from_value(json!({ "startTime": "07:30" })).expect("patch");
        assert_eq!(p.start_time, NaiveTime::from_hms_opt(7, 30, 0));
        assert_eq!(p.end_time, None);

        let bad = serde_json::from_value::<SettingsPatch>(json!({ "startTime": "7h" }));
        assert!(bad.is_err());
    }

    #[test]
    fn patches_reject_unknown_fields() {
        let r = serde_json::from_value::<GradePatch>(json!({ "nmae": "typo" }));
        assert!(r.is_err());
    }

    #[test]
    fn roles_round_trip_through_strings() {
        for role in [
            Role::SystemAdmin,
            Role::Management,
            Role::Teacher,
            Role::Student,
            Role::Parent,
        ] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
            assert_eq!(
                serde_json::to_value(role).expect("serialize"),
                json!(role.as_str())
            );
        }
        assert!("principal".parse::<Role>().is_err());
    }
}
