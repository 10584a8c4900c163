pub mod attendance;
pub mod backup;
pub mod core;
pub mod grades;
pub mod session;
pub mod settings;
pub mod staff;
pub mod students;
pub mod timetable;
