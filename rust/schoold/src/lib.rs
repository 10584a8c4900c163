//! Domain state for a school administration console: who is logged in, and
//! the grades, sections, students, staff, timetable, attendance and settings
//! every screen reads and mutates.
//!
//! [`store::DomainStore`] is the single repository; [`views`] holds the
//! derived lookups screens render from. The `schoold` binary exposes both
//! over a JSON-lines protocol on stdin/stdout, optionally backed by a SQLite
//! workspace ([`db`]) with zip bundle backups ([`backup`]).

pub mod backup;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod ids;
pub mod ipc;
pub mod model;
pub mod observer;
pub mod store;
pub mod views;
