pub mod attendance;
pub mod backup;
pub mod catalog;
pub mod config;
pub mod course_grade;
pub mod db;
pub mod enrollment;
pub mod error;
pub mod grade;
pub mod ipc;
pub mod submission;

pub use error::{CoreError, CoreResult};
