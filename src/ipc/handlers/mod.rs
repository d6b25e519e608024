pub mod attendance;
pub mod backup;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod grades;
pub mod setup;
pub mod submissions;
