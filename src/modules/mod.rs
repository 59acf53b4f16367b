pub mod assignments;
pub mod grading;
pub mod settings;
