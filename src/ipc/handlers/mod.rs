pub mod classes;
pub mod core;
pub mod grades;
pub mod policies;
pub mod reports;
pub mod students;
pub mod subjects;
pub mod years;
