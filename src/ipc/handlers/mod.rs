pub mod core;
pub mod dataset;
pub mod eligibility;
pub mod rooms;
pub mod seating;
