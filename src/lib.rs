//! Rubric grading of student programs with LLMs
//!
//! Student code and a rubric go in; one validated label per rubric criterion
//! comes out. Blank programs and criteria covered by decision trees are
//! labeled without calling a model.

pub mod api;
pub mod app;
pub mod model;
pub mod service;
