pub mod exam_attempt;
pub mod exam_session;
