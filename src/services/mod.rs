pub mod attempt_service;
pub mod session_service;
