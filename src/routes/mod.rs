pub mod admin;
pub mod health;
pub mod live;
pub mod student;
