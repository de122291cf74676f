#![allow(dead_code)]

pub mod axum_test;
pub mod builders;
pub mod db;

pub use axum_test::{AxumTestRequest, AxumTestResponse};
pub use builders::{session_cookie, SessionBuilder, UserBuilder};
pub use db::{count_device_sessions, count_security_events, TestDb};
