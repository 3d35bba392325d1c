//! Coursely - An e-learning platform backend
//!
//! Instructors publish courses made of sections, lessons and quizzes;
//! students enroll (free or paid), track progress and earn certificates.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
