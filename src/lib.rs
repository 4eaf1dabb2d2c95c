pub mod app;
pub mod categorizing;
pub mod config;
pub mod data;
pub mod integration;
pub mod persist;
pub mod report;
