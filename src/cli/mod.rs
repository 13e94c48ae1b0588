pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod doctor;
pub mod env;
pub mod heal;
pub mod info;
pub mod output;
pub mod runtime;
