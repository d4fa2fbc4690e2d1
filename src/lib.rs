//! Line-oriented terminal BBS: many users in one shared room over raw TCP.

pub mod accounts;
pub mod avatar;
pub mod banner;
pub mod commands;
pub mod config;
pub mod connection;
pub mod forum;
pub mod history;
pub mod identity;
pub mod ratelimit;
pub mod registry;
pub mod server;
