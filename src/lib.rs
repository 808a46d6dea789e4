pub mod config;
pub mod daemon;
pub mod domain;
pub mod mail;
pub mod query;
pub mod remote;
pub mod secrets;
pub mod smtp;
pub mod store;
pub mod web;
