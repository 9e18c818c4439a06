pub mod auth;
pub mod config;
pub mod doc_type;
pub mod facade;
pub mod mapping;
pub mod port;
pub mod search;
pub mod storage;
