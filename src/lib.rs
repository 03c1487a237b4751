pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod models;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod segmenter;
pub mod state;
pub mod storage;
