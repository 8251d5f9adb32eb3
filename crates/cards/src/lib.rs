//! Greeting cards: storage, querying and the HTTP surface for a personal card archive.

pub mod handler;
pub mod migrate;
pub mod models;
pub mod query;
mod repository;
pub mod service;
pub mod upload;
