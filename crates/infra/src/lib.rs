//! Infrastructure layer: config, ITSM client, repositories, job pipeline,
//! report files and outbound email.

pub mod client;
pub mod config;
pub mod downloader;
pub mod email;
pub mod jobs;
pub mod report;
pub mod repository;

#[cfg(test)]
mod testing;
