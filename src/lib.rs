// Library interface for testing

// Declare all modules
pub mod chunk_store;
pub mod combine;
pub mod config;
pub mod constants;
pub mod context;
pub mod credentials;
pub mod db;
pub mod db_postgres;
pub mod download;
pub mod error;
pub mod ffmpeg;
pub mod models;
pub mod queries;
pub mod reassemble;
pub mod records;
pub mod reencode;
pub mod schema;
pub mod serve;
pub mod silence;
pub mod transcription;
pub mod wav;
pub mod webm;

// Re-export the expected database version for convenience
pub use constants::EXPECTED_DB_VERSION;
