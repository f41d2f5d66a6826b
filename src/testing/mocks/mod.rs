//! Mock implementations for testing

pub mod handler;
pub mod repository;

pub use handler::RecordingHandler;
pub use repository::FlakyRepository;
