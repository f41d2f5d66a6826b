//! Repository backend implementations

pub mod file;
pub mod memory;

pub use file::FileRepository;
pub use memory::MemoryRepository;
