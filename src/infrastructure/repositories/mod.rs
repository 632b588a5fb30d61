pub mod file_state_repository;

pub use file_state_repository::FileStateRepository;
