pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use application::engine;
pub use application::services;
pub use domain::entities;
pub use domain::value_objects;
pub use infrastructure::parsers;
