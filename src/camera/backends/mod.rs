pub mod directory;
pub mod synthetic;

pub use directory::DirectoryCamera;
pub use synthetic::SyntheticCamera;
