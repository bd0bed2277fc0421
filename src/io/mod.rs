/// I/O operations for reading and writing DFS image files

/// Reader implementation for SSD/DSD files
pub mod reader;
/// Writer implementation for SSD/DSD files
pub mod writer;

pub use reader::read_image;
pub use writer::write_image;
