pub mod catalog_location;
pub mod file_exist;
pub mod human_bytes;
pub mod target;
pub mod url;
