pub mod zip_pool;

pub use zip_pool::{ZipEntry, ZipPool};
