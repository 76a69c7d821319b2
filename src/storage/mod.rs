pub mod registry_file;
pub mod traits;

pub use registry_file::RegistryFile;
pub use traits::{RegistryError, StateStore};
