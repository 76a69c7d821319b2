pub mod crawler;
pub mod prospector;
pub mod registrar;

pub use crawler::Crawler;
pub use prospector::Prospector;
pub use registrar::{Registrar, RegistrarClosed, RegistrarHandle, RegistrarMessage};
