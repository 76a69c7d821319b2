pub mod encoding;
pub mod line_reader;
pub mod log;

pub use line_reader::LineReader;
pub use log::{Harvester, HarvesterError, HarvesterExit};
