pub mod addresses;
pub mod cache;
pub mod census;
pub mod checkpoint;
pub mod delay;
pub mod driver;
pub mod geometry;
pub mod gitlab;
pub mod logger;
pub mod page_loop;
pub mod records;
pub mod telemetry;
pub mod webdriver;

// Exporting types for convenience
pub use cache::JsonCache;
pub use checkpoint::Checkpoint;
pub use driver::{By, DriverError, PageDriver};
pub use page_loop::{run_export_loop, run_scrape_loop, PageLoop, PageMode, PageStep};
pub use records::{CsvSink, ResidentRecord};
