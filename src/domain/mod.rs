//! Domain module - core entities of the scraping engine
//!
//! Work items, scrape outcomes, product records and the Seoudi
//! capture/dedup state live here. No I/O; everything in this module is
//! plain data plus the fallible text parsers the handlers lean on.

pub mod capture;
pub mod product;
pub mod work_item;

pub use capture::{CapturedResponse, CategoryUidState};
pub use product::ProductRecord;
pub use work_item::{ScrapeLog, ScrapeResult, ScrapeStatus, WorkItem};
