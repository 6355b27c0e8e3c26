//! PDF handling module

pub mod metadata;
pub mod render;

// Re-export commonly used items
pub use metadata::{count_pages, count_pages_in_memory, inspect, is_pdf, PdfInfo};
pub use render::{PageRenderer, PdftoppmRenderer};
