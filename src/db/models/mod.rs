pub mod highlight;

pub use highlight::{format_highlight_text, DocumentSummary, Highlight};
