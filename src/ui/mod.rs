pub mod progress;


pub use progress::{format_block_line, format_duration, human_bytes, ProgressRenderer, RenderMode};
