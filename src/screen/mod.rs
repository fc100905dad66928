pub mod backend;
pub mod matcher;
pub mod search;
pub mod types;
pub mod utils;

pub use backend::{DisplayCapture, FrameSource, VirtualDisplay};
pub use matcher::{PixelMatcher, TemplateMatcher};
pub use search::{LiveScreen, Screen};
pub use types::{Hit, Point, ScreenError, ScreenResult};
pub use utils::{diagnostic_filename, generate_timestamp, sanitize_name, write_diagnostic};
