pub mod driver;
pub mod error;
pub mod recorder;
pub mod report;
pub mod utils;

// Re-export common items
pub use error::{RecorderError, RecorderResult};
pub use recorder::{start_recording, stop_recording, Recording, SessionHandle};
pub use report::render_script;
