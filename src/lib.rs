//! mediadrop - fetch media through yt-dlp/ffmpeg and hand it out for a while
//!
//! Jobs are submitted over HTTP, run on a bounded background queue and polled
//! for progress. Finished files are served from the output directory until the
//! expiry sweeper removes them.

pub mod api;
pub mod app;
pub mod config;
pub mod jobs;
pub mod services;

pub use app::{AppState, build_app};
pub use config::Config;
