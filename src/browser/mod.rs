mod handle;
mod launcher;

pub use handle::BrowserHandle;
pub use launcher::{
    platform_candidates, resolve_executable, wait_until_ready, BrowserLauncher, ChromeLauncher,
};
