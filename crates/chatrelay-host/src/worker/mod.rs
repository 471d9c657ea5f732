//! Gateway worker launchers owned by the host.

mod process;

pub use process::ProcessLauncher;
