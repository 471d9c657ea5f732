use std::fmt;

/// Lifecycle of the relay.
///
/// `Stopped → Starting → Ready → Stopping → Stopped`. A failed start goes
/// straight from `Starting` back to `Stopped`. A worker that exits on its own
/// passes through `Stopping` like an explicit `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    Starting,
    Ready,
    Stopping,
    #[default]
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}
