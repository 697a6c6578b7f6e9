//! Restart strategies a supervisor applies when a child fails.

/// How a supervisor reacts to one of its children failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Only the failing child is stopped and restarted.
    OneForOne,
    /// Every child is stopped (in some order), then all are restarted.
    OneForAll,
}
