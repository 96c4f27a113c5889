//! Thread affinity markers.
//!
//! Backends mark the threads they own so the layers above can tell whether they run on an
//! event-loop thread (which must never block) or on a thread allowed to block.

use std::cell::Cell;
use std::fmt;

/// The kind of thread the current code runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadKind {
    /// An event-loop thread delivering network readiness.
    Io,
    /// A worker thread of an application executor, or a thread-per-request backend thread.
    Worker,
    /// Any thread nobody marked.
    #[default]
    Other,
}

thread_local! {
    static CURRENT: Cell<ThreadKind> = const { Cell::new(ThreadKind::Other) };
}

/// Marks the calling thread, usually from a runtime's `on_thread_start` hook.
pub fn mark_current_thread(kind: ThreadKind) {
    CURRENT.with(|current| current.set(kind));
}

pub fn current_thread_kind() -> ThreadKind {
    CURRENT.with(Cell::get)
}

impl fmt::Display for ThreadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Io => "io",
            Self::Worker => "worker",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_are_per_thread() {
        mark_current_thread(ThreadKind::Io);
        assert_eq!(current_thread_kind(), ThreadKind::Io);

        let other = std::thread::spawn(current_thread_kind).join().unwrap();
        assert_eq!(other, ThreadKind::Other);

        mark_current_thread(ThreadKind::Other);
    }
}
