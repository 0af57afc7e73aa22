//! Clock port: monotonic time and sleeping, so polling can be driven
//! deterministically in tests.

use std::time::Duration;

pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary, fixed origin.
    fn now(&self) -> Duration;

    /// Block the current thread for `duration`.
    fn sleep(&self, duration: Duration);
}
