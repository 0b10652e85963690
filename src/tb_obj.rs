use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// TbObj allows the user to mutably share test objects (such as a Scoreboard or the coverage
// database) between Tasks. The simulation is single threaded, the mutex is never contended;
// it only makes the object Send so it can live inside forked futures.
pub struct TbObj<T>(Arc<Mutex<T>>);

impl<T> TbObj<T> {
    pub fn new(data: T) -> TbObj<T> {
        TbObj(Arc::new(Mutex::new(data)))
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Never hold the borrow across an `.await`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }
}

impl<T> Clone for TbObj<T> {
    fn clone(&self) -> Self {
        TbObj(self.0.clone())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for TbObj<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with(|inner| f.debug_tuple("TbObj").field(inner).finish())
    }
}
