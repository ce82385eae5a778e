use tracing::trace;

use crate::error::{Error, Result};

/// Owns one native resource and releases it at most once.
///
/// Release happens on the first of `release()` or drop; later calls are no-ops
/// and accessors report [`Error::Closed`].
pub(crate) struct Handle<T: ?Sized> {
    kind: &'static str,
    native: Option<Box<T>>,
}

impl<T: ?Sized> Handle<T> {
    pub(crate) fn new(kind: &'static str, native: Box<T>) -> Self {
        Self {
            kind,
            native: Some(native),
        }
    }

    pub(crate) fn get(&self) -> Result<&T> {
        self.native.as_deref().ok_or(Error::Closed(self.kind))
    }

    pub(crate) fn release(&mut self) {
        if let Some(native) = self.native.take() {
            trace!(kind = self.kind, "releasing native handle");
            drop(native);
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.native.is_none()
    }
}

impl<T: ?Sized> Drop for Handle<T> {
    fn drop(&mut self) {
        self.release();
    }
}
