/// Guard that runs a closure when dropped, including during unwinding.
#[must_use = "the closure runs as soon as the guard is dropped"]
pub struct DeferGuard<F: FnOnce()> {
    on_drop: Option<F>,
}

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

/// Defers `on_drop` until the returned guard goes out of scope.
pub fn defer<F: FnOnce()>(on_drop: F) -> DeferGuard<F> {
    DeferGuard {
        on_drop: Some(on_drop),
    }
}
