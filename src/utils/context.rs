/// A guard that runs a cleanup function when dropped.
///
/// The cleanup runs whether the scope exits normally, early through `?`, or
/// by unwinding, which is what the pipeline relies on to keep its in-flight
/// count accurate when a request task is cancelled or panics.
///
/// # Examples
///
/// ```
/// use shellgate::utils::context::Context;
///
/// let _guard = Context::with(|| {
///     println!("Cleanup executed!");
/// });
/// ```
pub struct Context<AtExit: FnOnce()> {
    exit_cb: Option<AtExit>,
}

impl<F: FnOnce()> Context<F> {
    /// Creates a guard that will run `f` on drop.
    pub fn with(f: F) -> Self {
        Self { exit_cb: Some(f) }
    }
}

impl<F: FnOnce()> Drop for Context<F> {
    fn drop(&mut self) {
        if let Some(f) = self.exit_cb.take() {
            f()
        }
    }
}
