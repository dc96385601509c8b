use tokio_util::sync::CancellationToken;

/// One OS signal that can be sampled on demand.
///
/// `collect` runs on a blocking worker thread and is never called
/// concurrently for the same source. It must return promptly once `cancel`
/// fires. `None` stands for an empty reading: the previous value is kept.
pub trait MetricSource: Send + 'static {
    type Reading: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn collect(&mut self, cancel: &CancellationToken) -> Option<Self::Reading>;
}

/// Adapter turning a closure into a [`MetricSource`].
pub struct FnSource<F> {
    name: &'static str,
    collect: F,
}

impl<F> FnSource<F> {
    pub fn new(name: &'static str, collect: F) -> Self {
        Self { name, collect }
    }
}

impl<F, T> MetricSource for FnSource<F>
where
    F: FnMut(&CancellationToken) -> Option<T> + Send + 'static,
    T: Send + Sync + 'static,
{
    type Reading = T;

    fn name(&self) -> &'static str {
        self.name
    }

    fn collect(&mut self, cancel: &CancellationToken) -> Option<T> {
        (self.collect)(cancel)
    }
}
