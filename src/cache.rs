use tracing::error;

use crate::error::MibigError;

/// A cache backed by a file that accumulates pending updates in memory.
pub trait PersistentCache {
    fn label(&self) -> &str;
    fn has_pending(&self) -> bool;
    fn has_backing_file(&self) -> bool;
    fn save(&mut self) -> Result<(), MibigError>;
}

/// Runs `work` against `cache` and flushes pending updates on every exit path.
///
/// If `work` fails, its error is returned even when the flush also fails; the
/// flush failure is logged instead.
pub fn with_flush<C, T, F>(cache: &mut C, work: F) -> Result<T, MibigError>
where
    C: PersistentCache,
    F: FnOnce(&mut C) -> Result<T, MibigError>,
{
    let outcome = work(cache);
    let flushed = if cache.has_pending() && cache.has_backing_file() {
        cache.save()
    } else {
        Ok(())
    };
    match (outcome, flushed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(flush_err)) => {
            error!(
                "failed to flush {} cache after error: {flush_err}",
                cache.label()
            );
            Err(err)
        }
    }
}
