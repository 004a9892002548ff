use futures::stream::{self, StreamExt};
use std::future::Future;

/// Run `f` over `items` with at most `limit` futures in flight, returning
/// outputs in input order. A `limit` of 0 is treated as 1.
pub async fn run_bounded<T, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Vec<Fut::Output>
where
    F: FnMut(T) -> Fut,
    Fut: Future,
{
    stream::iter(items)
        .map(f)
        .buffered(limit.max(1))
        .collect()
        .await
}
