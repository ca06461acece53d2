//! Stream adapters for observation streams.

use futures::ready;
use futures::stream::Stream;
use pin_project_lite::pin_project;
use recache_core::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Suppresses adjacent duplicate `Ok` values and terminates after
    /// relaying the first error, mirroring observation semantics where an
    /// error ends the subscription that produced it.
    pub(crate) struct Distinct<S, T> {
        #[pin]
        inner: S,
        last: Option<T>,
        errored: bool,
    }
}

impl<S, T> Distinct<S, T> {
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner,
            last: None,
            errored: false,
        }
    }
}

impl<S, T> Stream for Distinct<S, T>
where
    S: Stream<Item = Result<T>>,
    T: Clone + PartialEq,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.errored {
            return Poll::Ready(None);
        }
        loop {
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(value)) => {
                    if this.last.as_ref() == Some(&value) {
                        continue;
                    }
                    *this.last = Some(value.clone());
                    return Poll::Ready(Some(Ok(value)));
                }
                Some(Err(error)) => {
                    *this.errored = true;
                    return Poll::Ready(Some(Err(error)));
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};
    use recache_core::Error;

    #[tokio::test]
    async fn suppresses_adjacent_duplicates() {
        let source = stream::iter(vec![Ok(1), Ok(1), Ok(2), Ok(2), Ok(1)]);
        let values: Vec<_> = Distinct::new(source)
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![1, 2, 1]);
    }

    #[tokio::test]
    async fn terminates_after_first_error() {
        let source = stream::iter(vec![Ok(1), Err(Error::loader("boom")), Ok(2)]);
        let items: Vec<_> = Distinct::new(source).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(*items[0].as_ref().unwrap(), 1);
        assert!(items[1].is_err());
    }
}
