//! Values that are either ready now or produced later.
//!
//! Resolution stays synchronous for as long as every producer involved returns a
//! ready value. As soon as one of them returns a pending computation the whole
//! result becomes a [ValueOrPromise::Promise].

use std::future::{Future, IntoFuture};

use futures::{
    future::{self, LocalBoxFuture},
    FutureExt,
};

use crate::errors::ContextError;

/// A value that is either available or still being computed
pub enum ValueOrPromise<T> {
    Value(T),
    Promise(LocalBoxFuture<'static, Result<T, ContextError>>),
}

/// Result of a resolution step
pub type Resolved<T> = Result<ValueOrPromise<T>, ContextError>;

impl<T: 'static> ValueOrPromise<T> {
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, ContextError>> + 'static,
    {
        ValueOrPromise::Promise(future.boxed_local())
    }

    pub fn is_promise(&self) -> bool {
        matches!(self, ValueOrPromise::Promise(_))
    }

    /// Returns the ready value, or gives the promise back
    pub fn try_into_value(self) -> Result<T, Self> {
        match self {
            ValueOrPromise::Value(value) => Ok(value),
            promise => Err(promise),
        }
    }

    /// Chains another resolution step, staying synchronous if possible
    pub fn then<U, F>(self, next: F) -> Resolved<U>
    where
        U: 'static,
        F: FnOnce(T) -> Resolved<U> + 'static,
    {
        match self {
            ValueOrPromise::Value(value) => next(value),
            ValueOrPromise::Promise(pending) => Ok(ValueOrPromise::Promise(
                async move {
                    let value = pending.await?;
                    next(value)?.await
                }
                .boxed_local(),
            )),
        }
    }

    pub fn map<U, F>(self, transform: F) -> Resolved<U>
    where
        U: 'static,
        F: FnOnce(T) -> Result<U, ContextError> + 'static,
    {
        self.then(move |value| transform(value).map(ValueOrPromise::Value))
    }
}

impl<T: 'static> IntoFuture for ValueOrPromise<T> {
    type Output = Result<T, ContextError>;
    type IntoFuture = LocalBoxFuture<'static, Result<T, ContextError>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            ValueOrPromise::Value(value) => future::ready(Ok(value)).boxed_local(),
            ValueOrPromise::Promise(pending) => pending,
        }
    }
}

impl<T> From<T> for ValueOrPromise<T> {
    fn from(value: T) -> Self {
        ValueOrPromise::Value(value)
    }
}

enum Slot<T> {
    Ready(T),
    Pending(LocalBoxFuture<'static, Result<T, ContextError>>),
}

/// Joins a list of resolution steps.
///
/// Items are evaluated in order and the first synchronous failure is returned right
/// away. If every item is ready the result is ready, otherwise all pending items
/// are awaited together and the first failure wins.
pub fn resolve_list<T, I>(items: I) -> Resolved<Vec<T>>
where
    T: 'static,
    I: IntoIterator<Item = Resolved<T>>,
{
    let mut slots = Vec::new();
    let mut pending = false;
    for item in items {
        match item? {
            ValueOrPromise::Value(value) => slots.push(Slot::Ready(value)),
            ValueOrPromise::Promise(promise) => {
                pending = true;
                slots.push(Slot::Pending(promise));
            }
        }
    }

    if !pending {
        let values = slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Ready(value) => Some(value),
                Slot::Pending(_) => None,
            })
            .collect();
        return Ok(ValueOrPromise::Value(values));
    }

    let futures = slots.into_iter().map(|slot| match slot {
        Slot::Ready(value) => future::ready(Ok(value)).boxed_local(),
        Slot::Pending(promise) => promise,
    });
    Ok(ValueOrPromise::Promise(future::try_join_all(futures).boxed_local()))
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    fn later(value: u32) -> Resolved<u32> {
        Ok(ValueOrPromise::from_future(async move { Ok(value) }))
    }

    #[test]
    fn ready_values_stay_synchronous() {
        let list =
            resolve_list(vec![Ok(ValueOrPromise::Value(1)), Ok(ValueOrPromise::Value(2))])
                .unwrap();
        assert_eq!(list.try_into_value().ok(), Some(vec![1, 2]));
    }

    #[test]
    fn one_pending_item_makes_the_list_pending() {
        let list = resolve_list(vec![
            Ok(ValueOrPromise::Value(1)),
            later(2),
            Ok(ValueOrPromise::Value(3)),
        ])
        .unwrap();
        assert!(list.is_promise());
        assert_eq!(block_on(list.into_future()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn synchronous_failure_short_circuits() {
        let mut evaluated = Vec::new();
        let items = (0..3).map(|i| {
            evaluated.push(i);
            if i == 1 {
                Err(ContextError::MultipleValues(i))
            } else {
                Ok(ValueOrPromise::Value(i))
            }
        });
        assert!(resolve_list(items).is_err());
        assert_eq!(evaluated, vec![0, 1]);
    }

    #[test]
    fn then_chains_across_promises() {
        let chained = later(20)
            .unwrap()
            .then(|v| Ok(ValueOrPromise::Value(v + 1)))
            .unwrap()
            .map(|v| Ok(v * 2))
            .unwrap();
        assert_eq!(block_on(chained.into_future()).unwrap(), 42);
    }
}
