//! Combinators that build new actions out of existing ones.
//!
//! - [`pure`] lifts a value, a future or a thunk
//! - [`chain`] / [`chain!`](crate::chain) run dependent steps one after another
//! - [`sequence`] / [`sequence_all`] run independent actions concurrently
//! - [`flatten`] runs a list of actions one after another
//!
//! Everything here only builds closures; no connection is touched until the
//! resulting action is run.

use std::fmt;
use std::future::Future;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;

use crate::action::Action;
use crate::transactor::Conn;

type Thunk<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// Input accepted by [`pure`].
pub enum Pure<T> {
    /// Already known value
    Value(T),
    /// Future awaited when the action runs. Wrap a spawned task's handle to
    /// start the work before that.
    Future(BoxFuture<'static, anyhow::Result<T>>),
    /// Producer invoked only when the action runs
    Thunk(Thunk<T>),
}

impl<T> Pure<T>
where
    T: Send + 'static,
{
    pub fn future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Pure::Future(fut.boxed())
    }

    pub fn thunk<F, Fut>(thunk: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Pure::Thunk(Box::new(move || thunk().boxed()))
    }
}

impl<T> From<T> for Pure<T> {
    fn from(value: T) -> Self {
        Pure::Value(value)
    }
}

impl<T> fmt::Debug for Pure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Pure::Value(_) => "Value",
            Pure::Future(_) => "Future",
            Pure::Thunk(_) => "Thunk",
        };
        f.debug_tuple("Pure").field(&kind).finish()
    }
}

/// Lift a value, a future or a deferred producer into an action that ignores
/// its connection.
pub fn pure<C, T>(input: Pure<T>) -> Action<C, T>
where
    C: Send + 'static,
    T: Send + 'static,
{
    match input {
        Pure::Value(value) => Action::value(value),
        Pure::Future(fut) => Action::from_future(fut),
        Pure::Thunk(thunk) => Action::lazy(thunk),
    }
}

/// Run `first`, then each step on the previous result, all on one
/// connection. With no steps, `first` is returned as is.
///
/// Steps share one type; see [`chain!`](crate::chain) for pipelines whose
/// types change from step to step.
pub fn chain<C, T, I, F>(first: Action<C, T>, steps: I) -> Action<C, T>
where
    C: Send + 'static,
    T: Send + 'static,
    I: IntoIterator<Item = F>,
    F: FnOnce(T) -> Action<C, T> + Send + 'static,
{
    steps.into_iter().fold(first, |acc, step| acc.flat_map(step))
}

/// Typed pipeline of dependent steps: `chain!(first, |a| .., |b| ..)`.
///
/// Expands to repeated `flat_map`; `chain!(action)` is `action`.
#[macro_export]
macro_rules! chain {
    ($first:expr $(,)?) => {
        $first
    };
    ($first:expr, $($step:expr),+ $(,)?) => {
        $first $(.flat_map($step))+
    };
}

/// Tuples of actions that [`sequence`] can run together.
pub trait Sequence<C> {
    type Output;

    fn into_action(self) -> Action<C, Self::Output>;
}

impl<C, T1> Sequence<C> for (Action<C, T1>,)
where
    C: Send + 'static,
    T1: Send + 'static,
{
    type Output = (T1,);

    fn into_action(self) -> Action<C, (T1,)> {
        self.0.map(|a| (a,))
    }
}

macro_rules! impl_sequence {
    ($($action:ident: $ty:ident),+) => {
        impl<C, $($ty),+> Sequence<C> for ($(Action<C, $ty>,)+)
        where
            C: Send + 'static,
            $($ty: Send + 'static),+
        {
            type Output = ($($ty,)+);

            fn into_action(self) -> Action<C, Self::Output> {
                let ($($action,)+) = self;
                Action::new(move |conn: Conn<C>| async move {
                    futures::try_join!($($action.execute(conn.clone())),+)
                })
            }
        }
    };
}

impl_sequence!(a1: T1, a2: T2);
impl_sequence!(a1: T1, a2: T2, a3: T3);
impl_sequence!(a1: T1, a2: T2, a3: T3, a4: T4);
impl_sequence!(a1: T1, a2: T2, a3: T3, a4: T4, a5: T5);
impl_sequence!(a1: T1, a2: T2, a3: T3, a4: T4, a5: T5, a6: T6);
impl_sequence!(a1: T1, a2: T2, a3: T3, a4: T4, a5: T5, a6: T6, a7: T7);
impl_sequence!(a1: T1, a2: T2, a3: T3, a4: T4, a5: T5, a6: T6, a7: T7, a8: T8);

/// Run independent actions concurrently on one connection.
///
/// Results come back in argument order whatever order the members finish
/// in. The first failure fails the whole action and the remaining members
/// are dropped.
///
/// A single action still comes back wrapped: `sequence((a,))` resolves to
/// `(T,)`, not `T`. Run `a` directly when the bare value is wanted.
pub fn sequence<C, S>(actions: S) -> Action<C, S::Output>
where
    S: Sequence<C>,
{
    actions.into_action()
}

/// [`sequence`] over any number of actions of one type.
pub fn sequence_all<C, T, I>(actions: I) -> Action<C, Vec<T>>
where
    C: Send + 'static,
    T: Send + 'static,
    I: IntoIterator<Item = Action<C, T>>,
{
    let actions: Vec<_> = actions.into_iter().collect();
    Action::new(move |conn: Conn<C>| async move {
        try_join_all(actions.into_iter().map(|action| action.execute(conn.clone()))).await
    })
}

/// Run actions one after another, collecting their results in order.
pub fn flatten<C, T, I>(actions: I) -> Action<C, Vec<T>>
where
    C: Send + 'static,
    T: Send + 'static,
    I: IntoIterator<Item = Action<C, T>>,
{
    let actions: Vec<_> = actions.into_iter().collect();
    Action::new(move |conn: Conn<C>| async move {
        let mut items = Vec::with_capacity(actions.len());
        for action in actions {
            items.push(action.execute(conn.clone()).await?);
        }
        Ok(items)
    })
}
