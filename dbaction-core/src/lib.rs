//! dbaction-core: deferred database actions
//!
//! An [`Action`] describes work against a connection without running it.
//! Actions compose with `map`/`flat_map` and the [`combinators`], and only
//! touch a database when driven by [`Action::run`] (plain checkout) or
//! [`Action::transact`] (commit on success, rollback on failure) against a
//! [`Transactor`].
//!
//! ```ignore
//! use dbaction_core::{chain, memory::MemoryTransactor, Action, Conn};
//! use dbaction_core::memory::MemoryConn;
//!
//! fn insert(key: i64) -> Action<MemoryConn, ()> {
//!     Action::new(move |conn: Conn<MemoryConn>| async move {
//!         conn.lock().await.insert(key)?;
//!         Ok(())
//!     })
//! }
//!
//! let tr = MemoryTransactor::new();
//! chain!(insert(1), |_| insert(2)).transact(&tr).await?;
//! ```

pub mod action;
pub mod combinators;
pub mod error;
pub mod memory;
pub mod transactor;

pub use action::Action;
pub use combinators::{chain, flatten, pure, sequence, sequence_all, Pure, Sequence};
pub use error::{Error, Result, Stage};
pub use transactor::{Conn, Outcome, Session, Transactor};
