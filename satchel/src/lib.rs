//! Satchel is a server-side session engine. It keeps a small bag of data per
//! visitor between requests, identified by an unguessable identifier that the
//! client sends back with every request.
//!
//! ## Features
//!
//! * **Sliding expiration**: every successful save pushes the expiry of a
//!   session record to `now + lifetime`, so sessions only expire after a
//!   period of inactivity.
//! * **Guaranteed commit**: a session started with
//!   [`SessionManager::begin_request`] is saved at the end of the request,
//!   even if the handler returns early or fails.
//! * **Pluggable persistence**: records live behind the
//!   [`RecordStore`](session::store::RecordStore) trait. An in-memory store
//!   and a file-based store with atomic writes are included.
//! * **Garbage collection**: expired records are removed by
//!   [`SessionManager::run_garbage_collection`], which can be scheduled with
//!   [`scheduler::spawn_gc_task`] and is skipped while the host is in
//!   maintenance mode.
//!
//! ## Examples
//!
//! ```
//! use satchel::config::SessionConfig;
//! use satchel::{Session, SessionManager};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = SessionManager::from_config(SessionConfig::from_toml("lifetime = 30")?)?;
//!
//! let handled = manager
//!     .run_request(None, async |session: &mut Session| {
//!         session.insert("user_id", 42)?;
//!         Ok::<_, satchel::SessionError>(())
//!     })
//!     .await?;
//!
//! // hand `handled.cookie` to the client, and read it back on the next request
//! let session = manager.begin_request(Some(&handled.cookie.value)).await;
//! assert_eq!(session.get::<u32>("user_id")?, Some(42));
//! manager.end_request(session).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod clock;
pub mod config;
mod error;
pub mod lifecycle;
pub mod scheduler;
mod serializers;
pub mod session;

pub use error::{Result, SessionError};
pub use lifecycle::SessionManager;
pub use session::Session;
