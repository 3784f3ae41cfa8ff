//! Streaming chat client for the tacheles backend.
//!
//! The backend answers a chat request with newline-delimited JSON records.
//! This crate turns that byte stream into a live message list:
//!
//! - [`LineDecoder`] splits raw reads into complete lines
//! - [`parse_line`] turns one line into a [`StreamEvent`]
//! - [`StreamingReconciler`] appends the user message, opens the stream and
//!   grows a single assistant message as fragments arrive
//! - [`ConversationController`] owns the user session, switches
//!   conversations and cancels streams that would write into the wrong one
//!
//! # Example
//!
//! ```no_run
//! use tacheles_client::{ClientConfig, ConversationController};
//!
//! # async fn run() -> Result<(), tacheles_client::ClientError> {
//! let controller = ConversationController::connect(&ClientConfig::from_env())?;
//! controller.initialize().await?;
//!
//! let outcome = controller.send("Hello, how are you?").await?;
//! println!("{outcome:?}: {:?}", controller.store().snapshot());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod event;
pub mod reconcile;
pub mod reconciler;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use api::{BackendClient, CHAT_ENDPOINT};
pub use config::ClientConfig;
pub use controller::{ConversationController, InitState};
pub use decoder::LineDecoder;
pub use error::{ClientError, Result, StreamError};
pub use event::{parse_line, StreamEvent};
pub use reconcile::reconcile;
pub use reconciler::{SendOutcome, StreamingReconciler};
pub use session::{ChatSurface, SessionHandle, SessionState, StreamSession};
pub use store::MessageStore;
pub use transport::{cancellable, ByteStream, ConversationApi, Transport};
