//! # chat-client
//!
//! Client library for optimistic class chat.
//!
//! This is the library a chat screen talks to.
//!
//! ## Features
//!
//! - **Optimistic Sends**: messages show up as pending before the write completes
//! - **Ordered Reloads**: stale full-history responses are discarded by fetch ticket
//! - **Collaborator Traits**: pluggable gateway, change feed and identity (mock included)
//! - **Pure State Machine**: uses chat-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use classroom_chat_client::{ChatConfig, ChatController, MockBackend, StaticIdentity};
//!
//! let backend = MockBackend::new();
//! let identity = StaticIdentity::signed_in(UserId::new("alice"));
//! let chat = ChatController::new(backend.clone(), backend, identity, ChatConfig::default());
//!
//! chat.activate(ChannelId::new("class-1")).await?;
//! chat.send("hello").await?;
//! let view = chat.view().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod gateway;

pub use config::{ChatConfig, ConfigError, EventsConfig, LoggingConfig, StoreConfig};
pub use controller::{Bubble, ChatController, ChatError, ChatEvent, OutgoingMessage};
pub use gateway::{
    ChangeFeed, FeedError, FeedHandle, FeedNotifier, GatewayError, IdentityProvider,
    InsertNotice, MockBackend, MockFeedHandle, RemoteMessageGateway, StaticIdentity,
};
