//! Telegram gateway: outbound notifications and the inbound update loop.
//!
//! Outbound traffic goes through [`Notifier`], which renders the HTML
//! message templates and talks to the Bot API via [`api::TelegramApi`].
//! Inbound traffic is a long-polling loop ([`poller::poll_loop`]) that
//! converts raw updates into typed [`InboundEvent`]s and hands them to the
//! resolution state machine over an mpsc channel.

pub mod api;
pub mod notify;
pub mod poller;
pub mod types;

pub use api::TelegramApi;
pub use notify::Notifier;
pub use poller::{poll_loop, InboundEvent};
