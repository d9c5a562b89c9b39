//! Headless-Chrome driver for the complaint portal.
//!
//! The portal is driven entirely through two CDP commands: `Page.navigate`
//! and `Runtime.evaluate` (with `awaitPromise` for in-page `fetch()` calls,
//! which inherit the session's cookies). Everything else -- waiting for
//! elements, filling forms, clicking, scraping rows -- is expressed as
//! in-page JavaScript.
//!
//! Layers:
//!
//! - [`cdp`]: WebSocket JSON-RPC client with command/response correlation.
//! - [`launch`]: Chrome binary discovery and headless process launch.
//! - [`session`]: [`PortalSession`] -- one live browser process plus its
//!   page connection, with navigation/eval/interaction helpers.
//! - [`handle`]: [`SessionHandle`] -- thread-safe owner supporting atomic
//!   replacement when the supervisor rebuilds the browser.

pub mod cdp;
pub mod error;
pub mod handle;
pub mod launch;
pub mod session;

pub use cdp::CdpClient;
pub use error::BrowserError;
pub use handle::SessionHandle;
pub use session::PortalSession;
