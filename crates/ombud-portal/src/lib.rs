//! Portal automation: everything that talks to the complaint site.
//!
//! - [`login`]: authentication, including the arithmetic captcha.
//! - [`scraper`]: paginated dashboard walk and new-complaint dispatch.
//! - [`detail`]: authenticated in-browser fetch of a complaint's record.
//! - [`pool`]: bounded worker pool draining freshly discovered complaints.
//! - [`resolve`]: the "mark resolved" call against the portal API.

pub mod detail;
pub mod login;
pub mod pool;
pub mod resolve;
pub mod scraper;

pub use pool::DetailPool;
pub use scraper::Scraper;
