//! Complaint domain types shared between the portal, ledger, and chat crates.

/// A complaint as it appears in the dashboard table: the operator-facing
/// number plus the opaque backend identifier used on the portal's JSON API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComplaintRef {
    /// Operator-facing complaint number (anchor text in the dashboard row).
    pub display_id: String,
    /// Backend identifier extracted from the row's `openModelData(...)` onclick.
    pub portal_id: String,
}

/// Fully normalized complaint detail record.
///
/// The upstream API returns values of varying scalar types and nulls, so
/// every field here has already been flattened to its displayable text form
/// (null becomes the empty string).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplaintDetail {
    pub display_id: String,
    pub consumer_id: String,
    pub complainant_name: String,
    pub mobile_number: String,
    pub description: String,
    pub filed_at: String,
    pub exact_location: String,
    pub area: String,
}

/// Outcome of processing a single complaint through the detail-fetch pool.
///
/// A failed job carries `error` and an empty `message_id`; the collector
/// persists only results where the notification actually went out.
#[derive(Debug)]
pub struct ProcessResult {
    pub display_id: String,
    pub message_id: String,
    pub cached_name: String,
    pub error: Option<crate::OmbudError>,
}

impl ProcessResult {
    /// A successful result with a sent notification.
    pub fn ok(display_id: impl Into<String>, message_id: impl Into<String>, cached_name: impl Into<String>) -> Self {
        Self {
            display_id: display_id.into(),
            message_id: message_id.into(),
            cached_name: cached_name.into(),
            error: None,
        }
    }

    /// A failed result; the complaint stays unknown and is retried next cycle.
    pub fn failed(display_id: impl Into<String>, error: crate::OmbudError) -> Self {
        Self {
            display_id: display_id.into(),
            message_id: String::new(),
            cached_name: String::new(),
            error: Some(error),
        }
    }
}

/// One durable row of the complaint ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    /// Primary key: the operator-facing complaint number.
    pub display_id: String,
    /// Chat message id of the notification, kept for later edits.
    pub message_id: String,
    /// Backend identifier, kept for the resolution call.
    pub portal_id: String,
    /// Complainant name cached for the RESOLVED template.
    pub cached_name: String,
}
