//! The portal's "mark resolved" call.
//!
//! A form-encoded POST issued from inside the authenticated page, so the
//! session cookie rides along. The in-page helper reports transport
//! failures by returning a string with an `ERROR: ` prefix instead of
//! throwing across the evaluate boundary.

use tracing::info;

use ombud_browser::session::js_string;
use ombud_browser::PortalSession;
use ombud_types::OmbudError;

/// Marker the in-page helper prepends to a failed call's result.
const ERROR_PREFIX: &str = "ERROR: ";

/// Mark a complaint resolved on the portal.
///
/// No retry at this layer; the operator sees the failure and can try
/// again from the chat. In debug mode the call is logged, not issued.
pub async fn resolve_complaint(
    session: &PortalSession,
    resolve_url: &str,
    portal_id: &str,
    remark: &str,
    debug: bool,
) -> Result<(), OmbudError> {
    let body = resolution_body(portal_id, remark);

    if debug {
        info!(portal_id, url = resolve_url, body = %body, "debug mode: skipping resolution call");
        return Ok(());
    }

    let script = format!(
        "(async () => {{ \
           try {{ \
             const response = await fetch({url}, {{ \
               method: 'POST', \
               headers: {{ \
                 'Content-Type': 'application/x-www-form-urlencoded; charset=UTF-8', \
                 'X-Requested-With': 'XMLHttpRequest' \
               }}, \
               body: {body} \
             }}); \
             if (!response.ok) throw new Error('HTTP status ' + response.status); \
             return await response.text(); \
           }} catch (error) {{ \
             return 'ERROR: ' + error.message; \
           }} \
         }})()",
        url = js_string(resolve_url),
        body = js_string(&body),
    );

    let response = session
        .evaluate_async(&script)
        .await
        .map_err(|e| OmbudError::Fetch(format!("resolution call failed to execute: {e}")))?;

    let text = response.as_str().unwrap_or_default();
    if let Some(reason) = text.strip_prefix(ERROR_PREFIX) {
        return Err(OmbudError::Fetch(format!(
            "resolution call for {portal_id} failed: {reason}"
        )));
    }

    info!(portal_id, response = text, "complaint marked resolved on portal");
    Ok(())
}

/// Build the form-encoded request body.
pub fn resolution_body(portal_id: &str, remark: &str) -> String {
    let encoded_remark: String = url::form_urlencoded::byte_serialize(remark.as_bytes()).collect();
    format!("complaint_id={portal_id}&complaint_AsignType=resolved&remark={encoded_remark}")
}
