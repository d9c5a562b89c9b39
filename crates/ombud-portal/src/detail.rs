//! Authenticated fetch of a complaint's full record.
//!
//! The detail endpoint requires the portal session cookie, so the request
//! runs as an in-page `fetch()` inside the browser rather than through a
//! separate HTTP client. The response shape is not under our control:
//! values may be strings, numbers, or null, so everything is flattened to
//! display text in one normalization step.

use serde_json::Value;

use ombud_browser::session::js_string;
use ombud_browser::PortalSession;
use ombud_types::{ComplaintDetail, OmbudError};

/// Fetch and normalize one complaint's detail record.
///
/// `display_id` is the dashboard's id for the complaint; it backstops the
/// record's own `complain_no` when the API returns it empty.
pub async fn fetch_detail(
    session: &PortalSession,
    detail_url: &str,
    display_id: &str,
) -> Result<ComplaintDetail, OmbudError> {
    let script = format!(
        "(async () => {{ \
           const response = await fetch({url}, {{ headers: {{ 'X-Requested-With': 'XMLHttpRequest' }} }}); \
           if (!response.ok) throw new Error('HTTP status ' + response.status); \
           return await response.text(); \
         }})()",
        url = js_string(detail_url),
    );

    let raw = session
        .evaluate_async(&script)
        .await
        .map_err(|e| OmbudError::Fetch(format!("detail fetch for {display_id} failed: {e}")))?;

    let body = raw
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OmbudError::Fetch(format!("empty detail response for {display_id}")))?;

    let json: Value = serde_json::from_str(body)
        .map_err(|e| OmbudError::Fetch(format!("invalid detail JSON for {display_id}: {e}")))?;

    parse_detail(&json, display_id)
}

/// Extract the nested detail object and normalize its fields.
pub fn parse_detail(json: &Value, display_id: &str) -> Result<ComplaintDetail, OmbudError> {
    let detail = json
        .get("complaintdetail")
        .filter(|d| d.is_object())
        .ok_or_else(|| {
            OmbudError::Fetch(format!("complaintdetail missing in response for {display_id}"))
        })?;

    let field = |key: &str| normalize_value(detail.get(key));

    let complain_no = field("complain_no");
    Ok(ComplaintDetail {
        display_id: if complain_no.is_empty() {
            display_id.to_string()
        } else {
            complain_no
        },
        consumer_id: field("consumer_no"),
        complainant_name: field("complainant_name"),
        mobile_number: field("mobile_no"),
        description: field("description"),
        filed_at: field("complain_date"),
        exact_location: field("exact_location"),
        area: field("area"),
    })
}

/// Flatten an upstream JSON value to display text: null and absent become
/// the empty string, strings pass through, everything else renders in its
/// textual form.
pub fn normalize_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_scalar_types() {
        assert_eq!(normalize_value(None), "");
        assert_eq!(normalize_value(Some(&Value::Null)), "");
        assert_eq!(normalize_value(Some(&json!("text"))), "text");
        assert_eq!(normalize_value(Some(&json!(42))), "42");
        assert_eq!(normalize_value(Some(&json!(4.5))), "4.5");
        assert_eq!(normalize_value(Some(&json!(true))), "true");
    }

    #[test]
    fn parses_full_record() {
        let body = json!({
            "complaintdetail": {
                "complain_no": "C1",
                "consumer_no": 67890,
                "complainant_name": "Asha Patel",
                "mobile_no": "9876543210",
                "description": "No power since morning",
                "complain_date": "2026-07-30",
                "exact_location": null,
                "area": "Ward 4"
            }
        });
        let detail = parse_detail(&body, "C1").unwrap();
        assert_eq!(detail.display_id, "C1");
        assert_eq!(detail.consumer_id, "67890");
        assert_eq!(detail.complainant_name, "Asha Patel");
        assert_eq!(detail.exact_location, "");
        assert_eq!(detail.area, "Ward 4");
    }

    #[test]
    fn falls_back_to_dashboard_id_when_complain_no_is_null() {
        let body = json!({ "complaintdetail": { "complain_no": null } });
        let detail = parse_detail(&body, "C7").unwrap();
        assert_eq!(detail.display_id, "C7");
        assert_eq!(detail.complainant_name, "");
    }

    #[test]
    fn missing_detail_object_is_a_fetch_error() {
        let body = json!({ "status": "ok" });
        let err = parse_detail(&body, "C1").unwrap_err();
        assert!(err.to_string().contains("complaintdetail"));

        let not_object = json!({ "complaintdetail": "nope" });
        assert!(parse_detail(&not_object, "C1").is_err());
    }
}
