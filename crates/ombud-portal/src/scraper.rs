//! Paginated dashboard walk.
//!
//! Each cycle navigates the dashboard, extracts every complaint row,
//! filters out complaints the ledger already knows, and hands the new ones
//! to the worker pool. The return value is the union of all display ids
//! observed, which the supervisor diffs against the ledger to detect
//! complaints resolved directly on the portal.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use ombud_browser::PortalSession;
use ombud_channel::Notifier;
use ombud_ledger::Ledger;
use ombud_types::{ComplaintRef, Config, OmbudError};

use crate::login;
use crate::pool::{process_complaint, DetailPool};

/// The dashboard's complaint table.
const DASHBOARD_TABLE: &str = "#dataTable";

/// In-page extraction of `(displayId, portalId)` pairs.
///
/// Rows whose anchor lacks a parseable `openModelData(<id>)` onclick are
/// dropped here, before they ever reach Rust.
const EXTRACT_ROWS_SCRIPT: &str = r##"
Array.from(document.querySelectorAll("#dataTable tbody tr")).map(row => {
    const link = row.querySelector('a[onclick*="openModelData"]');
    if (!link) return null;
    const match = link.getAttribute('onclick').match(/openModelData\((\d+)\)/);
    if (!match) return null;
    return { displayId: link.innerText.trim(), portalId: match[1] };
}).filter(x => x !== null && x.portalId !== '')
"##;

/// In-page lookup of the next pagination URL.
///
/// Prefers a `rel="next"` anchor; falls back to the first enabled
/// pagination item labelled with a forward glyph. An empty string means
/// the last page.
const NEXT_PAGE_SCRIPT: &str = r#"
(function() {
    const relNext = document.querySelector('a[rel="next"]');
    if (relNext && relNext.href) return relNext.href;

    const pageLinks = Array.from(document.querySelectorAll('ul.pagination li:not(.disabled) a.page-link'));
    for (const link of pageLinks) {
        const text = link.innerText.trim();
        if (text === '›' || text === 'Next' || text === '»') return link.href;
    }
    return "";
})()
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRow {
    display_id: String,
    portal_id: String,
}

/// One scrape cycle over the dashboard.
pub struct Scraper {
    session: Arc<PortalSession>,
    ledger: Arc<Ledger>,
    notifier: Arc<Notifier>,
    cfg: Arc<Config>,
}

impl Scraper {
    pub fn new(
        session: Arc<PortalSession>,
        ledger: Arc<Ledger>,
        notifier: Arc<Notifier>,
        cfg: Arc<Config>,
    ) -> Self {
        Self {
            session,
            ledger,
            notifier,
            cfg,
        }
    }

    /// Walk the dashboard up to `max_pages`, dispatching new complaints to
    /// the worker pool, and return every display id observed.
    pub async fn fetch_all(&self) -> Result<Vec<String>, OmbudError> {
        let mut observed = Vec::new();

        info!("navigating to complaints dashboard");
        self.goto(&self.cfg.dashboard_url, "dashboard navigation failed")
            .await?;

        let mut page = 1u32;
        loop {
            if page > self.cfg.max_pages {
                info!(max_pages = self.cfg.max_pages, "reached page limit, stopping");
                break;
            }

            info!(page, "processing dashboard page");
            match self.scrape_page().await {
                Ok(page_ids) => observed.extend(page_ids),
                Err(e) => {
                    warn!(page, error = %e, "page scrape failed, aborting pagination");
                    break;
                }
            }

            let next_url = match self.next_page_url().await {
                Ok(url) => url,
                Err(e) => {
                    warn!(page, error = %e, "cannot locate next page link");
                    break;
                }
            };
            if next_url.is_empty() {
                info!("reached last page");
                break;
            }

            if let Err(e) = self.goto(&next_url, "pagination navigation failed").await {
                warn!(page, error = %e, "navigation to next page failed");
                break;
            }
            page += 1;
        }

        info!(pages = page, total = observed.len(), "scrape cycle complete");
        Ok(observed)
    }

    /// Navigate and wait for the dashboard table, classifying failures.
    async fn goto(&self, url: &str, context: &str) -> Result<(), OmbudError> {
        let nav = tokio::time::timeout(self.cfg.navigation_timeout, self.session.navigate(url)).await;
        match nav {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.classify(context, &e.to_string()).await),
            Err(_) => {
                return Err(
                    self.classify(context, &format!("timeout after {:?}", self.cfg.navigation_timeout))
                        .await,
                )
            }
        }

        if let Err(e) = self
            .session
            .wait_visible(DASHBOARD_TABLE, self.cfg.wait_timeout)
            .await
        {
            return Err(self.classify("dashboard table not visible", &e.to_string()).await);
        }
        Ok(())
    }

    /// A navigation failure that lands on the login form means the session
    /// died; anything else is a generic fetch failure.
    async fn classify(&self, context: &str, detail: &str) -> OmbudError {
        if login::is_session_expired(&self.session).await {
            OmbudError::SessionExpired(context.to_string())
        } else {
            OmbudError::Fetch(format!("{context}: {detail}"))
        }
    }

    /// Extract rows from the current page, dispatch unknown complaints,
    /// and return every display id on the page.
    async fn scrape_page(&self) -> Result<Vec<String>, OmbudError> {
        let raw = self
            .session
            .evaluate(EXTRACT_ROWS_SCRIPT)
            .await
            .map_err(|e| OmbudError::Fetch(format!("row extraction failed: {e}")))?;
        let rows: Vec<RawRow> = serde_json::from_value(raw)
            .map_err(|e| OmbudError::Fetch(format!("unexpected row shape: {e}")))?;

        info!(count = rows.len(), "complaints on this page");

        let refs: Vec<ComplaintRef> = rows
            .into_iter()
            .map(|r| ComplaintRef {
                display_id: r.display_id,
                portal_id: r.portal_id,
            })
            .collect();

        let all_ids: Vec<String> = refs.iter().map(|r| r.display_id.clone()).collect();
        let new_refs = filter_new(&refs, |id| self.ledger.is_new(id));

        if !new_refs.is_empty() {
            for r in &new_refs {
                info!(display_id = %r.display_id, "new complaint");
            }
            self.process_new(new_refs).await;
        }

        Ok(all_ids)
    }

    /// Run new complaints through the pool and persist successful sends.
    async fn process_new(&self, new_refs: Vec<ComplaintRef>) {
        let portal_ids: std::collections::HashMap<String, String> = new_refs
            .iter()
            .map(|r| (r.display_id.clone(), r.portal_id.clone()))
            .collect();

        let session = Arc::clone(&self.session);
        let notifier = Arc::clone(&self.notifier);
        let cfg = Arc::clone(&self.cfg);

        let results = DetailPool::run(self.cfg.worker_pool_size, new_refs, move |job| {
            let detail_url = cfg.detail_url(&job.portal_id);
            process_complaint(Arc::clone(&session), Arc::clone(&notifier), detail_url, job)
        })
        .await;

        // Persist only complaints whose notification actually went out;
        // the rest stay "new" and are retried next cycle.
        let records: Vec<_> = results
            .into_iter()
            .filter(|r| r.error.is_none() && !r.message_id.is_empty())
            .map(|r| ombud_types::LedgerRecord {
                portal_id: portal_ids.get(&r.display_id).cloned().unwrap_or_default(),
                display_id: r.display_id,
                message_id: r.message_id,
                cached_name: r.cached_name,
            })
            .collect();

        for chunk in records.chunks(self.cfg.batch_size) {
            match self.ledger.save_batch(chunk) {
                Ok(()) => info!(saved = chunk.len(), "new complaints persisted"),
                Err(e) => warn!(error = %e, "failed to persist batch, will reprocess next cycle"),
            }
        }
    }

    /// Resolve the next pagination URL, empty when on the last page.
    async fn next_page_url(&self) -> Result<String, OmbudError> {
        let value = self
            .session
            .evaluate(NEXT_PAGE_SCRIPT)
            .await
            .map_err(|e| OmbudError::Fetch(format!("pagination lookup failed: {e}")))?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

/// Within-page de-dup plus the ledger "is new" filter.
fn filter_new(refs: &[ComplaintRef], is_new: impl Fn(&str) -> bool) -> Vec<ComplaintRef> {
    let mut seen_on_page = std::collections::HashSet::new();
    refs.iter()
        .filter(|r| seen_on_page.insert(r.display_id.clone()))
        .filter(|r| is_new(&r.display_id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(display: &str, portal: &str) -> ComplaintRef {
        ComplaintRef {
            display_id: display.into(),
            portal_id: portal.into(),
        }
    }

    #[test]
    fn filter_new_dedups_within_page() {
        let refs = vec![r("C1", "1"), r("C2", "2"), r("C1", "1")];
        let new = filter_new(&refs, |_| true);
        assert_eq!(new.len(), 2);
        assert_eq!(new[0].display_id, "C1");
        assert_eq!(new[1].display_id, "C2");
    }

    #[test]
    fn filter_new_consults_the_ledger() {
        let refs = vec![r("C1", "1"), r("C2", "2"), r("C3", "3")];
        let new = filter_new(&refs, |id| id != "C2");
        assert_eq!(
            new.iter().map(|x| x.display_id.as_str()).collect::<Vec<_>>(),
            vec!["C1", "C3"]
        );
    }

    #[test]
    fn row_extraction_script_contract() {
        // The in-page script feeds serde directly; the key names and the
        // portal-id filter are part of the contract.
        assert!(EXTRACT_ROWS_SCRIPT.contains("displayId"));
        assert!(EXTRACT_ROWS_SCRIPT.contains("portalId"));
        assert!(EXTRACT_ROWS_SCRIPT.contains("openModelData"));
        assert!(EXTRACT_ROWS_SCRIPT.contains("#dataTable tbody tr"));
        assert!(EXTRACT_ROWS_SCRIPT.contains("x.portalId !== ''"));
    }

    #[test]
    fn row_shape_deserializes() {
        let rows: Vec<RawRow> = serde_json::from_value(serde_json::json!([
            { "displayId": "C1", "portalId": "456" }
        ]))
        .unwrap();
        assert_eq!(rows[0].display_id, "C1");
        assert_eq!(rows[0].portal_id, "456");
    }

    #[test]
    fn next_page_script_prefers_rel_next() {
        let rel_pos = NEXT_PAGE_SCRIPT.find("rel=\"next\"").unwrap();
        let fallback_pos = NEXT_PAGE_SCRIPT.find("ul.pagination").unwrap();
        assert!(rel_pos < fallback_pos);
        // Fallback glyphs: ›, Next, »
        assert!(NEXT_PAGE_SCRIPT.contains("'Next'"));
        assert!(NEXT_PAGE_SCRIPT.contains("\u{203A}"));
        assert!(NEXT_PAGE_SCRIPT.contains("\u{00BB}"));
    }
}
