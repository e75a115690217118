//! Paginated listing as a lazy stream of instances.

use std::collections::VecDeque;

use futures::stream::{self, Stream};
use metrics::counter;
use reaper_core::{ClusterClient, ClusterError, Gvr, ListRequest, Page, ResourceInstance, Target};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{or_cancelled, pause, SweepConfig};

#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error("listing cancelled")]
    Cancelled,
    #[error("listing {gvr} failed after {attempts} attempts: {source}")]
    Exhausted {
        gvr: Gvr,
        attempts: u32,
        #[source]
        source: ClusterError,
    },
}

#[derive(Default)]
struct Cursor {
    continue_token: Option<String>,
    buffered: VecDeque<ResourceInstance>,
    fetched: bool,
    done: bool,
}

/// Follows continuation tokens for one resource kind at a time.
#[derive(Clone, Copy)]
pub struct Lister<'a> {
    client: &'a dyn ClusterClient,
    config: &'a SweepConfig,
    cancel: &'a CancellationToken,
}

impl<'a> Lister<'a> {
    pub fn new(client: &'a dyn ClusterClient, config: &'a SweepConfig, cancel: &'a CancellationToken) -> Self {
        Self { client, config, cancel }
    }

    /// Every instance of `target`, all namespaces, page by page.
    ///
    /// Each call starts from the first page. The throttle pause follows every
    /// consumed page, the last one included. The stream ends after its first error.
    pub fn list(&self, target: &'a Target) -> impl Stream<Item = Result<ResourceInstance, ListError>> + 'a {
        let lister = *self;
        stream::unfold(Cursor::default(), move |mut cursor| async move {
            loop {
                if let Some(mut item) = cursor.buffered.pop_front() {
                    if item.kind.is_empty() {
                        item.kind = target.descriptor.kind.clone();
                    }
                    return Some((Ok(item), cursor));
                }
                if cursor.done {
                    return None;
                }
                if cursor.fetched {
                    if !pause(lister.cancel, lister.config.throttle).await {
                        cursor.done = true;
                        return Some((Err(ListError::Cancelled), cursor));
                    }
                    if cursor.continue_token.is_none() {
                        return None;
                    }
                }
                let fetched = lister.fetch_page(&target.gvr, cursor.continue_token.as_deref()).await;
                match fetched {
                    Ok(page) => {
                        cursor.fetched = true;
                        cursor.continue_token = page.continue_token.filter(|t| !t.is_empty());
                        cursor.buffered.extend(page.items);
                    }
                    Err(e) => {
                        cursor.done = true;
                        return Some((Err(e), cursor));
                    }
                }
            }
        })
    }

    /// One page, retried with backoff up to `list_retries` times.
    async fn fetch_page(&self, gvr: &Gvr, continue_token: Option<&str>) -> Result<Page, ListError> {
        let request = ListRequest {
            namespace: None,
            continue_token: continue_token.map(str::to_string),
            limit: self.config.page_size,
            timeout: self.config.list_timeout,
        };
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let Some(result) = or_cancelled(self.cancel, self.client.list(gvr, &request)).await else {
                return Err(ListError::Cancelled);
            };
            match result {
                Ok(page) => {
                    debug!(resource = %gvr, items = page.items.len(), more = page.continue_token.is_some(), "listed page");
                    return Ok(page);
                }
                Err(e) => {
                    counter!("reaper_list_errors_total", 1u64, "resource" => gvr.resource.clone());
                    if attempt > self.config.list_retries {
                        return Err(ListError::Exhausted { gvr: gvr.clone(), attempts: attempt, source: e });
                    }
                    let delay = self.config.backoff(attempt);
                    warn!(resource = %gvr, attempt, retry_in_ms = delay.as_millis() as u64, error = %e, "list failed; retrying");
                    if !pause(self.cancel, delay).await {
                        return Err(ListError::Cancelled);
                    }
                }
            }
        }
    }
}
