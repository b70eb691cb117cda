use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::crawler::{CrawlClient, CrawlOutcome, Fetcher};
use crate::db::{Database, MAX_DELIVERY_ATTEMPTS};
use crate::extract::Extractor;
use crate::models::Listing;
use crate::notify::{Channel, Dispatcher};
use crate::pacing::{Pacer, Ticker, KEYWORD_DELAY, LISTING_DELAY};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub keywords_processed: usize,
    pub keywords_failed: usize,
    pub crawls_exhausted: usize,
    pub listings_seen: usize,
    pub new_listings: usize,
    pub notified: usize,
    pub notify_failures: usize,
    pub reconciled: usize,
    pub elapsed: Duration,
}

/// Drives monitoring cycles: crawl, extract, dedup against the store, notify.
pub struct Monitor<F, C, P> {
    keywords: Vec<String>,
    pending_limit: usize,
    crawler: CrawlClient<F>,
    extractor: Extractor,
    dispatcher: Dispatcher<C>,
    pacer: P,
    db: Database,
    shutdown: Arc<AtomicBool>,
}

impl<F: Fetcher, C: Channel, P: Pacer> Monitor<F, C, P> {
    pub fn new(
        config: &Config,
        fetcher: F,
        channel: C,
        pacer: P,
        db: Database,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        Ok(Self {
            keywords: config.keywords.clone(),
            pending_limit: config.pending_limit,
            crawler: CrawlClient::new(fetcher, config),
            extractor: Extractor::new(&config.base_url, &config.recency_markers)?,
            dispatcher: Dispatcher::new(channel, config.notification_cooldown()),
            pacer,
            db,
            shutdown,
        })
    }

    #[cfg(test)]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Release the store. Called once the loop has stopped.
    pub fn close(self) -> Result<()> {
        self.db.close()
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Startup notice, then one cycle per interval until shutdown.
    pub fn run(&mut self, interval: Duration) {
        self.send_startup_notice();

        let mut ticker = Ticker::new(interval, self.shutdown.clone());
        while ticker.tick() {
            self.run_cycle();
        }
        info!("shutdown requested, monitor stopped");
    }

    pub fn send_startup_notice(&mut self) {
        if !self.dispatcher.send(&Listing::startup_notice()) {
            error!("failed to send startup notice");
        }
    }

    pub fn run_cycle(&mut self) -> CycleReport {
        info!(keywords = self.keywords.len(), "starting monitoring cycle");
        let start = Instant::now();
        let mut report = CycleReport::default();

        if let Err(e) = self.reconcile(&mut report) {
            error!(error = %e, "failed to reconcile pending notifications");
        }

        let keywords = self.keywords.clone();
        for keyword in &keywords {
            if self.shutdown_requested() {
                info!("shutdown requested, skipping remaining keywords");
                break;
            }

            info!(keyword = %keyword, "checking keyword");
            match self.process_keyword(keyword, &mut report) {
                Ok(()) => report.keywords_processed += 1,
                Err(e) => {
                    report.keywords_failed += 1;
                    error!(keyword = %keyword, error = %e, "failed to process keyword");
                }
            }

            self.pacer.wait(KEYWORD_DELAY.0, KEYWORD_DELAY.1);
        }

        report.elapsed = start.elapsed();
        info!(
            elapsed_secs = %format!("{:.2}", report.elapsed.as_secs_f64()),
            processed = report.keywords_processed,
            failed = report.keywords_failed,
            exhausted = report.crawls_exhausted,
            seen = report.listings_seen,
            new = report.new_listings,
            notified = report.notified,
            notify_failures = report.notify_failures,
            reconciled = report.reconciled,
            "monitoring cycle complete"
        );
        report
    }

    fn process_keyword(&mut self, keyword: &str, report: &mut CycleReport) -> Result<()> {
        let document = match self.crawler.fetch(keyword, &self.pacer) {
            CrawlOutcome::Fetched(document) => document,
            CrawlOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(keyword = %keyword, attempts, error = %last_error, "no results this cycle");
                report.crawls_exhausted += 1;
                return Ok(());
            }
        };

        let listings = self.extractor.extract(&document, keyword);
        report.listings_seen += listings.len();

        let mut fresh = Vec::new();
        for listing in listings {
            if !self.db.exists(&listing.id)? && self.db.insert(&listing)? {
                info!(id = %listing.id, keyword = %keyword, title = %listing.title, "new listing");
                fresh.push(listing);
            }
        }
        report.new_listings += fresh.len();

        for listing in &fresh {
            if self.notify(listing)? {
                report.notified += 1;
            } else {
                report.notify_failures += 1;
            }
            self.pacer.wait(LISTING_DELAY.0, LISTING_DELAY.1);
        }

        Ok(())
    }

    /// Retry stored listings whose alert never went out.
    fn reconcile(&mut self, report: &mut CycleReport) -> Result<()> {
        let pending = self.db.pending_notifications(self.pending_limit)?;
        if pending.is_empty() {
            return Ok(());
        }
        info!(count = pending.len(), "retrying pending notifications");

        for record in pending {
            if self.notify(&record.to_listing())? {
                report.reconciled += 1;
            } else {
                report.notify_failures += 1;
            }
            self.pacer.wait(LISTING_DELAY.0, LISTING_DELAY.1);
        }
        Ok(())
    }

    fn notify(&mut self, listing: &Listing) -> Result<bool> {
        let sent = self.dispatcher.send(listing);
        if sent {
            self.db.mark_notified(&listing.id)?;
        } else {
            let attempts = self.db.record_failed_delivery(&listing.id)?;
            if attempts >= MAX_DELIVERY_ATTEMPTS {
                warn!(id = %listing.id, attempts, "giving up on listing after repeated delivery failures");
            }
        }
        Ok(sent)
    }
}
