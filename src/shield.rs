// src/shield.rs - Multi-source price consensus validation
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use log::{debug, warn};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::config::ShieldConfig;
use crate::types::ShieldVerdict;

#[derive(Deserialize, Debug)]
struct QuoteResponse {
    price: f64,
}

#[derive(Debug, Clone)]
struct CachedQuotes {
    prices: Vec<f64>,
    fetched_at: Instant,
}

impl CachedQuotes {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Cross-checks a candidate's entry price against independent sources.
/// Exists to stop a single manipulated or stale feed from causing a bad
/// entry, so it fails closed: not enough responding sources means
/// rejection, never approval.
pub struct ConsensusShield {
    cfg: ShieldConfig,
    http: reqwest::Client,
    cache: RwLock<HashMap<String, CachedQuotes>>,
    pub source_failures: AtomicU64,
    pub cache_hits: AtomicU64,
    pub validations: AtomicU64,
}

impl ConsensusShield {
    pub fn new(cfg: ShieldConfig) -> Self {
        Self {
            cfg,
            http: reqwest::Client::new(),
            cache: RwLock::new(HashMap::new()),
            source_failures: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            validations: AtomicU64::new(0),
        }
    }

    pub async fn validate(&self, instrument: &str, entry: f64) -> ShieldVerdict {
        self.validations.fetch_add(1, Ordering::Relaxed);
        let prices = self.consensus_prices(instrument).await;
        let verdict = evaluate(&prices, entry, &self.cfg);
        if verdict.accepted {
            debug!(
                "🛡️ [SHIELD] {} accepted: consensus={:.5} agreement={:.2} outliers={}",
                instrument,
                verdict.consensus_price.unwrap_or(0.0),
                verdict.agreement_ratio,
                verdict.outlier_count
            );
        } else {
            debug!(
                "🛡️ [SHIELD] {} rejected: {} sources responded, agreement={:.2}, outliers={}",
                instrument, verdict.responding_sources, verdict.agreement_ratio, verdict.outlier_count
            );
        }
        verdict
    }

    /// Quotes per instrument, cached briefly to bound external query
    /// volume. Expired entries are refetched, never served stale.
    async fn consensus_prices(&self, instrument: &str) -> Vec<f64> {
        let ttl = Duration::from_secs(self.cfg.cache_ttl_secs);
        {
            let cache = self.cache.read();
            if let Some(cached) = cache.get(instrument) {
                if cached.is_fresh(ttl) {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return cached.prices.clone();
                }
            }
        }

        let prices = self.fetch_quotes(instrument).await;
        self.cache.write().insert(
            instrument.to_string(),
            CachedQuotes {
                prices: prices.clone(),
                fetched_at: Instant::now(),
            },
        );
        prices
    }

    /// Query every configured source with a per-source timeout and keep
    /// whatever subset answered in time.
    async fn fetch_quotes(&self, instrument: &str) -> Vec<f64> {
        let timeout = Duration::from_millis(self.cfg.source_timeout_ms);
        let requests = self.cfg.sources.iter().map(|template| {
            let url = template.replace("{symbol}", instrument);
            let http = self.http.clone();
            async move {
                let response = tokio::time::timeout(timeout, async {
                    http.get(&url).send().await?.json::<QuoteResponse>().await
                })
                .await;
                match response {
                    Ok(Ok(quote)) if quote.price.is_finite() && quote.price > 0.0 => {
                        Some(quote.price)
                    }
                    Ok(Ok(quote)) => {
                        warn!("🛡️ [SHIELD] Source {} returned bad price {}", url, quote.price);
                        None
                    }
                    Ok(Err(e)) => {
                        warn!("🛡️ [SHIELD] Source {} failed: {}", url, e);
                        None
                    }
                    Err(_) => {
                        warn!("🛡️ [SHIELD] Source {} timed out after {:?}", url, timeout);
                        None
                    }
                }
            }
        });

        let results = join_all(requests).await;
        let prices: Vec<f64> = results.into_iter().flatten().collect();
        let failed = self.cfg.sources.len() - prices.len();
        if failed > 0 {
            self.source_failures.fetch_add(failed as u64, Ordering::Relaxed);
        }
        prices
    }
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Pure consensus decision over the responding prices. Fails closed on
/// fewer than `min_sources` responses.
pub fn evaluate(prices: &[f64], entry: f64, cfg: &ShieldConfig) -> ShieldVerdict {
    let responding = prices.len();
    if responding < cfg.min_sources {
        return ShieldVerdict::rejected(responding);
    }

    let mut sorted = prices.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let consensus = median(&sorted);

    let mean = prices.iter().sum::<f64>() / responding as f64;
    let variance = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / responding as f64;
    let stddev = variance.sqrt();

    let outlier_count = if stddev > 0.0 {
        prices
            .iter()
            .filter(|p| (**p - consensus).abs() > cfg.outlier_sigma * stddev)
            .count()
    } else {
        0
    };

    let agreement_ratio = (responding - outlier_count) as f64 / responding as f64;
    let entry_deviation_pct = if consensus > 0.0 {
        (entry - consensus).abs() / consensus * 100.0
    } else {
        f64::INFINITY
    };

    let accepted = entry_deviation_pct <= cfg.max_entry_deviation_pct
        && outlier_count <= cfg.max_outliers
        && agreement_ratio >= cfg.min_agreement_ratio;

    ShieldVerdict {
        consensus_price: Some(consensus),
        agreement_ratio,
        outlier_count,
        responding_sources: responding,
        accepted,
        score_bonus: if accepted { cfg.score_bonus } else { 0.0 },
    }
}
