//! Metrics recorder for deltavault operations
//!
//! Records delta efficiency, upload routes, store commits and cache health.

use crate::transfer::{FallbackReason, UploadRoute};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    // Upload counters
    describe_counter!(
        "deltavault_uploads_started_total",
        "Total number of uploads started"
    );
    describe_counter!(
        "deltavault_uploads_completed_total",
        "Total number of uploads completed, by route"
    );
    describe_counter!(
        "deltavault_uploads_failed_total",
        "Total number of uploads that failed"
    );
    describe_counter!(
        "deltavault_fallbacks_total",
        "Uploads that fell back to a full upload, by reason"
    );
    describe_counter!(
        "deltavault_upload_bytes_sent_total",
        "Body bytes sent by uploads"
    );
    describe_counter!(
        "deltavault_upload_content_bytes_total",
        "Size of the content uploaded"
    );

    // Peer side
    describe_counter!(
        "deltavault_signatures_served_total",
        "Signature requests answered"
    );
    describe_counter!(
        "deltavault_patches_applied_total",
        "Deltas applied and committed"
    );
    describe_counter!(
        "deltavault_integrity_failures_total",
        "Rebuilt content that did not match its declared hash"
    );
    describe_counter!(
        "deltavault_blobs_committed_total",
        "Blobs committed to the content store"
    );
    describe_counter!(
        "deltavault_blobs_deduplicated_total",
        "Commits that found identical content already stored"
    );
    describe_counter!(
        "deltavault_stored_bytes_total",
        "Bytes written to the content store"
    );

    // Cache
    describe_counter!("deltavault_cache_hits_total", "Reads served from the cache");
    describe_counter!(
        "deltavault_cache_misses_total",
        "Reads that went to the content store"
    );
    describe_counter!(
        "deltavault_cache_admissions_total",
        "Blobs copied into the cache"
    );
    describe_counter!(
        "deltavault_cache_evictions_total",
        "Cache entries evicted"
    );
    describe_gauge!("deltavault_cache_used_bytes", "Bytes held by the cache");
    describe_gauge!("deltavault_cache_entries", "Entries held by the cache");
    describe_gauge!(
        "deltavault_cache_degraded",
        "1 while the cache directory fails its health probe"
    );

    // Histograms
    describe_histogram!(
        "deltavault_delta_hit_rate",
        "Fraction of the target copied from the base"
    );
    describe_histogram!(
        "deltavault_diff_duration_seconds",
        "Time to diff a target against a signature"
    );
    describe_histogram!(
        "deltavault_upload_duration_seconds",
        "Total upload duration"
    );
    describe_histogram!(
        "deltavault_delta_compression_ratio",
        "Delta bytes divided by the size of the rebuilt blob"
    );
    describe_histogram!(
        "deltavault_signature_blocks",
        "Blocks per served signature"
    );
}

// ============== Upload Operations ==============

pub fn record_upload_started() {
    counter!("deltavault_uploads_started_total").increment(1);
}

/// Record the hit rate and cost of one diff
pub fn record_diff(hit_rate: f64, elapsed: Duration) {
    histogram!("deltavault_delta_hit_rate").record(hit_rate);
    histogram!("deltavault_diff_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_fallback(reason: &FallbackReason) {
    counter!("deltavault_fallbacks_total", "reason" => fallback_label(reason)).increment(1);
}

/// Record an upload finishing via `route`
pub fn record_upload_completed(
    route: UploadRoute,
    bytes_sent: u64,
    content_size: u64,
    elapsed: Duration,
) {
    let route = route_label(route);
    counter!("deltavault_uploads_completed_total", "route" => route).increment(1);
    counter!("deltavault_upload_bytes_sent_total", "route" => route).increment(bytes_sent);
    counter!("deltavault_upload_content_bytes_total", "route" => route).increment(content_size);
    histogram!("deltavault_upload_duration_seconds", "route" => route)
        .record(elapsed.as_secs_f64());
}

pub fn record_upload_failed() {
    counter!("deltavault_uploads_failed_total").increment(1);
}

fn route_label(route: UploadRoute) -> &'static str {
    match route {
        UploadRoute::Delta => "delta",
        UploadRoute::Full => "full",
    }
}

fn fallback_label(reason: &FallbackReason) -> &'static str {
    match reason {
        FallbackReason::BelowThreshold { .. } => "below_threshold",
        FallbackReason::SignFailed(_) => "sign_failed",
        FallbackReason::DiffFailed(_) => "diff_failed",
        FallbackReason::PatchFailed(_) => "patch_failed",
    }
}

// ============== Peer Operations ==============

pub fn record_signature_served(blocks: usize) {
    counter!("deltavault_signatures_served_total").increment(1);
    histogram!("deltavault_signature_blocks").record(blocks as f64);
}

/// Record a delta of `delta_bytes` rebuilding `output_bytes`
pub fn record_patch_applied(delta_bytes: u64, output_bytes: u64) {
    counter!("deltavault_patches_applied_total").increment(1);
    if output_bytes > 0 {
        histogram!("deltavault_delta_compression_ratio")
            .record(delta_bytes as f64 / output_bytes as f64);
    }
}

pub fn record_integrity_failure() {
    counter!("deltavault_integrity_failures_total").increment(1);
}

// ============== Storage Metrics ==============

pub fn record_blob_committed(deduplicated: bool, size: u64) {
    counter!("deltavault_blobs_committed_total").increment(1);
    if deduplicated {
        counter!("deltavault_blobs_deduplicated_total").increment(1);
    } else {
        counter!("deltavault_stored_bytes_total").increment(size);
    }
}

// ============== Cache Metrics ==============

pub fn record_cache_hit() {
    counter!("deltavault_cache_hits_total").increment(1);
}

pub fn record_cache_miss() {
    counter!("deltavault_cache_misses_total").increment(1);
}

pub fn record_cache_admission(size: u64) {
    counter!("deltavault_cache_admissions_total").increment(1);
    histogram!("deltavault_cache_admitted_bytes").record(size as f64);
}

pub fn record_cache_eviction(count: usize, freed_bytes: u64) {
    counter!("deltavault_cache_evictions_total").increment(count as u64);
    counter!("deltavault_cache_evicted_bytes_total").increment(freed_bytes);
}

/// Update cache usage gauges
pub fn set_cache_usage(bytes: u64, entries: usize) {
    gauge!("deltavault_cache_used_bytes").set(bytes as f64);
    gauge!("deltavault_cache_entries").set(entries as f64);
}

pub fn set_cache_degraded(degraded: bool) {
    gauge!("deltavault_cache_degraded").set(if degraded { 1.0 } else { 0.0 });
}
