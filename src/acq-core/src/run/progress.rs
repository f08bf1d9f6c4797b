// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Raw sample progress and yield counters fed by the acquisition pipeline.
//!
//! All counters only grow within a run. Every update and every read takes
//! one short lock over the whole counter set, so a snapshot is always
//! consistent with a single instant.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Device-wide raw sample counts, aggregated across channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProgress {
    pub acquired: u64,
    pub processed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct YieldSummary {
    pub read_count: u64,
    pub written_read_count: u64,
    pub basecalled_pass_read_count: u64,
    pub basecalled_fail_read_count: u64,
    pub basecalled_skipped_read_count: u64,
    pub basecalled_pass_bases: u64,
    pub basecalled_fail_bases: u64,
    pub basecalled_samples: u64,
    pub selected_raw_samples: u64,
    pub selected_events: u64,
    pub estimated_selected_bases: u64,
    pub bytes_to_write_produced: u64,
    pub bytes_to_write_failed: u64,
    pub bytes_to_write_completed: u64,
}

impl YieldSummary {
    /// Reads that have a basecall outcome, including skipped ones.
    pub fn basecalled_read_count(&self) -> u64 {
        self.basecalled_pass_read_count
            + self.basecalled_fail_read_count
            + self.basecalled_skipped_read_count
    }

    /// Reads seen but not yet basecalled.
    pub fn outstanding_read_count(&self) -> u64 {
        self.read_count.saturating_sub(self.basecalled_read_count())
    }

    pub fn bytes_to_write_pending(&self) -> u64 {
        self.bytes_to_write_produced
            .saturating_sub(self.bytes_to_write_failed + self.bytes_to_write_completed)
    }
}

/// One batch of basecaller output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasecallBatch {
    pub pass_reads: u64,
    pub fail_reads: u64,
    pub pass_bases: u64,
    pub fail_bases: u64,
    pub samples: u64,
}

#[derive(Debug, Default)]
struct Counters {
    raw: RawProgress,
    yields: YieldSummary,
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    counters: Mutex<Counters>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_acquired(&self, samples: u64) {
        let mut c = self.lock();
        c.raw.acquired = c.raw.acquired.saturating_add(samples);
    }

    /// Processed samples are capped at the acquired count.
    pub fn add_processed(&self, samples: u64) {
        let mut c = self.lock();
        c.raw.processed = c.raw.processed.saturating_add(samples).min(c.raw.acquired);
    }

    pub fn add_reads(&self, reads: u64) {
        let mut c = self.lock();
        c.yields.read_count = c.yields.read_count.saturating_add(reads);
    }

    /// Written reads are capped at the number of reads seen.
    pub fn add_written_reads(&self, reads: u64) {
        let mut c = self.lock();
        let y = &mut c.yields;
        y.written_read_count = y.written_read_count.saturating_add(reads).min(y.read_count);
    }

    /// Apply basecaller output. Read outcomes beyond the reads still
    /// outstanding are dropped so the outcome total never exceeds reads seen.
    pub fn record_basecalled(&self, batch: BasecallBatch) {
        let mut c = self.lock();
        let y = &mut c.yields;
        let outstanding = y.outstanding_read_count();
        let pass = batch.pass_reads.min(outstanding);
        let fail = batch.fail_reads.min(outstanding - pass);
        y.basecalled_pass_read_count += pass;
        y.basecalled_fail_read_count += fail;
        y.basecalled_pass_bases = y.basecalled_pass_bases.saturating_add(batch.pass_bases);
        y.basecalled_fail_bases = y.basecalled_fail_bases.saturating_add(batch.fail_bases);
        y.basecalled_samples = y.basecalled_samples.saturating_add(batch.samples);
    }

    pub fn record_selection(&self, raw_samples: u64, events: u64, estimated_bases: u64) {
        let mut c = self.lock();
        let y = &mut c.yields;
        y.selected_raw_samples = y.selected_raw_samples.saturating_add(raw_samples);
        y.selected_events = y.selected_events.saturating_add(events);
        y.estimated_selected_bases = y.estimated_selected_bases.saturating_add(estimated_bases);
    }

    /// Writer byte accounting. Failed plus completed bytes are capped at the
    /// bytes produced.
    pub fn record_write(&self, produced: u64, failed: u64, completed: u64) {
        let mut c = self.lock();
        let y = &mut c.yields;
        y.bytes_to_write_produced = y.bytes_to_write_produced.saturating_add(produced);
        let room = y.bytes_to_write_pending();
        let failed = failed.min(room);
        let completed = completed.min(room - failed);
        y.bytes_to_write_failed += failed;
        y.bytes_to_write_completed += completed;
    }

    /// Count every read without a basecall outcome as skipped. Returns the
    /// number of reads moved.
    pub fn skip_outstanding_reads(&self) -> u64 {
        let mut c = self.lock();
        let outstanding = c.yields.outstanding_read_count();
        c.yields.basecalled_skipped_read_count += outstanding;
        outstanding
    }

    /// Zero all counters. Only done when a new run starts.
    pub fn reset(&self) {
        *self.lock() = Counters::default();
    }

    pub fn snapshot(&self) -> RawProgress {
        self.lock().raw
    }

    pub fn yield_summary(&self) -> YieldSummary {
        self.lock().yields
    }
}
