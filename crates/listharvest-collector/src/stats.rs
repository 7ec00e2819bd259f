//! Session statistics and summary tables.
//!
//! Headline counts:
//! - Collected: unique validated records in the final dataset
//! - Rejected: records that failed validation
//! - Abandoned: work units lost to worker failures
//!
//! Distributions and numeric summaries are computed over the final dataset.

use std::collections::BTreeMap;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use listharvest_core::fmt_num;
use serde::Serialize;

use crate::state::WorkerCounts;

/// Rows shown per distribution table
const TOP_N: usize = 10;

// =============================================================================
// Numeric summaries
// =============================================================================

/// min / max / mean over one attribute
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl NumericSummary {
    /// `None` when no finite value is present
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for v in values.into_iter().filter(|v| v.is_finite()) {
            count += 1;
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        (count > 0).then(|| Self {
            count,
            min,
            max,
            mean: sum / count as f64,
        })
    }
}

// =============================================================================
// Session statistics
// =============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStatistics {
    pub session_id: String,
    pub stop_reason: String,
    pub target_count: usize,
    /// Records in the final dataset (restored included)
    pub collected: usize,
    pub restored: usize,
    pub rejected: usize,
    pub rejections: BTreeMap<String, usize>,
    pub units_total: usize,
    pub units_done: usize,
    pub units_abandoned: usize,
    pub workers_total: usize,
    pub workers_failed: usize,
    /// Counters summed over all workers
    pub totals: WorkerCounts,
    /// Repeated fingerprints dropped while merging
    pub repeated_fingerprints: usize,
    pub elapsed_secs: f64,
    pub price: Option<NumericSummary>,
    pub area: Option<NumericSummary>,
    pub price_per_area: Option<NumericSummary>,
    pub rooms: Option<NumericSummary>,
    pub categories: BTreeMap<String, usize>,
    pub locations: BTreeMap<String, usize>,
}

impl SessionStatistics {
    /// Valid records collected this session per second
    pub fn throughput(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.totals.valid as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }

    /// Format summary tables as a string.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new(format!("Session {}", self.session_id))
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
                Cell::new("%").fg(Color::Cyan),
            ]);

        let attempted = self.totals.attempted;
        table.add_row(vec![
            Cell::new("Stop reason"),
            Cell::new(&self.stop_reason),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Collected").fg(Color::Green),
            Cell::new(format!(
                "{} / {}",
                fmt_num(self.collected),
                fmt_num(self.target_count)
            ))
            .fg(Color::Green),
            Cell::new(format!("{:.1}", pct(self.collected, self.target_count))).fg(Color::Green),
        ]);
        table.add_row(vec![
            Cell::new("  restored"),
            Cell::new(fmt_num(self.restored)),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Attempts"),
            Cell::new(fmt_num(attempted)),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Rejected"),
            Cell::new(fmt_num(self.rejected)),
            Cell::new(format!("{:.1}", pct(self.rejected, attempted))),
        ]);
        for (reason, n) in &self.rejections {
            table.add_row(vec![
                Cell::new(format!("  {reason}")),
                Cell::new(fmt_num(*n)),
                Cell::new(""),
            ]);
        }
        table.add_row(vec![
            Cell::new("Duplicates"),
            Cell::new(format!(
                "{} exact, {} near",
                fmt_num(self.totals.duplicates),
                fmt_num(self.totals.near_duplicates)
            )),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Not found"),
            Cell::new(fmt_num(self.totals.not_found)),
            Cell::new(format!("{:.1}", pct(self.totals.not_found, attempted))),
        ]);
        table.add_row(vec![
            Cell::new("Mismatched / skipped"),
            Cell::new(format!(
                "{} / {}",
                fmt_num(self.totals.mismatched),
                fmt_num(self.totals.skipped)
            )),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Retries"),
            Cell::new(fmt_num(self.totals.retried)),
            Cell::new(format!("{:.1}", pct(self.totals.retried, attempted))),
        ]);
        table.add_row(vec![
            Cell::new("Units"),
            Cell::new(format!(
                "{}/{} ({} abandoned)",
                self.units_done, self.units_total, self.units_abandoned
            )),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Workers"),
            Cell::new(format!(
                "{} ({} failed)",
                self.workers_total, self.workers_failed
            )),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(format!(
                "{:.1}s ({:.2} records/s)",
                self.elapsed_secs,
                self.throughput()
            )),
            Cell::new(""),
        ]);

        let mut out = format!("\n{table}");
        if let Some(numeric) = self.numeric_table() {
            out.push_str(&format!("\n{numeric}"));
        }
        if !self.categories.is_empty() {
            out.push_str(&format!(
                "\n{}",
                distribution_table("Category", &self.categories, self.collected)
            ));
        }
        if !self.locations.is_empty() {
            out.push_str(&format!(
                "\n{}",
                distribution_table("Location", &self.locations, self.collected)
            ));
        }
        if self.repeated_fingerprints > 0 {
            out.push_str(&format!(
                "\n  Repeated fingerprints dropped: {}",
                fmt_num(self.repeated_fingerprints)
            ));
        }
        out
    }

    fn numeric_table(&self) -> Option<Table> {
        let rows: Vec<(&str, NumericSummary)> = [
            ("price", self.price),
            ("area", self.area),
            ("price / area", self.price_per_area),
            ("rooms", self.rooms),
        ]
        .into_iter()
        .filter_map(|(name, s)| s.map(|s| (name, s)))
        .collect();
        if rows.is_empty() {
            return None;
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Attribute")
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Count").fg(Color::Cyan),
                Cell::new("Min").fg(Color::Cyan),
                Cell::new("Mean").fg(Color::Cyan),
                Cell::new("Max").fg(Color::Cyan),
            ]);
        for (name, s) in rows {
            table.add_row(vec![
                Cell::new(name),
                Cell::new(fmt_num(s.count)),
                Cell::new(format!("{:.1}", s.min)),
                Cell::new(format!("{:.1}", s.mean)),
                Cell::new(format!("{:.1}", s.max)),
            ]);
        }
        Some(table)
    }

    /// Print tables above the progress bars (TTY mode).
    pub fn print(&self) {
        eprintln!("{}", self.format_table());
    }

    /// Log minimal summary (non-TTY mode).
    pub fn log(&self) {
        log::info!(
            "{} finished ({}): {} collected / {} target, {} rejected, {} units abandoned [{:.1}s]",
            self.session_id,
            self.stop_reason,
            fmt_num(self.collected),
            fmt_num(self.target_count),
            fmt_num(self.rejected),
            self.units_abandoned,
            self.elapsed_secs
        );
    }
}

fn distribution_table(title: &str, counts: &BTreeMap<String, usize>, total: usize) -> Table {
    let mut sorted: Vec<(&String, &usize)> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title)
                .fg(Color::Cyan)
                .add_attribute(comfy_table::Attribute::Bold),
            Cell::new("Records").fg(Color::Cyan),
            Cell::new("%").fg(Color::Cyan),
        ]);
    for (name, n) in sorted.iter().take(TOP_N) {
        table.add_row(vec![
            Cell::new(name.as_str()),
            Cell::new(fmt_num(**n)),
            Cell::new(format!("{:.1}", pct(**n, total))),
        ]);
    }
    if sorted.len() > TOP_N {
        let rest: usize = sorted.iter().skip(TOP_N).map(|(_, n)| **n).sum();
        table.add_row(vec![
            Cell::new(format!("({} more)", sorted.len() - TOP_N)),
            Cell::new(fmt_num(rest)),
            Cell::new(format!("{:.1}", pct(rest, total))),
        ]);
    }
    table
}

fn pct(part: usize, total: usize) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}
