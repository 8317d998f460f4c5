//! Markdown summary generation
//!
//! This module generates human-readable markdown summaries of the persisted
//! crawl: overall totals, per-partition progress, and the largest categories
//! and attribution names.

use crate::output::stats::CrawlStatistics;
use crate::output::OutputResult;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Writes a markdown summary of `stats` to `output_path`
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote markdown summary
/// * `Err(OutputError)` - Failed to write summary
pub fn generate_markdown_summary(stats: &CrawlStatistics, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_summary(stats);

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats crawl statistics as markdown
pub fn format_markdown_summary(stats: &CrawlStatistics) -> String {
    let mut md = String::new();

    md.push_str("# Gleaner Crawl Summary\n\n");

    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **Total Records**: {}\n", stats.total_records));
    md.push_str(&format!("- **Completed Pages**: {}\n", stats.completed_pages));
    md.push_str(&format!(
        "- **Unresolved Records**: {}\n",
        stats.unresolved_records
    ));
    if let Some(percent) = stats.completion_percent() {
        md.push_str(&format!("- **Completion**: {:.1}%\n", percent));
    }
    match stats.success_rate() {
        Some(rate) => md.push_str(&format!(
            "- **Success Rate**: {:.2}% ({} / {} detail fetches)\n",
            rate, stats.successes, stats.attempts
        )),
        None => md.push_str("- **Success Rate**: n/a\n"),
    }
    if let Some(updated) = stats.last_updated {
        md.push_str(&format!("- **Last Updated**: {}\n", updated.to_rfc3339()));
    }
    md.push('\n');

    md.push_str("## Partitions\n\n");
    md.push_str("| Partition | Completed Pages | Planned | Completion | Records | Unresolved |\n");
    md.push_str("|-----------|-----------------|---------|------------|---------|------------|\n");
    for partition in &stats.partitions {
        let planned = partition
            .planned_pages
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        let completion = partition
            .completion_percent()
            .map_or_else(|| "-".to_string(), |p| format!("{:.1}%", p));
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            partition.name,
            partition.completed_pages,
            planned,
            completion,
            partition.records,
            partition.unresolved
        ));
    }
    md.push('\n');

    if !stats.top_categories.is_empty() {
        md.push_str("## Top 20 Categories\n\n");
        md.push_str("| Category | Records |\n");
        md.push_str("|----------|---------|\n");
        for (category, count) in stats.top_categories.iter().take(20) {
            md.push_str(&format!("| {} | {} |\n", escape_cell(category), count));
        }
        md.push('\n');
    }

    if !stats.top_attributions.is_empty() {
        md.push_str("## Top 20 Attributions\n\n");
        md.push_str("| Attribution | Records |\n");
        md.push_str("|-------------|---------|\n");
        for (name, count) in stats.top_attributions.iter().take(20) {
            md.push_str(&format!("| {} | {} |\n", escape_cell(name), count));
        }
        md.push('\n');
    }

    md
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}
