//! Batch maintenance over the state document format
//!
//! These run outside a crawl: cleaning unresolved records out of the store,
//! merging several documents into one, keyword search over records, and
//! reporting on the backup chain.

use crate::output::{OutputError, OutputResult};
use crate::state::{CrawlState, Merger, MergeSummary, Record, SanitizePolicy, SanitizeReport};
use crate::storage::{ChainEntry, JsonStore, SaveOutcome, StateStore};
use std::path::PathBuf;
use tracing::info;

/// What `organize` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizeReport {
    pub files: usize,
    pub merge: MergeSummary,
    pub backfilled: usize,
    pub dropped: usize,
    pub records: usize,
    pub coordinates: usize,
}

/// Drops unresolved records from the canonical document and reopens their pages
pub fn clean(store: &JsonStore, policy: &SanitizePolicy) -> OutputResult<SanitizeReport> {
    let mut merger = Merger::new(store.load()?);
    let report = merger.sanitize(&SanitizePolicy {
        lenient: false,
        ..policy.clone()
    });
    write(store, &merger)?;

    info!(
        dropped = report.dropped,
        reopened = report.reopened,
        remaining = merger.len(),
        "Cleaned {}",
        store.path().display()
    );
    Ok(report)
}

/// Merges `inputs` into the store's canonical document
///
/// Records are deduplicated by identity (an unresolved record is replaced by a
/// resolved one with the same identity) and completed coordinates are unioned.
/// Categories are backfilled by display name before anything still unresolved
/// is dropped. Fetch statistics are taken from the first input.
pub fn organize(inputs: &[PathBuf], store: &JsonStore, policy: &SanitizePolicy) -> OutputResult<OrganizeReport> {
    let Some((first, rest)) = inputs.split_first() else {
        return Err(OutputError::Format("no input files given".to_string()));
    };

    let mut merger = Merger::new(JsonStore::read_document(first)?.into_state());
    let mut report = OrganizeReport {
        files: inputs.len(),
        ..OrganizeReport::default()
    };
    report.merge.added = merger.len();

    for path in rest {
        let state = JsonStore::read_document(path)?.into_state();
        for coordinate in state.completed {
            merger.mark_complete(coordinate);
        }
        let summary = merger.merge(state.records);
        info!(
            added = summary.added,
            upgraded = summary.upgraded,
            skipped = summary.skipped,
            "Merged {}",
            path.display()
        );
        report.merge.added += summary.added;
        report.merge.upgraded += summary.upgraded;
        report.merge.skipped += summary.skipped;
    }

    report.backfilled = merger.backfill_categories();
    report.dropped = merger
        .sanitize(&SanitizePolicy {
            lenient: false,
            ..policy.clone()
        })
        .dropped;
    report.records = merger.len();
    report.coordinates = merger.state().completed.len();

    write(store, &merger)?;
    Ok(report)
}

/// Matches returned by `search` when no limit is given
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Finds records that contain every keyword
///
/// Keywords match case-insensitively as substrings of the display name,
/// category, attribution, or composite description. Blank keywords are
/// ignored, so an empty list matches everything. At most `limit` records are
/// returned, in stored order.
pub fn search<'a>(state: &'a CrawlState, keywords: &[String], limit: usize) -> Vec<&'a Record> {
    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();

    state
        .records
        .iter()
        .filter(|record| {
            let text = [
                &record.display_name,
                &record.category,
                &record.attribution_name,
                &record.composite_description,
            ]
            .map(|field| field.to_lowercase())
            .join(" ");
            keywords.iter().all(|k| text.contains(k.as_str()))
        })
        .take(limit)
        .collect()
}

/// Prints search matches to stdout
pub fn print_search_results(keywords: &[String], matches: &[&Record]) {
    if matches.is_empty() {
        println!("No records match {:?}", keywords);
        return;
    }

    println!("=== {} matches for {:?} ===", matches.len(), keywords);
    for (i, record) in matches.iter().enumerate() {
        println!("\n{}. {}", i + 1, record.composite_description);
        println!("   Category: {}", record.category);
        println!("   By: {}", record.attribution_name);
        println!("   Page: {}", record.coordinate());
        println!("   Image: {}", record.identity);
        if !record.detail_ref.is_empty() {
            println!("   Detail: {}", record.detail_ref);
        }
    }
}

/// Inspects every file in the backup chain
pub fn recover(store: &JsonStore) -> Vec<ChainEntry> {
    store.inspect_chain()
}

/// Prints a chain inspection report to stdout
pub fn print_recovery(entries: &[ChainEntry]) {
    println!("=== Backup Chain ===\n");
    for entry in entries {
        print!("{}: ", entry.path.display());
        match (&entry.document, &entry.error) {
            (Some(document), _) => {
                let updated = document
                    .last_updated
                    .map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339());
                println!(
                    "ok, {} records, {} completed pages, last updated {}",
                    document.records.len(),
                    document.completed_coordinates.len(),
                    updated
                );
            }
            (None, Some(error)) => println!("UNREADABLE ({})", error),
            (None, None) => println!("missing"),
        }
    }

    let best = entries.iter().find(|e| e.document.is_some());
    match best {
        Some(entry) => println!("\nA resumed crawl would load {}", entry.path.display()),
        None => println!("\nNo readable state; a crawl would start empty (or fail if files are corrupt)"),
    }
}

fn write(store: &JsonStore, merger: &Merger) -> OutputResult<()> {
    match store.save(merger.state())? {
        SaveOutcome::Written => Ok(()),
        SaveOutcome::Skipped => Err(OutputError::Write(format!(
            "another save to {} was in progress",
            store.path().display()
        ))),
    }
}
