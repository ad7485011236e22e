//! Two-document report builder.
//!
//! Shared lines go to both the summary and the full report; detail lines go
//! to the full report only. Every summary line is therefore also a full
//! report line.

use crate::models::ArtifactLocation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ReportBuilder {
    summary: Vec<String>,
    full: Vec<String>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_shared(&mut self, line: impl Into<String>) -> &mut Self {
        let line = line.into();
        self.summary.push(line.clone());
        self.full.push(line);
        self
    }

    pub fn add_detail(&mut self, line: impl Into<String>) -> &mut Self {
        self.full.push(line.into());
        self
    }

    pub fn add_details<I, S>(&mut self, lines: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.full.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn finish(self) -> ReportDocuments {
        ReportDocuments {
            summary: join_lines(&self.summary),
            full: join_lines(&self.full),
        }
    }
}

fn join_lines(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// The summary and full report texts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocuments {
    pub summary: String,
    pub full: String,
}

impl ReportDocuments {
    /// Append the link to the uploaded full report to the summary.
    pub fn link_artifact(&mut self, location: &ArtifactLocation) {
        self.summary.push_str(&format!(
            "\nFull report: [view]({}) | [download]({})\n",
            location.view_url, location.download_url
        ));
    }
}

/// Every summary line occurs in the full report at least as often.
pub fn summary_is_contained(summary: &str, full: &str) -> bool {
    let mut available: HashMap<&str, usize> = HashMap::new();
    for line in full.lines() {
        *available.entry(line).or_default() += 1;
    }

    summary.lines().all(|line| match available.get_mut(line) {
        Some(count) if *count > 0 => {
            *count -= 1;
            true
        }
        _ => false,
    })
}
