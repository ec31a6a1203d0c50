//! Markdown report generation.
//!
//! [`MarkdownGenerator`] renders a [`LessonReport`] as a study sheet: summary
//! metrics, the lesson content with its key terms and reflection questions,
//! per-cycle performance and what to review next.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use synapse_report::{LessonReport, MarkdownGenerator, NodeInput, ReportInput, ReportStatus};
//!
//! let input = ReportInput {
//!     topic: "Tides".to_string(),
//!     difficulty: "beginner".to_string(),
//!     status: ReportStatus::InProgress,
//!     completed_cycles: 0,
//!     completed_at: None,
//!     generated_at: Utc::now(),
//!     nodes: vec![NodeInput::new("moon", "The Moon's Pull")],
//!     attempts: vec![],
//! };
//! let report = LessonReport::build(&input).unwrap();
//!
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("# Synapse Lesson Report: Tides"));
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{LessonReport, NodeReport};

/// Generates Markdown reports from a finished or interrupted lesson.
#[derive(Debug)]
pub struct MarkdownGenerator<'a> {
    report: &'a LessonReport,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a LessonReport) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_content(&mut output);
        self.write_cycles(&mut output);
        self.write_review(&mut output);
        self.write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# Synapse Lesson Report: {}\n",
            escape_markdown(&self.report.topic)
        );
    }

    /// Writes the summary section with metrics table.
    fn write_summary(&self, output: &mut String) {
        let report = self.report;
        let summary = &report.summary;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Status | {} |", report.status.description());
        let _ = writeln!(
            output,
            "| Difficulty | {} |",
            escape_markdown(&report.difficulty)
        );
        let _ = writeln!(output, "| Nodes | {} |", summary.total_nodes);
        let _ = writeln!(output, "| Recall Cycles | {} |", summary.completed_cycles);
        let _ = writeln!(output, "| Attempts | {} |", summary.total_attempts);
        let _ = writeln!(
            output,
            "| Average Score | {} |",
            format_optional_percent(summary.average_score)
        );
        let _ = writeln!(
            output,
            "| Average Grade Points | {} |",
            summary
                .average_grade_points
                .map_or_else(|| "-".to_string(), |points| format!("{points:.2}"))
        );
        let _ = writeln!(
            output,
            "| Vocabulary Mastery | {} |",
            format_optional_percent(summary.vocabulary_mastery)
        );
        if let Some(completed_at) = &report.completed_at {
            let _ = writeln!(output, "| Completed | {} |", format_timestamp(completed_at));
        }
        let _ = writeln!(output);
    }

    fn write_content(&self, output: &mut String) {
        let _ = writeln!(output, "## Lesson Content\n");

        if self.report.nodes.is_empty() {
            let _ = writeln!(output, "*The lesson has no nodes.*\n");
            return;
        }

        for node in &self.report.nodes {
            Self::write_node(output, node);
        }
    }

    fn write_node(output: &mut String, node: &NodeReport) {
        let _ = writeln!(
            output,
            "### {}. {}\n",
            node.index + 1,
            escape_markdown(&node.title)
        );

        match &node.summary {
            Some(summary) => {
                let _ = writeln!(output, "{}\n", escape_markdown(summary));
            }
            None => {
                let _ = writeln!(output, "*Content was not generated.*\n");
            }
        }

        if !node.vocabulary.is_empty() {
            let _ = writeln!(output, "**Key Terms**:\n");
            for item in &node.vocabulary {
                let _ = writeln!(
                    output,
                    "- **{}**: {}",
                    escape_markdown(&item.term),
                    escape_markdown(&item.definition)
                );
            }
            let _ = writeln!(output);
        }

        if let Some(question) = &node.thinking_question {
            let _ = writeln!(output, "**Reflect**: {}\n", escape_markdown(question));
        }

        if node.attempts > 0 {
            let _ = writeln!(
                output,
                "**Recall**: {} attempt{}, mean score {}\n",
                node.attempts,
                if node.attempts == 1 { "" } else { "s" },
                format_optional_percent(node.average_score)
            );
        }
    }

    fn write_cycles(&self, output: &mut String) {
        let _ = writeln!(output, "## Recall Cycles\n");

        if self.report.cycles.is_empty() {
            let _ = writeln!(output, "*No recall attempts yet.*\n");
            return;
        }

        let _ = writeln!(output, "| Cycle | Attempts | Mean Score | Started |");
        let _ = writeln!(output, "|-------|----------|------------|---------|");
        for cycle in &self.report.cycles {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} |",
                cycle.cycle,
                cycle.attempts,
                format_percent(cycle.average_score),
                format_timestamp(&cycle.started_at)
            );
        }
        let _ = writeln!(output);
    }

    /// Writes weak nodes and vocabulary to review.
    fn write_review(&self, output: &mut String) {
        let _ = writeln!(output, "## What to Review\n");

        if self.report.weak_nodes.is_empty() && self.report.vocabulary_to_review.is_empty() {
            let _ = writeln!(output, "*Nothing flagged. Well done.*\n");
            return;
        }

        if !self.report.weak_nodes.is_empty() {
            let _ = writeln!(output, "### Nodes\n");
            for node in &self.report.weak_nodes {
                let _ = writeln!(
                    output,
                    "- {} ({})",
                    escape_markdown(&node.title),
                    format_percent(node.average_score)
                );
            }
            let _ = writeln!(output);
        }

        if !self.report.vocabulary_to_review.is_empty() {
            let _ = writeln!(output, "### Vocabulary\n");
            let _ = writeln!(output, "| Term | Node | Score |");
            let _ = writeln!(output, "|------|------|-------|");
            for entry in &self.report.vocabulary_to_review {
                let _ = writeln!(
                    output,
                    "| {} | {} | {} |",
                    escape_markdown(&entry.term),
                    escape_markdown(&entry.node_id),
                    format_percent(entry.score)
                );
            }
            let _ = writeln!(output);
        }
    }

    fn write_footer(&self, output: &mut String) {
        let _ = writeln!(output, "---\n");
        let _ = writeln!(
            output,
            "*Generated by Synapse at {}*",
            format_timestamp(&self.report.generated_at)
        );
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats a timestamp as "YYYY-MM-DD HH:MM:SS UTC".
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// 0.634 -> "63%"
fn format_percent(value: f64) -> String {
    format!("{:.0}%", value * 100.0)
}

fn format_optional_percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), format_percent)
}

/// Escapes special Markdown characters in text.
///
/// Newlines become `<br>` so the text can sit in a table cell.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
