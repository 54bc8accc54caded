//! Prompt Composer - builds the recommendation prompt for a breached threshold
//!
//! The prompt is pure string construction: the same breach always yields the
//! same bytes, so generation results can be compared or cached by prompt.

use crate::aggregate::AggregateFunction;
use crate::condition::ComparisonOperator;
use serde::{Deserialize, Serialize};

/// Role and task framing sent ahead of every breach
pub const PREAMBLE: &str = "You are an intelligent system monitoring assistant. Your task is to provide concise and actionable \
recommendations when a system metric breaches a predefined threshold.";

pub const CLOSING: &str = "Based on this, provide a single, direct, and actionable recommendation for a system administrator or user. \
Avoid asking questions or providing lengthy explanations. Focus only on the solution.";

/// Example phrasings for columns whose name matches one of `patterns`
#[derive(Debug, Clone, Copy)]
pub struct DomainHint {
    pub name: &'static str,
    /// Lower-case substrings matched against the lower-cased column name
    pub patterns: &'static [&'static str],
    pub examples: &'static [&'static str],
}

/// Checked in order; the first matching group wins.
pub const DOMAIN_HINTS: &[DomainHint] = &[
    DomainHint {
        name: "cpu",
        patterns: &["cpu usage", "cpu_usage"],
        examples: &[
            "If CPU usage is high, common recommendations include 'Identify and terminate resource-intensive applications or processes.', \
'Review recent code deployments or system updates.', or 'Consider scaling up CPU resources.'",
            "If active processes are unusually high, suggest 'Investigate unusual process spikes or potential malware.'",
            "If memory usage is high, suggest 'Optimize memory-hungry services or add more RAM.'",
            "If disk space is low, suggest 'Clean up temporary files and old logs, or unnecessary data.'",
        ],
    },
    DomainHint {
        name: "memory",
        patterns: &["memory usage", "memory_usage"],
        examples: &[
            "If memory usage is high, common recommendations include 'Identify memory-leaking applications and restart them.', \
'Optimize memory-hungry services or configurations.', or 'Consider increasing server RAM.'",
        ],
    },
    DomainHint {
        name: "disk",
        patterns: &["disk space", "disk_space"],
        examples: &[
            "If disk space is low, common recommendations include 'Clear temporary files, old logs, and caches.', \
'Review large files and relocate or delete unnecessary data.', or 'Consider expanding storage capacity.'",
        ],
    },
    DomainHint {
        name: "processes",
        patterns: &["processes"],
        examples: &[
            "If the number of processes is high, common recommendations include 'Identify and stop unnecessary background processes.', \
'Check for runaway processes or misconfigured services.', or 'Scan for malware or rootkits.'",
        ],
    },
];

/// Everything the composer needs to know about one breach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreachContext {
    pub table_name: String,
    /// Storage column names of the loaded table, in load order
    pub schema: Vec<String>,
    /// Original (display) name of the breached column
    pub column_name: String,
    pub function: AggregateFunction,
    pub current_value: f64,
    pub operator: ComparisonOperator,
    pub threshold_value: f64,
}

/// Find the hint group for a column, if any.
pub fn match_domain_hint(column_name: &str) -> Option<&'static DomainHint> {
    let lowered = column_name.to_lowercase();
    DOMAIN_HINTS
        .iter()
        .find(|hint| hint.patterns.iter().any(|p| lowered.contains(p)))
}

pub fn compose_prompt(ctx: &BreachContext) -> String {
    let mut prompt = String::new();

    prompt.push_str(PREAMBLE);
    prompt.push_str("\n\n");

    prompt.push_str(&format!(
        "The current system data is from a table named '{}' with the following columns: [{}].\n",
        ctx.table_name,
        ctx.schema.join(", ")
    ));

    prompt.push_str(&format!(
        "A critical threshold has been breached: The {} of column '{}' is {}, which is {} {}.\n\n",
        ctx.function, ctx.column_name, ctx.current_value, ctx.operator, ctx.threshold_value
    ));

    if let Some(hint) = match_domain_hint(&ctx.column_name) {
        prompt.push_str("Here are some examples of the type of recommendations expected:\n");
        for example in hint.examples {
            prompt.push_str("- ");
            prompt.push_str(example);
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str(CLOSING);
    prompt.push_str(" Provide exactly one recommendation, clearly and concisely, without follow-up questions.");

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(column: &str) -> BreachContext {
        BreachContext {
            table_name: "metrics".to_string(),
            schema: vec!["Timestamp".to_string(), column.to_string()],
            column_name: column.to_string(),
            function: AggregateFunction::Avg,
            current_value: 41.5,
            operator: ComparisonOperator::Gt,
            threshold_value: 40.0,
        }
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let ctx = context("CPU_Usage");
        assert_eq!(compose_prompt(&ctx), compose_prompt(&ctx.clone()));
    }

    #[test]
    fn test_prompt_sections_in_order() {
        let prompt = compose_prompt(&context("CPU_Usage"));

        let preamble = prompt.find("monitoring assistant").unwrap();
        let schema = prompt.find("[Timestamp, CPU_Usage]").unwrap();
        let breach = prompt
            .find("The AVG of column 'CPU_Usage' is 41.5, which is > 40.")
            .unwrap();
        let hints = prompt.find("scaling up CPU resources").unwrap();
        let closing = prompt.find("single, direct, and actionable").unwrap();

        assert!(preamble < schema && schema < breach && breach < hints && hints < closing);
    }

    #[test]
    fn test_hint_selection() {
        assert_eq!(match_domain_hint("CPU_Usage").map(|h| h.name), Some("cpu"));
        assert_eq!(match_domain_hint("Cpu usage").map(|h| h.name), Some("cpu"));
        assert_eq!(match_domain_hint("memory_usage_mb").map(|h| h.name), Some("memory"));
        assert_eq!(match_domain_hint("Disk space").map(|h| h.name), Some("disk"));
        assert_eq!(match_domain_hint("Active_Processes").map(|h| h.name), Some("processes"));
        assert!(match_domain_hint("Revenue").is_none());
    }

    #[test]
    fn test_unmatched_column_has_no_hint_block() {
        let prompt = compose_prompt(&context("Revenue"));
        assert!(!prompt.contains("examples of the type of recommendations"));
        assert!(!prompt.contains("\n- "));
    }

    #[test]
    fn test_first_matching_group_wins() {
        // Both CPU and process patterns occur; CPU is checked first
        let prompt = compose_prompt(&context("cpu_usage_of_processes"));
        assert!(prompt.contains("scaling up CPU resources"));
        assert!(!prompt.contains("Scan for malware or rootkits"));
    }

    #[test]
    fn test_hint_groups_carry_one_to_four_examples() {
        for hint in DOMAIN_HINTS {
            assert!((1..=4).contains(&hint.examples.len()), "{}", hint.name);
        }
    }
}
