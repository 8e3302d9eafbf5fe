//! Text and JSON report generation.
//!
//! Everything here is a pure function of an already computed snapshot;
//! nothing in this module touches the store.

use crate::analysis::Lookup;
use crate::cli::OutputFormat;
use crate::models::{
    ExecutorStats, GateStats, PipelineSummary, Recommendation, Record, RegressionAlert, TagCount,
    WorkItemHistory,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything a full report shows, computed up front.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSnapshot {
    pub generated_at: DateTime<Utc>,
    pub window_days: u32,
    pub pipeline: Lookup<PipelineSummary>,
    pub executors: Vec<(String, Lookup<ExecutorStats>)>,
    pub gates: Vec<(String, Lookup<GateStats>)>,
    pub regressions: Vec<RegressionAlert>,
    pub recommendations: Vec<Recommendation>,
}

/// Render a snapshot in the requested format.
pub fn format_report(snapshot: &ReportSnapshot, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(generate_text_report(snapshot)),
        OutputFormat::Json => generate_json_report(snapshot),
    }
}

/// Generate the human-readable report.
pub fn generate_text_report(snapshot: &ReportSnapshot) -> String {
    let mut output = String::new();

    output.push_str("LEARNING LOOP REPORT\n");
    output.push_str(&format!(
        "Generated: {} | Window: {} days\n\n",
        snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.window_days
    ));

    output.push_str(&generate_pipeline_section(&snapshot.pipeline));
    output.push_str(&generate_executor_section(&snapshot.executors));
    output.push_str(&generate_gate_section(&snapshot.gates));

    // Only shown when something regressed
    if !snapshot.regressions.is_empty() {
        output.push_str("## Regressions\n\n");
        output.push_str(&format_regressions(&snapshot.regressions));
        output.push('\n');
    }

    output.push_str(&generate_recommendations_section(&snapshot.recommendations));

    output
}

fn generate_pipeline_section(pipeline: &Lookup<PipelineSummary>) -> String {
    let mut section = String::from("## Pipeline Overview\n\n");

    match pipeline {
        Lookup::Ready(summary) => {
            section.push_str(&format!(
                "Runs: {} ({} succeeded, {} failed, {} partial)\n",
                summary.total_runs, summary.succeeded, summary.failed, summary.partial
            ));
            section.push_str(&format!(
                "Success rate: {} | Avg duration: {:.1}s\n",
                percent(summary.success_rate),
                summary.avg_duration_secs
            ));
            if let Some(ratio) = summary.avg_completion_ratio {
                section.push_str(&format!("Avg phase completion: {}\n", percent(ratio)));
            }
            if !summary.recent_lessons.is_empty() {
                section.push_str("Recent lessons:\n");
                for lesson in &summary.recent_lessons {
                    section.push_str(&format!("  - {}\n", lesson));
                }
            }
        }
        other => section.push_str(&format!("{}\n", other.shortfall().unwrap_or_default())),
    }

    section.push('\n');
    section
}

fn generate_executor_section(executors: &[(String, Lookup<ExecutorStats>)]) -> String {
    let mut section = String::from("## Executor Effectiveness\n\n");

    if executors.is_empty() {
        section.push_str("No executors tracked.\n\n");
        return section;
    }

    for (name, lookup) in executors {
        match lookup {
            Lookup::Ready(stats) => section.push_str(&format_executor_stats(stats)),
            other => section.push_str(&format!(
                "{}: {}\n",
                name,
                other.shortfall().unwrap_or_default()
            )),
        }
    }

    section.push('\n');
    section
}

fn generate_gate_section(gates: &[(String, Lookup<GateStats>)]) -> String {
    let mut section = String::from("## Gate Pass Rates\n\n");

    if gates.is_empty() {
        section.push_str("No gates tracked.\n\n");
        return section;
    }

    for (gate, lookup) in gates {
        match lookup {
            Lookup::Ready(stats) => section.push_str(&format_gate_stats(stats)),
            other => section.push_str(&format!(
                "{}: {}\n",
                gate,
                other.shortfall().unwrap_or_default()
            )),
        }
    }

    section.push('\n');
    section
}

fn generate_recommendations_section(recommendations: &[Recommendation]) -> String {
    let mut section = String::from("## Recommendations\n\n");

    if recommendations.is_empty() {
        section.push_str("No categories requested.\n");
        return section;
    }

    for rec in recommendations {
        section.push_str(&format_recommendation(rec));
    }

    section
}

/// One executor's stats, as printed by `executor-stats` and the report.
pub fn format_executor_stats(stats: &ExecutorStats) -> String {
    let mut block = format!(
        "{} {}: {} success ({}/{}), trend {}\n",
        stats.trend.arrow(),
        stats.executor,
        percent(stats.success_rate),
        stats.succeeded,
        stats.total,
        stats.trend
    );

    if let Some(recent) = stats.recent_success_rate {
        block.push_str(&format!("    recent: {}\n", percent(recent)));
    }
    if let Some(avg) = stats.avg_duration_secs {
        block.push_str(&format!("    avg duration: {:.1}s\n", avg));
    }
    if !stats.common_issues.is_empty() {
        block.push_str(&format!("    common issues: {}\n", tag_list(&stats.common_issues)));
    }

    block
}

/// One gate's stats, as printed by `gate-stats` and the report.
pub fn format_gate_stats(stats: &GateStats) -> String {
    let mut block = format!(
        "{}: {} pass ({}/{}), {} auto-fixed\n",
        stats.gate_type,
        percent(stats.pass_rate),
        stats.passed,
        stats.total,
        percent(stats.auto_fix_rate)
    );

    if !stats.failure_patterns.is_empty() {
        block.push_str(&format!(
            "    failure patterns: {}\n",
            tag_list(&stats.failure_patterns)
        ));
    }

    block
}

pub fn format_regressions(alerts: &[RegressionAlert]) -> String {
    if alerts.is_empty() {
        return "No regressions detected.\n".to_string();
    }

    let mut block = String::new();
    for alert in alerts {
        block.push_str(&format!(
            "[{}] {} {}: {} (baseline {}, down {:.1}%)\n",
            alert.kind,
            alert.subject,
            alert.metric,
            percent(alert.current),
            percent(alert.baseline),
            alert.decline_percentage
        ));
        block.push_str(&format!("    suspected cause: {}\n", alert.suspected_cause));
        if !alert.affected_work_items.is_empty() {
            block.push_str(&format!(
                "    affected: {}\n",
                alert.affected_work_items.join(", ")
            ));
        }
    }
    block
}

pub fn format_recommendation(rec: &Recommendation) -> String {
    format!(
        "{} -> {} (confidence {:.2})\n    {}\n",
        rec.category, rec.executor, rec.confidence, rec.rationale
    )
}

/// A work item's log, one line per record, as printed by `history`.
pub fn format_history(history: &WorkItemHistory) -> String {
    let mut block = format!(
        "{}: {} record(s) in the last {} days\n",
        history.work_item_id,
        history.records.len(),
        history.window_days
    );

    for record in &history.records {
        let detail = match record {
            Record::Execution(run) => format!(
                "{} ({}/{} phases) {}",
                run.outcome, run.phases_completed, run.total_phases, run.title
            ),
            Record::UnitOutcome(unit) => format!(
                "{} by {}, {} gate {}",
                unit.outcome,
                unit.executor,
                unit.gate_type,
                if unit.gate_passed { "passed" } else { "failed" }
            ),
            Record::GateFailure(failure) => {
                format!("{} {}", failure.gate_type, failure.error_pattern)
            }
        };
        block.push_str(&format!(
            "  {} {:<12} {}\n",
            record.recorded_at().format("%Y-%m-%d %H:%M:%S"),
            record.kind().to_string(),
            detail
        ));
    }

    block
}

/// Generate a JSON report.
pub fn generate_json_report(snapshot: &ReportSnapshot) -> Result<String> {
    serde_json::to_string_pretty(snapshot).map_err(Into::into)
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

fn tag_list(tags: &[TagCount]) -> String {
    tags.iter()
        .map(|t| format!("{} ({})", t.tag, t.count))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertKind, Trend};

    fn executor_stats() -> ExecutorStats {
        ExecutorStats {
            executor: "backend-builder".to_string(),
            window_days: 90,
            total: 20,
            succeeded: 13,
            failed: 7,
            success_rate: 0.65,
            recent_success_rate: Some(0.3),
            avg_duration_secs: Some(42.0),
            common_issues: vec![TagCount {
                tag: "missing index".to_string(),
                count: 7,
            }],
            trend: Trend::Declining,
            failed_work_items: vec!["WI-1".to_string()],
        }
    }

    fn create_test_snapshot() -> ReportSnapshot {
        ReportSnapshot {
            generated_at: Utc::now(),
            window_days: 90,
            pipeline: Lookup::Ready(PipelineSummary {
                window_days: 90,
                total_runs: 4,
                succeeded: 3,
                failed: 1,
                partial: 0,
                success_rate: 0.75,
                avg_duration_secs: 120.0,
                avg_completion_ratio: Some(0.9),
                recent_lessons: vec!["seed the fixtures first".to_string()],
            }),
            executors: vec![
                ("backend-builder".to_string(), Lookup::Ready(executor_stats())),
                (
                    "frontend-builder".to_string(),
                    Lookup::InsufficientData {
                        samples: 1,
                        required: 3,
                    },
                ),
            ],
            gates: vec![(
                "lint".to_string(),
                Lookup::Unavailable {
                    reason: "disk gone".to_string(),
                },
            )],
            regressions: vec![RegressionAlert {
                kind: AlertKind::Executor,
                subject: "backend-builder".to_string(),
                metric: "success_rate".to_string(),
                baseline: 0.85,
                current: 0.65,
                decline_percentage: 23.53,
                suspected_cause: "missing index".to_string(),
                affected_work_items: vec!["WI-1".to_string()],
                detected_at: Utc::now(),
            }],
            recommendations: vec![Recommendation {
                category: "database".to_string(),
                executor: "backend-builder".to_string(),
                confidence: 0.51,
                rationale: "backend-builder succeeded on 13 of 20 units".to_string(),
                from_history: true,
            }],
        }
    }

    #[test]
    fn test_text_report_sections_in_order() {
        let text = generate_text_report(&create_test_snapshot());

        let headings = [
            "## Pipeline Overview",
            "## Executor Effectiveness",
            "## Gate Pass Rates",
            "## Regressions",
            "## Recommendations",
        ];
        let positions: Vec<usize> = headings
            .iter()
            .map(|h| text.find(h).unwrap_or_else(|| panic!("missing {}", h)))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        assert!(text.contains("65.0% success (13/20)"));
        assert!(text.contains("frontend-builder: insufficient data (1 of 3 samples)"));
        assert!(text.contains("lint: store unavailable: disk gone"));
        assert!(text.contains("down 23.5%"));
        assert!(text.contains("database -> backend-builder (confidence 0.51)"));
    }

    #[test]
    fn test_regressions_section_omitted_when_empty() {
        let mut snapshot = create_test_snapshot();
        snapshot.regressions.clear();
        let text = generate_text_report(&snapshot);
        assert!(!text.contains("## Regressions"));
        assert!(text.contains("## Recommendations"));
    }

    #[test]
    fn test_format_executor_stats() {
        let block = format_executor_stats(&executor_stats());
        assert!(block.starts_with("↓ backend-builder"));
        assert!(block.contains("recent: 30.0%"));
        assert!(block.contains("missing index (7)"));
    }

    #[test]
    fn test_format_regressions_empty() {
        assert_eq!(format_regressions(&[]), "No regressions detected.\n");
    }

    #[test]
    fn test_format_history() {
        let at = Utc::now();
        let history = WorkItemHistory {
            work_item_id: "WI-1".to_string(),
            window_days: 30,
            records: vec![Record::GateFailure(crate::models::GateFailure {
                work_item_id: "WI-1".to_string(),
                unit_id: "u1".to_string(),
                gate_type: "lint".to_string(),
                error_pattern: "unused-import".to_string(),
                error_message: "unused import".to_string(),
                file_location: None,
                suggested_fix: None,
                applied_fix: None,
                auto_fixed: false,
                recorded_at: at,
            })],
        };

        let text = format_history(&history);
        assert!(text.starts_with("WI-1: 1 record(s) in the last 30 days\n"));
        assert!(text.contains("gate_failure"));
        assert!(text.contains("lint unused-import"));

        let json = serde_json::to_value(Lookup::Ready(history)).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["records"][0]["kind"], "gate_failure");
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate_json_report(&create_test_snapshot()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["window_days"], 90);
        assert_eq!(value["pipeline"]["status"], "ready");
        assert_eq!(value["executors"][1][1]["status"], "insufficient_data");
        assert_eq!(value["gates"][0][1]["status"], "unavailable");
        assert_eq!(value["regressions"][0]["subject"], "backend-builder");
    }

    #[test]
    fn test_format_report_dispatch() {
        let snapshot = create_test_snapshot();
        let text = format_report(&snapshot, OutputFormat::Text).unwrap();
        let json = format_report(&snapshot, OutputFormat::Json).unwrap();
        assert!(text.starts_with("LEARNING LOOP REPORT"));
        assert!(json.trim_start().starts_with('{'));
    }
}
