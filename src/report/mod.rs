//! Report rendering.

pub mod generator;

pub use generator::{
    format_executor_stats, format_gate_stats, format_history, format_recommendation,
    format_regressions, format_report, ReportSnapshot,
};
