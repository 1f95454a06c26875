use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::quality::QualityPolicy;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "forecast-analytics",
    version,
    about = "Bucket, repair and score solar forecast series"
)]
pub struct Args {
    /// JSON input file; `-` reads stdin.
    #[arg(long, global = true, default_value = "-")]
    pub input: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Group raw samples into time buckets.
    Aggregate {
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        end: DateTime<Utc>,
        /// raw, 15min, 30min, hourly, daily, weekly, monthly or auto.
        #[arg(long)]
        granularity: Option<String>,
        #[arg(long = "metric", required = true)]
        metrics: Vec<String>,
        /// Skip the SQLite grouped query.
        #[arg(long, default_value_t = false)]
        in_memory: bool,
    },
    /// Remove outliers and fill short gaps in a series of points.
    Repair {
        #[arg(long)]
        granularity: String,
        #[arg(long)]
        primary_metric: Option<String>,
    },
    /// Accuracy metrics for (forecast, actual) pairs.
    Accuracy,
    /// Summary statistics and quality distribution for a forecast series.
    Statistics {
        #[arg(long, default_value_t = false)]
        models: bool,
    },
    /// Trend direction and daily seasonality of a forecast series.
    Trend,
    /// Data quality score from sample counts and primary metric statistics.
    Quality {
        #[arg(long)]
        expected: u64,
        #[arg(long)]
        actual: u64,
        #[arg(long)]
        capacity_factor: Option<f64>,
        #[arg(long)]
        availability: Option<f64>,
        #[arg(long, value_enum, default_value_t = PolicyArg::AggregationStatistics)]
        policy: PolicyArg,
    },
    /// Acceptance checks for a forecast against plant capacity.
    Validate {
        #[arg(long)]
        capacity_kw: f64,
        #[arg(long, default_value_t = 1.0)]
        interval_hours: f64,
    },
    /// Aggregate, repair and score raw samples in one pass.
    Pipeline {
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        end: DateTime<Utc>,
        #[arg(long)]
        granularity: Option<String>,
        #[arg(long)]
        forecast_metric: Option<String>,
        #[arg(long)]
        actual_metric: Option<String>,
        #[arg(long, default_value_t = false)]
        models: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    AggregationStatistics,
    SingleSeries,
}

impl From<PolicyArg> for QualityPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::AggregationStatistics => QualityPolicy::AggregationStatistics,
            PolicyArg::SingleSeries => QualityPolicy::SingleSeries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aggregate_with_repeated_metrics() {
        let args = Args::try_parse_from([
            "forecast-analytics",
            "aggregate",
            "--start",
            "2024-06-01T00:00:00Z",
            "--end",
            "2024-06-02T00:00:00Z",
            "--metric",
            "power_mw",
            "--metric",
            "ghi",
            "--input",
            "samples.json",
        ])
        .unwrap();
        assert_eq!(args.input, PathBuf::from("samples.json"));
        match args.command {
            Command::Aggregate {
                metrics,
                granularity,
                in_memory,
                ..
            } => {
                assert_eq!(metrics, vec!["power_mw".to_string(), "ghi".to_string()]);
                assert_eq!(granularity, None);
                assert!(!in_memory);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn quality_policy_defaults_to_aggregation_statistics() {
        let args = Args::try_parse_from([
            "forecast-analytics",
            "quality",
            "--expected",
            "96",
            "--actual",
            "90",
        ])
        .unwrap();
        assert_eq!(args.input, PathBuf::from("-"));
        match args.command {
            Command::Quality { policy, .. } => {
                assert_eq!(QualityPolicy::from(policy), QualityPolicy::AggregationStatistics)
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_timestamps() {
        let result = Args::try_parse_from([
            "forecast-analytics",
            "pipeline",
            "--start",
            "yesterday",
            "--end",
            "2024-06-02T00:00:00Z",
        ]);
        assert!(result.is_err());
    }
}
