use anyhow::{Context, Result};
use clap::Parser;
use forecast_analytics::accuracy;
use forecast_analytics::aggregate::{AggregationRequest, SqliteBucketStore, TimeBucketAggregator};
use forecast_analytics::cli::{Args, Command};
use forecast_analytics::config::AnalyticsConfig;
use forecast_analytics::granularity::{parse_requested, AggregationGranularity};
use forecast_analytics::model::{
    ForecastObservationPair, ForecastPoint, SeriesPoint, TimeSeriesSample,
};
use forecast_analytics::pipeline::{AnalyticsPipeline, PipelineRequest};
use forecast_analytics::quality::{self, PrimaryMetricStats};
use forecast_analytics::repair::SeriesRepairProcessor;
use forecast_analytics::statistics::{quality_distribution, ForecastStatisticsAnalyzer};
use forecast_analytics::validation::{ForecastValidator, ValidationThresholds};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::io::Read;
use std::path::Path;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn read_input<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read JSON input from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?
    };
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse JSON input from {}", path.display()))
}

fn run(args: Args, config: AnalyticsConfig) -> Result<Value> {
    let input = args.input.as_path();
    let output = match args.command {
        Command::Aggregate {
            start,
            end,
            granularity,
            metrics,
            in_memory,
        } => {
            let samples: Vec<TimeSeriesSample> = read_input(input)?;
            let request = AggregationRequest {
                start,
                end,
                granularity: parse_requested(granularity.as_deref())?,
                metrics,
            };
            let aggregator = TimeBucketAggregator::from_config(&config);
            if in_memory {
                let buckets = aggregator.aggregate(&samples, &request)?;
                json!({
                    "granularity": request.resolved_granularity(),
                    "buckets": buckets,
                })
            } else {
                let store = SqliteBucketStore::in_memory()
                    .context("failed to open in-memory sqlite bucket store")?;
                serde_json::to_value(aggregator.aggregate_with_store(&store, &samples, &request)?)?
            }
        }
        Command::Repair {
            granularity,
            primary_metric,
        } => {
            let granularity: AggregationGranularity = granularity.parse()?;
            let points: Vec<SeriesPoint> = read_input(input)?;
            let mut processor = SeriesRepairProcessor::from_config(&config);
            if let Some(metric) = primary_metric {
                processor.primary_metric = metric;
            }
            let (points, summary) = processor.repair(&points, granularity);
            json!({ "summary": summary, "points": points })
        }
        Command::Accuracy => {
            let pairs: Vec<ForecastObservationPair> = read_input(input)?;
            let metrics = accuracy::calculate(&pairs);
            json!({
                "metrics": metrics,
                "weightedScore": accuracy::weighted_accuracy_score(&metrics),
            })
        }
        Command::Statistics { models } => {
            let series: Vec<ForecastPoint> = read_input(input)?;
            let analyzer = ForecastStatisticsAnalyzer::from_config(&config);
            json!({
                "statistics": analyzer.statistics(&series, models),
                "qualityDistribution": quality_distribution(&series),
            })
        }
        Command::Trend => {
            let series: Vec<ForecastPoint> = read_input(input)?;
            let analyzer = ForecastStatisticsAnalyzer::from_config(&config);
            serde_json::to_value(analyzer.trend_analysis(&series))?
        }
        Command::Quality {
            expected,
            actual,
            capacity_factor,
            availability,
            policy,
        } => {
            let stats = PrimaryMetricStats {
                mean_capacity_factor: capacity_factor,
                mean_availability: availability,
            };
            serde_json::to_value(quality::score(expected, actual, &stats, policy.into()))?
        }
        Command::Validate {
            capacity_kw,
            interval_hours,
        } => {
            let series: Vec<ForecastPoint> = read_input(input)?;
            let validator = ForecastValidator::new(ValidationThresholds {
                interval_hours,
                ..ValidationThresholds::default()
            });
            serde_json::to_value(validator.validate(&series, capacity_kw))?
        }
        Command::Pipeline {
            start,
            end,
            granularity,
            forecast_metric,
            actual_metric,
            models,
        } => {
            let samples: Vec<TimeSeriesSample> = read_input(input)?;
            let request = PipelineRequest {
                start,
                end,
                granularity: parse_requested(granularity.as_deref())?,
                forecast_metric,
                actual_metric,
                with_model_breakdown: models,
            };
            serde_json::to_value(AnalyticsPipeline::from_config(config).run(&samples, &request)?)?
        }
    };
    Ok(output)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = AnalyticsConfig::from_env()?;
    tracing::debug!(?config, "forecast-analytics configuration loaded");

    let output = run(args, config)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
