//! pothole_markers - classify a telemetry snapshot into map markers

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;

use pothole_telemetry::{
    api::MarkerReport, client, MarkerPipeline, ParseMode, SeverityCategory, SeverityPolicy,
    TelemetrySnapshot,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Snapshot document to classify (gps_log / accelerometer_log / gyroscope_log).
    /// Takes precedence over --url.
    #[arg(long)]
    input: Option<String>,
    /// Collection server to fetch the snapshot from.
    #[arg(long, env = "POTHOLE_SERVER_URL")]
    url: Option<String>,
    /// Output file for the marker report; stdout when omitted.
    #[arg(long)]
    output: Option<String>,
    /// Reject the snapshot on malformed records instead of repairing them.
    /// The env value takes the same 1/0, yes/no, on/off forms as potholed.
    #[arg(
        long,
        env = "POTHOLE_STRICT_PARSING",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    strict: bool,
    /// Peak reading above which a pothole is Moderate.
    #[arg(long, default_value_t = pothole_telemetry::classify::DEFAULT_MODERATE_ABOVE)]
    moderate_above: f64,
    /// Peak reading above which a pothole is Severe.
    #[arg(long, default_value_t = pothole_telemetry::classify::DEFAULT_SEVERE_ABOVE)]
    severe_above: f64,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto, value_name = "MODE")]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(
        args.ui,
        std::io::stderr().is_terminal(),
        args.output.is_none() && !std::io::stdout().is_terminal(),
    );

    let policy = SeverityPolicy {
        moderate_above: args.moderate_above,
        severe_above: args.severe_above,
        ..SeverityPolicy::default()
    };
    policy.validate()?;
    let mode = if args.strict {
        ParseMode::Strict
    } else {
        ParseMode::Permissive
    };

    let snapshot = {
        let _stage = ui.stage("Load snapshot");
        match (&args.input, &args.url) {
            (Some(path), _) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| anyhow!("failed to read snapshot {}: {}", path, e))?;
                TelemetrySnapshot::from_json(&raw)?
            }
            (None, Some(url)) => client::fetch_snapshot(url)?,
            (None, None) => return Err(anyhow!("one of --input or --url is required")),
        }
    };

    let markers = {
        let _stage = ui.stage("Classify detections");
        MarkerPipeline::new(policy).with_mode(mode).run(&snapshot)?
    };
    let summary = [
        SeverityCategory::Severe,
        SeverityCategory::Moderate,
        SeverityCategory::Minor,
    ]
    .map(|category| format!("{}={}", category, markers.count(category)))
    .join(" ");

    let json = serde_json::to_vec_pretty(&MarkerReport::from(markers))?;
    match &args.output {
        Some(path) => {
            let _stage = ui.stage("Write marker report");
            std::fs::write(path, json)?;
            eprintln!("marker report written to {path} ({summary})");
        }
        None => {
            println!("{}", String::from_utf8_lossy(&json));
            eprintln!("{summary}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_env_accepts_boolish_values() {
        let parse = || Args::try_parse_from(["pothole_markers", "--input", "snap.json"]);

        for (value, expected) in [
            ("1", true),
            ("yes", true),
            ("on", true),
            ("true", true),
            ("0", false),
            ("no", false),
            ("off", false),
        ] {
            std::env::set_var("POTHOLE_STRICT_PARSING", value);
            let args = parse().unwrap_or_else(|e| panic!("{value}: {e}"));
            assert_eq!(args.strict, expected, "POTHOLE_STRICT_PARSING={value}");
        }

        std::env::set_var("POTHOLE_STRICT_PARSING", "sometimes");
        assert!(parse().is_err());

        std::env::remove_var("POTHOLE_STRICT_PARSING");
        assert!(!parse().unwrap().strict);
        let flagged = Args::try_parse_from(["pothole_markers", "--input", "snap.json", "--strict"]);
        assert!(flagged.unwrap().strict);
    }
}
