use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use curve_advisor_rs::config::{Settings, TurnDetectionVersion};
use curve_advisor_rs::filters::{FixOutcome, VehicleStateEstimator};
use curve_advisor_rs::prediction::{PredictionContext, PredictionStateManager};
use curve_advisor_rs::route::{DeviationCheck, DeviationDecision, DeviationManager, RoutePolyline, RouteTracker};
use curve_advisor_rs::types::{GpsFix, LatLon, Turn};
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;

/// Offline, deterministic replay of a recorded fix log against a route
#[derive(Parser, Debug)]
struct Args {
    /// Fix log (.json or .json.gz)
    #[arg(long, conflicts_with = "golden_dir")]
    log: Option<PathBuf>,

    /// Directory of logs to batch replay (every *.json[.gz] except the route)
    #[arg(long)]
    golden_dir: Option<PathBuf>,

    /// Route file: JSON array of [lat, lon] pairs
    #[arg(long)]
    route: PathBuf,

    /// Settings JSON (defaults when omitted)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Override the turn detector (v1, v2)
    #[arg(long)]
    detector: Option<String>,

    /// Estimator output rate during replay [Hz]
    #[arg(long, default_value = "10")]
    rate_hz: f64,

    /// Write the summary here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

/// GPS sample as the motion logger records it
#[derive(Deserialize)]
struct GpsData {
    /// Seconds
    timestamp: f64,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    bearing: Option<f64>,
    #[serde(default)]
    accuracy: Option<f64>,
}

#[derive(Deserialize)]
struct Reading {
    gps: Option<GpsData>,
}

/// Either a plain fix list or a logger session with mixed sensor readings
#[derive(Deserialize)]
#[serde(untagged)]
enum LogFile {
    Fixes { fixes: Vec<GpsFix> },
    Readings { readings: Vec<Reading> },
}

impl LogFile {
    fn into_fixes(self) -> Vec<GpsFix> {
        let mut fixes = match self {
            LogFile::Fixes { fixes } => fixes,
            LogFile::Readings { readings } => readings
                .into_iter()
                .filter_map(|r| r.gps)
                .map(|g| GpsFix {
                    position: LatLon::new(g.latitude, g.longitude),
                    speed_mps: g.speed,
                    heading_deg: g.bearing,
                    timestamp_ms: (g.timestamp * 1000.0).round() as i64,
                    accuracy_m: g.accuracy,
                })
                .collect(),
        };
        fixes.sort_by_key(|f| f.timestamp_ms);
        fixes
    }
}

fn load_log(path: &Path) -> anyhow::Result<Vec<GpsFix>> {
    let file = File::open(path)?;
    let log: LogFile = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
    } else {
        serde_json::from_reader(BufReader::new(file))?
    };
    Ok(log.into_fixes())
}

fn turn_summary(turn: &Turn) -> serde_json::Value {
    json!({
        "startIndex": turn.start_index,
        "classification": turn.classification.as_str(),
        "distanceToStartM": turn.distance_to_start_m,
        "radiusM": if turn.radius_m.is_finite() { Some(turn.radius_m) } else { None },
        "angleDeg": turn.signed_angle_deg,
        "optimalSpeedKmh": turn.optimal_speed_kmh,
        "requiredDecelerationG": turn.required_deceleration_g,
        "brakingPointM": turn.braking_point_m,
        "sticky": turn.sticky,
    })
}

fn run_once(path: &Path, route: &RoutePolyline, settings: &Settings, rate_hz: f64) -> anyhow::Result<serde_json::Value> {
    let fixes = load_log(path)?;
    let (Some(first), Some(last)) = (fixes.first(), fixes.last()) else {
        anyhow::bail!("{} contains no GPS fixes", path.display());
    };
    let (start_ms, end_ms) = (first.timestamp_ms, last.timestamp_ms);
    let tick_ms = (1000.0 / rate_hz).round().max(1.0) as i64;

    let mut estimator = VehicleStateEstimator::new(settings.estimator.clone());
    let mut predictions = PredictionStateManager::new(settings);
    let mut deviation = DeviationManager::new(settings.deviation.clone());
    let tracker = RouteTracker::new(route.clone());

    let mut passes = Vec::new();
    let mut turns_seen: BTreeMap<usize, serde_json::Value> = BTreeMap::new();
    let mut invalid_fixes = 0u64;
    let mut reroute_triggers = 0u64;
    let mut max_off_route_m: f64 = 0.0;
    let mut min_decel_g: Option<f64> = None;

    let mut next_fix = 0;
    let mut next_pass_ms = start_ms;
    let mut now = start_ms;
    while now <= end_ms {
        while next_fix < fixes.len() && fixes[next_fix].timestamp_ms <= now {
            match estimator.process_fix(&fixes[next_fix]) {
                Ok(FixOutcome::HardReset { innovation_m }) => {
                    log::debug!("Hard reset at t={} ({:.1} m)", fixes[next_fix].timestamp_ms, innovation_m)
                }
                Ok(_) => {}
                Err(_) => invalid_fixes += 1,
            }
            next_fix += 1;
        }
        let state = estimator.predict_to(now);

        if let (Some(vehicle), true) = (state, now >= next_pass_ms) {
            next_pass_ms += 1000;
            let position = tracker.locate(vehicle.position);
            max_off_route_m = max_off_route_m.max(position.segment_distance_m);

            let check = DeviationCheck {
                auto_recalculate: settings.enable_auto_recalculate,
                has_destination: true,
                on_road: true,
                speed_mps: vehicle.speed_mps,
                position: vehicle.position,
                route: Some(route),
                max_route_deviation_m: settings.max_route_deviation,
            };
            if let DeviationDecision::Recalculate { .. } = deviation.evaluate(now, &check) {
                reroute_triggers += 1;
            }

            let ctx = PredictionContext {
                route,
                position,
                vehicle,
                settings,
                speed_limit_kmh: None,
            };
            let snapshot = predictions.update(&ctx);
            for turn in snapshot.turns.iter() {
                turns_seen.entry(turn.start_index).or_insert_with(|| turn_summary(turn));
            }
            if let Some(g) = snapshot.current.as_ref().and_then(|t| t.required_deceleration_g) {
                min_decel_g = Some(min_decel_g.map_or(g, |m: f64| m.min(g)));
            }

            passes.push(json!({
                "tS": (now - start_ms) as f64 / 1000.0,
                "speedKmh": vehicle.speed_kmh(),
                "headingDeg": vehicle.heading_deg,
                "alongRouteM": position.along_route_m,
                "offRouteM": position.segment_distance_m,
                "turnCount": snapshot.turns.len(),
                "current": snapshot.current.as_ref().map(turn_summary),
            }));
        }
        now += tick_ms;
    }

    let stats = estimator.stats();
    Ok(json!({
        "log": path.display().to_string(),
        "detector": format!("{:?}", predictions.version()),
        "durationS": (end_ms - start_ms) as f64 / 1000.0,
        "fixes": fixes.len(),
        "invalidFixes": invalid_fixes,
        "hardResets": stats.hard_resets,
        "rebases": stats.rebases,
        "finalPositionUncertaintyM": estimator.position_uncertainty_m(),
        "routeLengthM": route.total_length_m(),
        "maxOffRouteM": max_off_route_m,
        "rerouteTriggers": reroute_triggers,
        "strongestDecelerationG": min_decel_g,
        "turns": turns_seen.into_values().collect::<Vec<_>>(),
        "passes": passes,
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match args.settings.as_ref() {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    match args.detector.as_deref() {
        Some("v1") => settings.turn_detection_version = TurnDetectionVersion::V1,
        Some("v2") => settings.turn_detection_version = TurnDetectionVersion::V2,
        Some(other) => anyhow::bail!("Unknown detector '{}', expected v1 or v2", other),
        None => {}
    }
    if !(args.rate_hz > 0.0) {
        anyhow::bail!("--rate-hz must be positive");
    }

    let route = RoutePolyline::from_json(&std::fs::read_to_string(&args.route)?)?;
    let mut results = Vec::new();

    if let Some(dir) = args.golden_dir.as_ref() {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && *path != args.route)
            .filter(|path| {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.ends_with(".json") || name.ends_with(".json.gz")
            })
            .collect();
        paths.sort();
        for path in paths {
            match run_once(&path, &route, &settings, args.rate_hz) {
                Ok(res) => results.push(res),
                Err(e) => log::error!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &route, &settings, args.rate_hz)?);
    } else {
        anyhow::bail!("Provide --log or --golden-dir");
    }

    let summary = serde_json::to_string_pretty(&results)?;
    match args.output.as_ref() {
        Some(path) => {
            std::fs::write(path, summary)?;
            log::info!("Wrote {} replay summaries to {}", results.len(), path.display());
        }
        None => println!("{}", summary),
    }
    Ok(())
}
