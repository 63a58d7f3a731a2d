use anyhow::Result;
use clap::Parser;
use curve_advisor_rs::collaborators::{
    OsrmRouteProvider, OverpassRoadProvider, RoadAttributeProvider, RouteProvider, StaticRoadProvider,
    StaticRouteProvider,
};
use curve_advisor_rs::config::TurnDetectionVersion;
use curve_advisor_rs::prediction::PredictionSnapshot;
use curve_advisor_rs::route::RoutePolyline;
use curve_advisor_rs::simulation::{RouteBuilder, RoutePlayback};
use curve_advisor_rs::types::LatLon;
use curve_advisor_rs::{AdvisorHandle, AdvisorRuntime, Notice, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(name = "curve_advisor")]
#[command(about = "Drive a simulated vehicle along a route and print curve-speed advice", long_about = None)]
struct Args {
    /// Settings JSON (defaults when omitted)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Route file: JSON array of [lat, lon] pairs
    #[arg(long, conflicts_with_all = ["origin", "destination"])]
    route: Option<PathBuf>,

    /// Start of an OSRM route, "lat,lon"
    #[arg(long, value_parser = parse_lat_lon, requires = "destination")]
    origin: Option<LatLon>,

    /// End of an OSRM route, "lat,lon"
    #[arg(long, value_parser = parse_lat_lon, requires = "origin")]
    destination: Option<LatLon>,

    /// OSRM server used with --origin/--destination (public demo server when omitted)
    #[arg(long)]
    osrm_url: Option<String>,

    /// Look up speed limits and on-road status from Overpass
    #[arg(long)]
    overpass: bool,

    /// Simulated speed [km/h]
    #[arg(long, default_value = "60")]
    speed_kmh: f64,

    /// Position noise added to each fix [m]
    #[arg(long, default_value = "2")]
    noise_m: f64,

    /// Interval between simulated fixes [ms]
    #[arg(long, default_value = "1000")]
    fix_interval_ms: i64,

    /// Duration in seconds (0 = until the end of the route)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Override the turn detector (v1, v2)
    #[arg(long)]
    detector: Option<String>,
}

fn parse_lat_lon(s: &str) -> std::result::Result<LatLon, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected \"lat,lon\", got '{}'", s))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("bad latitude: {}", e))?;
    let lon: f64 = lon.trim().parse().map_err(|e| format!("bad longitude: {}", e))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(format!("coordinate out of range: {}, {}", lat, lon));
    }
    Ok(LatLon::new(lat, lon))
}

/// Mountain-road style loop used when no route is given
fn demo_route() -> Result<RoutePolyline> {
    let route = RouteBuilder::new(LatLon::new(46.5, 8.0), 0.0)
        .straight(400.0, 10.0)
        .arc(80.0, 90.0, 5.0)
        .straight(300.0, 10.0)
        .arc(30.0, -150.0, 3.0)
        .straight(250.0, 10.0)
        .turn(-90.0)
        .straight(300.0, 10.0)
        .arc(150.0, 40.0, 10.0)
        .straight(400.0, 10.0)
        .build_route()?;
    Ok(route)
}

fn log_snapshot(snapshot: &PredictionSnapshot) {
    match snapshot.current.as_ref() {
        Some(turn) => log::info!(
            "[gen {}] {} in {:.0} m, {:.0}°, r={:.0} m, advise {} km/h{}",
            snapshot.generation,
            turn.classification.as_str(),
            turn.distance_to_start_m,
            turn.signed_angle_deg,
            turn.radius_m,
            turn.optimal_speed_kmh
                .map(|v| format!("{:.0}", v))
                .unwrap_or_else(|| "-".to_string()),
            match (turn.required_deceleration_g, turn.braking_point_m) {
                (Some(g), Some(at)) => format!(", brake {:.2} g from {:.0} m", g, at),
                (Some(g), None) => format!(", brake {:.2} g", g),
                _ => String::new(),
            },
        ),
        None if snapshot.turns.is_empty() => log::debug!("[gen {}] no turns ahead", snapshot.generation),
        None => log::info!("[gen {}] {} turn(s) ahead", snapshot.generation, snapshot.turns.len()),
    }
}

fn spawn_listeners(handle: &AdvisorHandle) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
    let mut predictions = handle.subscribe_predictions();
    let prediction_task = tokio::spawn(async move {
        loop {
            match predictions.recv().await {
                Ok(snapshot) => log_snapshot(&snapshot),
                Err(RecvError::Lagged(n)) => log::warn!("Prediction listener lagged by {} snapshot(s)", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut notices = handle.subscribe_notices();
    let notice_task = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(Notice::RouteUpdated {
                    route_id,
                    points,
                    rerouted,
                }) => log::info!(
                    "Route {} active ({} points){}",
                    route_id,
                    points,
                    if rerouted { ", rerouted" } else { "" }
                ),
                Ok(Notice::RoutingFailed { reason }) => log::warn!("Routing failed: {}", reason),
                Ok(Notice::GpsUnavailable { fallback }) => log::warn!("GPS unavailable, fallback {:?}", fallback),
                Ok(Notice::GpsRestored) => log::info!("GPS restored"),
                Err(RecvError::Lagged(n)) => log::warn!("Notice listener lagged by {} notice(s)", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    (prediction_task, notice_task)
}

#[tokio::main]
async fn main() -> Result<()> {
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
    if !(args.speed_kmh > 0.0) {
        anyhow::bail!("--speed-kmh must be positive");
    }

    let (route, route_provider): (RoutePolyline, Arc<dyn RouteProvider>) = match (args.origin, args.destination) {
        (Some(origin), Some(destination)) => {
            let osrm = match args.osrm_url.as_deref() {
                Some(url) => OsrmRouteProvider::new(url),
                None => OsrmRouteProvider::public_demo(),
            };
            log::info!("Requesting route {:?} -> {:?} from {}", origin, destination, osrm.base_url());
            let route = osrm.get_route(origin, destination).await?;
            (route, Arc::new(osrm))
        }
        _ => {
            let route = match args.route.as_ref() {
                Some(path) => RoutePolyline::from_json(&std::fs::read_to_string(path)?)?,
                None => demo_route()?,
            };
            let provider = StaticRouteProvider::new(route.points().to_vec());
            (route, Arc::new(provider))
        }
    };
    let destination = route.end();

    let road_provider: Arc<dyn RoadAttributeProvider> = if args.overpass {
        Arc::new(OverpassRoadProvider::new())
    } else {
        Arc::new(StaticRoadProvider::default())
    };

    log::info!(
        "Route: {} points, {:.0} m; detector {:?}; {:.0} km/h",
        route.len(),
        route.total_length_m(),
        settings.turn_detection_version,
        args.speed_kmh
    );

    let (runtime, handle) = AdvisorRuntime::new(settings, route_provider, road_provider);
    let runtime_task = tokio::spawn(runtime.run());
    let (prediction_task, notice_task) = spawn_listeners(&handle);

    handle.set_route(route.clone()).await?;
    handle.set_destination(destination).await?;

    let mut playback = RoutePlayback::new(route, args.speed_kmh / 3.6, args.fix_interval_ms)
        .with_noise(args.noise_m, 0x5eed);
    let mut ticker = interval(Duration::from_millis(args.fix_interval_ms.max(1) as u64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let started = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if args.duration > 0 && started.elapsed() >= Duration::from_secs(args.duration) {
                    log::info!("Duration reached");
                    break;
                }
                let Some(mut fix) = playback.next() else {
                    log::info!("End of route");
                    break;
                };
                fix.timestamp_ms = handle.now_ms();
                handle.submit_fix(fix).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await?;
    runtime_task.await?;
    drop(handle);
    let _ = tokio::join!(prediction_task, notice_task);
    log::info!("Stopped");
    Ok(())
}
