//! Tick scheduler and composition root
//!
//! One task owns every piece of mutable state and multiplexes the 10 Hz
//! estimator tick, the 1 Hz prediction tick, commands from handles and the
//! results of spawned collaborator requests in a single `select!` loop.
//! Nothing is shared, so nothing is locked; consumers only ever receive
//! owned snapshots.

use crate::collaborators::{RoadAttributeCache, RoadAttributeProvider, RouteProvider};
use crate::config::Settings;
use crate::error::{AdvisorError, ProviderError, Result};
use crate::filters::{FixOutcome, VehicleStateEstimator};
use crate::prediction::{PredictionContext, PredictionSnapshot, PredictionStateManager};
use crate::route::{DeviationCheck, DeviationDecision, DeviationManager, RoutePolyline, RouteTracker};
use crate::types::{GpsFix, LatLon, VehicleState};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior};

const PREDICTION_PERIOD: Duration = Duration::from_secs(1);
/// Minimum spacing of road-attribute lookups [ms]
const ROAD_REFRESH_MS: i64 = 5_000;
/// Silence after which GPS counts as unavailable [ms]
const GPS_TIMEOUT_MS: i64 = 5_000;
const COMMAND_CAPACITY: usize = 256;
const BROADCAST_CAPACITY: usize = 16;

/// Wall-clock milliseconds that advance with the tokio clock
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    epoch_ms: i64,
    started: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            epoch_ms: Utc::now().timestamp_millis(),
            started: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.epoch_ms + self.started.elapsed().as_millis() as i64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// User-visible events
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    /// A route is active; `rerouted` when it replaced a previous one
    RouteUpdated {
        route_id: u64,
        points: usize,
        rerouted: bool,
    },
    RoutingFailed { reason: String },
    /// No fix for a while; advice continues from the fallback position
    GpsUnavailable { fallback: Option<LatLon> },
    GpsRestored,
}

#[derive(Debug)]
enum Command {
    Fix(GpsFix),
    SetDestination(LatLon),
    ClearDestination,
    SetRoute(RoutePolyline),
    UpdateSettings(Box<Settings>),
    Shutdown,
}

/// Result of a spawned collaborator request, re-entering the loop
enum Completion {
    Route {
        seq: u64,
        destination: LatLon,
        result: Result<RoutePolyline>,
    },
    Road {
        speed_limit: std::result::Result<Option<f64>, ProviderError>,
        on_road: std::result::Result<bool, ProviderError>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GpsStatus {
    Waiting,
    Live,
    Lost,
}

/// Clonable command and subscription surface of a running advisor
#[derive(Clone, Debug)]
pub struct AdvisorHandle {
    commands: mpsc::Sender<Command>,
    clock: Clock,
    vehicle: watch::Receiver<Option<VehicleState>>,
    predictions: broadcast::Sender<PredictionSnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl AdvisorHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AdvisorError::RuntimeStopped)
    }

    pub async fn submit_fix(&self, fix: GpsFix) -> Result<()> {
        self.send(Command::Fix(fix)).await
    }

    pub async fn set_destination(&self, destination: LatLon) -> Result<()> {
        self.send(Command::SetDestination(destination)).await
    }

    pub async fn clear_destination(&self) -> Result<()> {
        self.send(Command::ClearDestination).await
    }

    /// Install a route directly, superseding any routing request in flight
    pub async fn set_route(&self, route: RoutePolyline) -> Result<()> {
        self.send(Command::SetRoute(route)).await
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        self.send(Command::UpdateSettings(Box::new(settings))).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    /// Latest vehicle state, refreshed at the estimator output rate
    pub fn subscribe_vehicle(&self) -> watch::Receiver<Option<VehicleState>> {
        self.vehicle.clone()
    }

    /// One snapshot per prediction pass
    pub fn subscribe_predictions(&self) -> broadcast::Receiver<PredictionSnapshot> {
        self.predictions.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Timebase the runtime uses, for stamping fixes
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}

/// Owns the estimator, route, deviation manager, detectors and road cache
pub struct AdvisorRuntime {
    settings: Settings,
    clock: Clock,
    started_ms: i64,

    estimator: VehicleStateEstimator,
    tracker: Option<RouteTracker>,
    destination: Option<LatLon>,
    deviation: DeviationManager,
    predictions: PredictionStateManager,
    road_cache: RoadAttributeCache,

    route_provider: Arc<dyn RouteProvider>,
    road_provider: Arc<dyn RoadAttributeProvider>,
    route_seq: u64,
    pending_route: Option<u64>,
    road_in_flight: bool,
    last_road_request_ms: Option<i64>,

    gps_status: GpsStatus,
    last_fix_ms: Option<i64>,

    commands_rx: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    vehicle_tx: watch::Sender<Option<VehicleState>>,
    predictions_tx: broadcast::Sender<PredictionSnapshot>,
    notices_tx: broadcast::Sender<Notice>,
}

impl AdvisorRuntime {
    pub fn new(
        settings: Settings,
        route_provider: Arc<dyn RouteProvider>,
        road_provider: Arc<dyn RoadAttributeProvider>,
    ) -> (Self, AdvisorHandle) {
        let clock = Clock::new();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (vehicle_tx, vehicle_rx) = watch::channel(None);
        let (predictions_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (notices_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        let handle = AdvisorHandle {
            commands: commands_tx,
            clock,
            vehicle: vehicle_rx,
            predictions: predictions_tx.clone(),
            notices: notices_tx.clone(),
        };

        let runtime = AdvisorRuntime {
            estimator: VehicleStateEstimator::new(settings.estimator.clone()),
            deviation: DeviationManager::new(settings.deviation.clone()),
            predictions: PredictionStateManager::new(&settings),
            road_cache: RoadAttributeCache::default(),
            settings,
            started_ms: clock.now_ms(),
            clock,
            tracker: None,
            destination: None,
            route_provider,
            road_provider,
            route_seq: 0,
            pending_route: None,
            road_in_flight: false,
            last_road_request_ms: None,
            gps_status: GpsStatus::Waiting,
            last_fix_ms: None,
            commands_rx,
            completions_tx,
            completions_rx,
            vehicle_tx,
            predictions_tx,
            notices_tx,
        };

        (runtime, handle)
    }

    /// Run until `shutdown` or until every handle is dropped
    ///
    /// The output rate is read once here; later settings changes keep it.
    pub async fn run(mut self) {
        let period = Duration::from_secs_f64(1.0 / self.settings.estimator.output_rate_hz);
        let mut output_tick = tokio::time::interval(period);
        output_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut prediction_tick = tokio::time::interval(PREDICTION_PERIOD);
        prediction_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Advisor running: output every {} ms, detector {:?}",
            period.as_millis(),
            self.predictions.version()
        );

        loop {
            tokio::select! {
                _ = output_tick.tick() => {
                    let now = self.clock.now_ms();
                    self.on_output_tick(now);
                }
                _ = prediction_tick.tick() => {
                    let now = self.clock.now_ms();
                    self.on_prediction_tick(now);
                }
                command = self.commands_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => {
                        let now = self.clock.now_ms();
                        self.handle_command(now, command);
                    }
                },
                Some(completion) = self.completions_rx.recv() => {
                    let now = self.clock.now_ms();
                    self.handle_completion(now, completion);
                }
            }
        }

        info!(
            "Advisor stopped: {} fixes, {} hard resets, {} reroutes",
            self.estimator.stats().fix_updates,
            self.estimator.stats().hard_resets,
            self.deviation.recalculations()
        );
    }

    fn notify(&self, notice: Notice) {
        // No subscriber is not an error
        let _ = self.notices_tx.send(notice);
    }

    /// Best known position: estimate, else the configured fallback
    fn current_position(&self) -> Option<LatLon> {
        self.estimator
            .current_state()
            .map(|s| s.position)
            .or(self.settings.fallback_position)
    }

    fn on_output_tick(&mut self, now_ms: i64) {
        self.check_gps(now_ms);
        if self.gps_status == GpsStatus::Lost {
            return;
        }
        if let Some(state) = self.estimator.predict_to(now_ms) {
            self.vehicle_tx.send_replace(Some(state));
        }
    }

    fn check_gps(&mut self, now_ms: i64) {
        if self.gps_status == GpsStatus::Lost {
            return;
        }
        let silent_since = self.last_fix_ms.unwrap_or(self.started_ms);
        if now_ms - silent_since > GPS_TIMEOUT_MS {
            let fallback = self.current_position();
            warn!(
                "No GPS fix for {} ms, falling back to {:?}",
                now_ms - silent_since,
                fallback
            );
            self.gps_status = GpsStatus::Lost;
            self.notify(Notice::GpsUnavailable { fallback });
        }
    }

    fn handle_command(&mut self, now_ms: i64, command: Command) {
        match command {
            Command::Fix(fix) => self.on_fix(now_ms, &fix),
            Command::SetDestination(destination) => {
                info!("Destination set to {}", destination);
                self.destination = Some(destination);
                self.request_route(now_ms);
            }
            Command::ClearDestination => {
                info!("Destination cleared");
                self.destination = None;
                self.tracker = None;
                self.pending_route = None;
                let snapshot = self.predictions.clear();
                let _ = self.predictions_tx.send(snapshot);
            }
            Command::SetRoute(route) => {
                self.pending_route = None;
                self.install_route(route);
            }
            Command::UpdateSettings(settings) => self.apply_settings(*settings),
            Command::Shutdown => {}
        }
    }

    fn on_fix(&mut self, now_ms: i64, fix: &GpsFix) {
        // Invalid fixes are logged and dropped by the estimator
        let Ok(outcome) = self.estimator.process_fix(fix) else {
            return;
        };
        if let FixOutcome::HardReset { innovation_m } = outcome {
            debug!("Fix at t={} reset the estimator ({:.1} m)", fix.timestamp_ms, innovation_m);
        }

        self.last_fix_ms = Some(now_ms);
        if self.gps_status == GpsStatus::Lost {
            info!("GPS restored");
            self.notify(Notice::GpsRestored);
        }
        self.gps_status = GpsStatus::Live;

        if let Some(state) = self.estimator.current_state() {
            self.vehicle_tx.send_replace(Some(state));
        }
    }

    fn apply_settings(&mut self, settings: Settings) {
        if let Err(e) = settings.validate() {
            warn!("Ignoring settings update: {}", e);
            return;
        }
        self.estimator.set_config(settings.estimator.clone());
        self.deviation.set_config(settings.deviation.clone());
        self.predictions.apply_settings(&settings);
        self.settings = settings;
    }

    fn install_route(&mut self, route: RoutePolyline) {
        let rerouted = self.tracker.is_some();
        info!(
            "Route {} active: {} points, {:.0} m",
            route.id(),
            route.len(),
            route.total_length_m()
        );
        self.notify(Notice::RouteUpdated {
            route_id: route.id(),
            points: route.len(),
            rerouted,
        });
        self.tracker = Some(RouteTracker::new(route));
    }

    /// Spawn a routing request from the current position to the destination
    ///
    /// Stamps the reroute cooldown whether or not the request succeeds. A
    /// newer request supersedes an older one still in flight.
    fn request_route(&mut self, now_ms: i64) {
        let Some(destination) = self.destination else {
            return;
        };
        self.deviation.mark_recalculated(now_ms);

        let Some(origin) = self.current_position() else {
            warn!("Cannot route to {}: no position yet", destination);
            self.notify(Notice::RoutingFailed {
                reason: "No position available".to_string(),
            });
            return;
        };

        self.route_seq += 1;
        let seq = self.route_seq;
        self.pending_route = Some(seq);

        let request = self.route_provider.get_route(origin, destination);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = request.await;
            let _ = completions.send(Completion::Route {
                seq,
                destination,
                result,
            });
        });
    }

    fn refresh_road_attributes(&mut self, now_ms: i64, position: LatLon) {
        if self.road_in_flight {
            return;
        }
        if self
            .last_road_request_ms
            .map_or(false, |last| now_ms - last < ROAD_REFRESH_MS)
        {
            return;
        }
        self.road_in_flight = true;
        self.last_road_request_ms = Some(now_ms);

        let speed_limit = self.road_provider.speed_limit(position);
        let on_road = self.road_provider.is_on_road(position);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let (speed_limit, on_road) = futures::join!(speed_limit, on_road);
            let _ = completions.send(Completion::Road { speed_limit, on_road });
        });
    }

    fn handle_completion(&mut self, now_ms: i64, completion: Completion) {
        match completion {
            Completion::Route {
                seq,
                destination,
                result,
            } => {
                if self.pending_route != Some(seq) || self.destination != Some(destination) {
                    debug!("Discarding stale route result #{}", seq);
                    return;
                }
                self.pending_route = None;
                match result {
                    Ok(route) => self.install_route(route),
                    Err(e) => {
                        warn!("Routing to {} failed: {}", destination, e);
                        self.notify(Notice::RoutingFailed {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Completion::Road { speed_limit, on_road } => {
                self.road_in_flight = false;
                self.road_cache.record_speed_limit(now_ms, speed_limit);
                self.road_cache.record_on_road(now_ms, on_road);
            }
        }
    }

    /// Route tracking, deviation check, turn detection, advisory
    fn on_prediction_tick(&mut self, now_ms: i64) {
        let Some(vehicle) = self.estimator.current_state() else {
            return;
        };
        self.refresh_road_attributes(now_ms, vehicle.position);
        let attributes = self.road_cache.attributes(now_ms);

        let Some(route) = self.tracker.as_ref().map(|t| t.route().clone()) else {
            // Destination without a route: the first request failed, retry
            if self.destination.is_some()
                && self.pending_route.is_none()
                && self.deviation.cooldown_elapsed(now_ms)
            {
                self.request_route(now_ms);
            }
            return;
        };

        let check = DeviationCheck {
            auto_recalculate: self.settings.enable_auto_recalculate,
            has_destination: self.destination.is_some(),
            on_road: attributes.on_road,
            speed_mps: vehicle.speed_mps,
            position: vehicle.position,
            route: Some(&route),
            max_route_deviation_m: self.settings.max_route_deviation,
        };
        if let DeviationDecision::Recalculate { .. } = self.deviation.evaluate(now_ms, &check) {
            self.request_route(now_ms);
        }

        let tracker = RouteTracker::new(route);
        let ctx = PredictionContext {
            route: tracker.route(),
            position: tracker.locate(vehicle.position),
            vehicle,
            settings: &self.settings,
            speed_limit_kmh: attributes.speed_limit_kmh,
        };
        let snapshot = self.predictions.update(&ctx);
        debug!(
            "Prediction #{}: {} turn(s), current {:?}",
            snapshot.generation,
            snapshot.turns.len(),
            snapshot.current.as_ref().map(|t| t.distance_to_start_m.round())
        );
        let _ = self.predictions_tx.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{StaticRoadProvider, StaticRouteProvider};
    use crate::geometry::destination_point;
    use crate::simulation::RouteBuilder;
    use std::sync::atomic::{AtomicU64, Ordering};

    const ORIGIN: LatLon = LatLon {
        lat: 45.0,
        lon: 6.0,
    };

    fn straight_north() -> Vec<LatLon> {
        RouteBuilder::new(ORIGIN, 0.0).straight(2000.0, 50.0).build()
    }

    fn runtime_with(
        routes: StaticRouteProvider,
        road: StaticRoadProvider,
    ) -> (AdvisorRuntime, AdvisorHandle, Arc<AtomicU64>) {
        let counter = routes.request_counter();
        let (runtime, handle) = AdvisorRuntime::new(Settings::default(), Arc::new(routes), Arc::new(road));
        (runtime, handle, counter)
    }

    /// Let spawned requests finish and feed their results back
    async fn settle(runtime: &mut AdvisorRuntime, now_ms: i64) {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        while let Ok(completion) = runtime.completions_rx.try_recv() {
            runtime.handle_completion(now_ms, completion);
        }
    }

    fn moving_fix(position: LatLon, speed_mps: f64, t_ms: i64) -> GpsFix {
        GpsFix {
            position,
            speed_mps: Some(speed_mps),
            heading_deg: Some(0.0),
            timestamp_ms: t_ms,
            accuracy_m: Some(3.0),
        }
    }

    /// Drive north on a line `offset_m` east of the route, from `from_s` to
    /// `to_s` seconds after `t0`
    async fn drive(runtime: &mut AdvisorRuntime, t0: i64, from_s: i64, to_s: i64, offset_m: f64, speed_mps: f64) {
        let start = destination_point(ORIGIN, 90.0, offset_m);
        for step in (from_s * 10 + 1)..=(to_s * 10) {
            let now = t0 + step * 100;
            let position = destination_point(start, 0.0, speed_mps * step as f64 / 10.0);
            runtime.handle_command(now, Command::Fix(moving_fix(position, speed_mps, now)));
            runtime.on_output_tick(now);
            if step % 10 == 0 {
                runtime.on_prediction_tick(now);
                settle(runtime, now).await;
            }
        }
    }

    #[tokio::test]
    async fn test_large_deviation_at_speed_reroutes_once() {
        let (mut runtime, handle, requests) = runtime_with(
            StaticRouteProvider::new(straight_north()),
            StaticRoadProvider::default(),
        );
        let t0 = handle.now_ms();
        let start = destination_point(ORIGIN, 90.0, 50.0);

        runtime.handle_command(t0, Command::Fix(moving_fix(start, 20.0, t0)));
        runtime.handle_command(t0, Command::SetDestination(destination_point(ORIGIN, 0.0, 2000.0)));
        settle(&mut runtime, t0).await;
        assert_eq!(requests.load(Ordering::Relaxed), 1);
        assert!(runtime.tracker.is_some());

        // Cooldown from the destination request holds until t0 + 10 s
        drive(&mut runtime, t0, 0, 10, 50.0, 20.0).await;
        assert_eq!(requests.load(Ordering::Relaxed), 1);

        // First tick past the cooldown reroutes, the next one is held again
        drive(&mut runtime, t0, 10, 12, 50.0, 20.0).await;
        assert_eq!(requests.load(Ordering::Relaxed), 2);
        assert_eq!(runtime.deviation.recalculations(), 1);
    }

    #[tokio::test]
    async fn test_small_deviation_when_stopped_does_not_reroute() {
        let (mut runtime, handle, requests) = runtime_with(
            StaticRouteProvider::new(straight_north()),
            StaticRoadProvider::default(),
        );
        let t0 = handle.now_ms();
        let parked = destination_point(ORIGIN, 90.0, 2.0);

        runtime.handle_command(t0, Command::Fix(moving_fix(parked, 0.0, t0)));
        runtime.handle_command(t0, Command::SetDestination(destination_point(ORIGIN, 0.0, 2000.0)));
        settle(&mut runtime, t0).await;

        drive(&mut runtime, t0, 0, 25, 2.0, 0.0).await;
        assert_eq!(requests.load(Ordering::Relaxed), 1);
        assert_eq!(runtime.deviation.recalculations(), 0);
    }

    #[tokio::test]
    async fn test_stale_route_result_is_discarded() {
        let (mut runtime, handle, requests) = runtime_with(
            StaticRouteProvider::new(straight_north()),
            StaticRoadProvider::default(),
        );
        let mut notices = handle.subscribe_notices();
        let t0 = handle.now_ms();

        runtime.handle_command(t0, Command::Fix(moving_fix(ORIGIN, 10.0, t0)));
        runtime.handle_command(t0, Command::SetDestination(destination_point(ORIGIN, 0.0, 1000.0)));
        runtime.handle_command(t0, Command::SetDestination(destination_point(ORIGIN, 0.0, 2000.0)));
        settle(&mut runtime, t0).await;

        assert_eq!(requests.load(Ordering::Relaxed), 2);
        let mut updates = 0;
        while let Ok(notice) = notices.try_recv() {
            if let Notice::RouteUpdated { rerouted, .. } = notice {
                assert!(!rerouted);
                updates += 1;
            }
        }
        assert_eq!(updates, 1);
    }

    #[tokio::test]
    async fn test_routing_failure_is_a_notice() {
        let (mut runtime, handle, _) = runtime_with(StaticRouteProvider::failing(), StaticRoadProvider::default());
        let mut notices = handle.subscribe_notices();
        let t0 = handle.now_ms();

        // No position yet
        runtime.handle_command(t0, Command::SetDestination(destination_point(ORIGIN, 0.0, 500.0)));
        assert!(matches!(notices.try_recv(), Ok(Notice::RoutingFailed { .. })));

        runtime.handle_command(t0, Command::Fix(moving_fix(ORIGIN, 10.0, t0)));
        runtime.on_prediction_tick(t0 + 11_000);
        settle(&mut runtime, t0 + 11_000).await;
        assert!(matches!(notices.try_recv(), Ok(Notice::RoutingFailed { .. })));
        assert!(runtime.tracker.is_none());
    }

    #[tokio::test]
    async fn test_predictions_are_published() {
        let (mut runtime, handle, _) = runtime_with(StaticRouteProvider::default(), StaticRoadProvider::new(Some(80.0), true));
        let mut predictions = handle.subscribe_predictions();
        let t0 = handle.now_ms();

        let route = RouteBuilder::new(ORIGIN, 0.0)
            .straight(200.0, 10.0)
            .arc(20.0, 90.0, 5.0)
            .straight(300.0, 10.0)
            .build_route()
            .unwrap();
        runtime.handle_command(t0, Command::SetRoute(route.clone()));
        runtime.handle_command(t0, Command::Fix(moving_fix(ORIGIN, 15.0, t0)));
        runtime.on_prediction_tick(t0);
        settle(&mut runtime, t0).await;

        let snapshot = predictions.try_recv().unwrap();
        assert_eq!(snapshot.route_id, Some(route.id()));
        let current = snapshot.current.expect("turn ahead");
        assert!((current.distance_to_start_m - 200.0).abs() < 20.0);
        assert!(current.optimal_speed_kmh.unwrap() < 54.0);

        runtime.handle_command(t0 + 100, Command::ClearDestination);
        let cleared = predictions.try_recv().unwrap();
        assert!(cleared.turns.is_empty());
        assert!(cleared.generation > snapshot.generation);
    }

    #[tokio::test]
    async fn test_gps_loss_and_recovery() {
        let (mut runtime, handle, _) = runtime_with(StaticRouteProvider::default(), StaticRoadProvider::default());
        let mut notices = handle.subscribe_notices();
        let t0 = handle.now_ms();

        runtime.handle_command(t0, Command::Fix(moving_fix(ORIGIN, 0.0, t0)));
        runtime.on_output_tick(t0 + 4_000);
        assert!(notices.try_recv().is_err());

        runtime.on_output_tick(t0 + 6_000);
        match notices.try_recv() {
            Ok(Notice::GpsUnavailable { fallback: Some(p) }) => {
                assert!(crate::geometry::distance_m(p, ORIGIN) < 1.0)
            }
            other => panic!("unexpected {:?}", other),
        }
        // Reported once
        runtime.on_output_tick(t0 + 7_000);
        assert!(notices.try_recv().is_err());

        runtime.handle_command(t0 + 8_000, Command::Fix(moving_fix(ORIGIN, 0.0, t0 + 8_000)));
        assert_eq!(notices.try_recv(), Ok(Notice::GpsRestored));
    }

    #[tokio::test]
    async fn test_road_provider_failure_degrades() {
        let (mut runtime, handle, _) = runtime_with(
            StaticRouteProvider::new(straight_north()),
            StaticRoadProvider::failing(ProviderError::RateLimited),
        );
        let t0 = handle.now_ms();

        runtime.handle_command(t0, Command::Fix(moving_fix(ORIGIN, 10.0, t0)));
        runtime.on_prediction_tick(t0);
        settle(&mut runtime, t0).await;

        assert_eq!(runtime.road_cache.failures(), 2);
        assert!(runtime.road_cache.is_on_road(t0));
        assert_eq!(runtime.road_cache.speed_limit_kmh(t0), None);
        assert!(!runtime.road_in_flight);
    }

    #[tokio::test]
    async fn test_run_loop_publishes_vehicle_state() {
        let (runtime, handle, _) = runtime_with(StaticRouteProvider::default(), StaticRoadProvider::default());
        let task = tokio::spawn(runtime.run());
        let mut vehicle = handle.subscribe_vehicle();

        handle
            .submit_fix(moving_fix(ORIGIN, 5.0, handle.now_ms()))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), vehicle.changed())
            .await
            .expect("state within 2 s")
            .unwrap();
        assert!(vehicle.borrow().is_some());

        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("runtime stops")
            .unwrap();
        assert_eq!(
            handle.submit_fix(moving_fix(ORIGIN, 5.0, 0)).await,
            Err(AdvisorError::RuntimeStopped)
        );
    }
}
