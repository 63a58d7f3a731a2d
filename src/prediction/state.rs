use super::detector_v2::TurnDetectorV2;
use super::turn_manager::TurnPredictionManager;
use super::{sort_and_cap, PredictionContext};
use crate::config::{Settings, TurnDetectionVersion};
use crate::types::Turn;
use log::info;
use std::sync::Arc;

/// Immutable result of one prediction pass
///
/// Subscribers hold these by value; the next pass builds a new one rather
/// than touching the turns a subscriber may still be reading.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionSnapshot {
    /// Nearest turn, if any
    pub current: Option<Turn>,
    /// Sorted by distance to start, at most five, unique start indices
    pub turns: Arc<[Turn]>,
    /// Increments on every published pass
    pub generation: u64,
    pub route_id: Option<u64>,
}

/// Active turn-detection algorithm
#[derive(Debug)]
enum DetectorStrategy {
    V1(TurnPredictionManager),
    V2(TurnDetectorV2),
}

impl DetectorStrategy {
    fn for_settings(settings: &Settings) -> Self {
        match settings.turn_detection_version {
            TurnDetectionVersion::V1 => DetectorStrategy::V1(TurnPredictionManager::default()),
            TurnDetectionVersion::V2 => {
                DetectorStrategy::V2(TurnDetectorV2::new(settings.detector_v2.clone()))
            }
        }
    }

    fn version(&self) -> TurnDetectionVersion {
        match self {
            DetectorStrategy::V1(_) => TurnDetectionVersion::V1,
            DetectorStrategy::V2(_) => TurnDetectionVersion::V2,
        }
    }
}

/// Owns the selected detector and publishes snapshots
#[derive(Debug)]
pub struct PredictionStateManager {
    strategy: DetectorStrategy,
    generation: u64,
}

impl PredictionStateManager {
    pub fn new(settings: &Settings) -> Self {
        PredictionStateManager {
            strategy: DetectorStrategy::for_settings(settings),
            generation: 0,
        }
    }

    pub fn version(&self) -> TurnDetectionVersion {
        self.strategy.version()
    }

    /// Swap the detector when the selected version changes
    pub fn apply_settings(&mut self, settings: &Settings) {
        if self.strategy.version() != settings.turn_detection_version {
            info!(
                "Switching turn detection {:?} -> {:?}",
                self.strategy.version(),
                settings.turn_detection_version
            );
            self.strategy = DetectorStrategy::for_settings(settings);
            return;
        }
        if let DetectorStrategy::V2(detector) = &mut self.strategy {
            detector.set_config(settings.detector_v2.clone());
        }
    }

    /// Run one pass and publish the result
    pub fn update(&mut self, ctx: &PredictionContext) -> PredictionSnapshot {
        let mut turns = match &mut self.strategy {
            DetectorStrategy::V1(manager) => manager.update(ctx),
            DetectorStrategy::V2(detector) => detector.update(ctx),
        };
        sort_and_cap(&mut turns);

        self.publish(turns, Some(ctx.route.id()))
    }

    /// No route: forget every turn and publish an empty snapshot
    pub fn clear(&mut self) -> PredictionSnapshot {
        match &mut self.strategy {
            DetectorStrategy::V1(manager) => manager.reset(),
            DetectorStrategy::V2(detector) => detector.reset(),
        }
        self.publish(Vec::new(), None)
    }

    fn publish(&mut self, turns: Vec<Turn>, route_id: Option<u64>) -> PredictionSnapshot {
        self.generation += 1;
        PredictionSnapshot {
            current: turns.first().cloned(),
            turns: Arc::from(turns),
            generation: self.generation,
            route_id,
        }
    }
}
