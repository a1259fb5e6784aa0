use nalgebra::Vector3;

use crate::{
    config::BodySelectionConfig,
    types::{JointType, Skeleton},
};

/// Index of the tracked skeleton minimizing `z * |x|`. Ties keep the lowest
/// index, so identical input always yields the same choice.
pub fn select_closest(skeletons: &[Skeleton]) -> Option<usize> {
    skeletons
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_tracked())
        .map(|(idx, s)| (idx, s.position.z * s.position.x.abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(idx, _)| idx)
}

pub fn head_anchor(skeleton: &Skeleton, head_weight: f32) -> Vector3<f32> {
    let head = skeleton.joint(JointType::Head).position;
    let neck = skeleton.joint(JointType::ShoulderCenter).position;
    head * head_weight + neck * (1.0 - head_weight)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ActiveBodyState {
    pub tracking_id: Option<u32>,
    /// Segmentation index of the active body (skeleton slot + 1).
    pub player_index: Option<u8>,
    pub miss_count: u32,
    pub last_anchor: Option<Vector3<f32>>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodySelection {
    pub skeleton_index: Option<usize>,
    pub tracking_id: Option<u32>,
    pub player_index: Option<u8>,
    /// A different body took over; the volume should be reset onto `anchor`.
    pub body_changed: bool,
    pub anchor: Option<Vector3<f32>>,
}

#[derive(Debug)]
pub struct BodySelector {
    config: BodySelectionConfig,
    state: ActiveBodyState,
}

impl BodySelector {
    pub fn new(config: BodySelectionConfig) -> Self {
        Self {
            config,
            state: ActiveBodyState::default(),
        }
    }

    pub fn state(&self) -> &ActiveBodyState {
        &self.state
    }

    pub fn update(&mut self, skeletons: &[Skeleton]) -> BodySelection {
        let Some(idx) = select_closest(skeletons) else {
            return self.miss();
        };

        let skeleton = &skeletons[idx];
        let anchor = head_anchor(skeleton, self.config.head_weight);
        let player_index = u8::try_from(idx + 1).ok();
        let id = skeleton.tracking_id;

        let body_changed = match self.state.tracking_id {
            Some(current) if current == id => false,
            Some(current) if self.is_same_person(current, skeletons, &anchor) => {
                log::debug!("tracking id {current} reassigned to {id}, keeping volume");
                false
            }
            _ => true,
        };
        if body_changed {
            log::info!("active body is now tracking id {id}");
        }

        self.state = ActiveBodyState {
            tracking_id: Some(id),
            player_index,
            miss_count: 0,
            last_anchor: Some(anchor),
        };

        BodySelection {
            skeleton_index: Some(idx),
            tracking_id: Some(id),
            player_index,
            body_changed,
            anchor: Some(anchor),
        }
    }

    fn miss(&mut self) -> BodySelection {
        self.state.miss_count = self.state.miss_count.saturating_add(1);
        if self.state.tracking_id.is_some() && self.state.miss_count > self.config.miss_limit {
            log::info!(
                "active body lost for {} ticks, clearing",
                self.state.miss_count
            );
            self.state.tracking_id = None;
            self.state.player_index = None;
        }

        BodySelection {
            skeleton_index: None,
            tracking_id: self.state.tracking_id,
            player_index: self.state.player_index,
            body_changed: false,
            anchor: None,
        }
    }

    /// The runtime may hand a re-acquired person a fresh id. Treat it as the
    /// same body when the old id is no longer tracked and the new anchor sits
    /// where the old one was.
    fn is_same_person(&self, current: u32, skeletons: &[Skeleton], anchor: &Vector3<f32>) -> bool {
        let radius = self.config.reidentify_radius;
        if radius <= 0.0 {
            return false;
        }
        let current_still_tracked = skeletons
            .iter()
            .any(|s| s.is_tracked() && s.tracking_id == current);
        if current_still_tracked {
            return false;
        }
        self.state
            .last_anchor
            .is_some_and(|last| (last - anchor).norm() <= radius)
    }
}
