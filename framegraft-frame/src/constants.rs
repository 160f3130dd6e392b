//! Per-frame common constants and the viewport × frame history store.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use nalgebra::{Matrix4, Vector2, Vector3};

use framegraft_core::types::ViewportHandle;
use framegraft_core::{Error, Result};

/// Camera and frame data every feature consumes. Set once per viewport
/// per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Constants {
    pub camera_view_to_clip: Matrix4<f32>,
    pub clip_to_camera_view: Matrix4<f32>,
    pub clip_to_prev_clip: Matrix4<f32>,
    pub prev_clip_to_clip: Matrix4<f32>,
    pub jitter_offset: Vector2<f32>,
    pub mvec_scale: Vector2<f32>,
    pub camera_position: Vector3<f32>,
    pub camera_up: Vector3<f32>,
    pub camera_right: Vector3<f32>,
    pub camera_forward: Vector3<f32>,
    pub camera_near: f32,
    pub camera_far: f32,
    pub camera_fov: f32,
    pub camera_aspect_ratio: f32,
    pub depth_inverted: bool,
    pub camera_motion_included: bool,
    pub motion_vectors_jittered: bool,
    pub reset: bool,
    pub orthographic: bool,
}

impl Default for Constants {
    fn default() -> Self {
        Self {
            camera_view_to_clip: Matrix4::identity(),
            clip_to_camera_view: Matrix4::identity(),
            clip_to_prev_clip: Matrix4::identity(),
            prev_clip_to_clip: Matrix4::identity(),
            jitter_offset: Vector2::zeros(),
            mvec_scale: Vector2::new(1.0, 1.0),
            camera_position: Vector3::zeros(),
            camera_up: Vector3::y(),
            camera_right: Vector3::x(),
            camera_forward: -Vector3::z(),
            camera_near: 0.1,
            camera_far: 1000.0,
            camera_fov: 1.2,
            camera_aspect_ratio: 16.0 / 9.0,
            depth_inverted: false,
            camera_motion_included: true,
            motion_vectors_jittered: false,
            reset: false,
            orthographic: false,
        }
    }
}

struct Entry<T> {
    frame: u32,
    value: T,
}

/// Fixed-depth history per viewport, newest first. Refuses duplicate
/// `(viewport, frame)` sets; reads distinguish "never set" from
/// "overwritten by a later frame".
pub struct ViewportFrameData<T, const DEPTH: usize = 3> {
    name: &'static str,
    map: Mutex<HashMap<ViewportHandle, VecDeque<Entry<T>>>>,
}

impl<T: Clone, const DEPTH: usize> ViewportFrameData<T, DEPTH> {
    pub fn new(name: &'static str) -> Self {
        Self { name, map: Mutex::new(HashMap::new()) }
    }

    pub fn set(&self, viewport: ViewportHandle, frame: u32, value: T) -> Result<()> {
        let mut map = self.map.lock().unwrap();
        let entries = map.entry(viewport).or_default();
        if entries.iter().any(|e| e.frame == frame) {
            tracing::warn!(
                "'{}' already set for viewport {} frame {frame}",
                self.name,
                viewport.0
            );
            return Err(Error::DuplicatedConstants);
        }
        entries.push_front(Entry { frame, value });
        entries.truncate(DEPTH);
        Ok(())
    }

    pub fn get(&self, viewport: ViewportHandle, frame: u32) -> Result<T> {
        let map = self.map.lock().unwrap();
        let entries = map.get(&viewport).ok_or(Error::NotFound)?;
        if let Some(entry) = entries.iter().find(|e| e.frame == frame) {
            return Ok(entry.value.clone());
        }
        // Every stored frame being newer means this frame's entry was
        // pushed out of the history.
        if !entries.is_empty() && entries.iter().all(|e| e.frame > frame) {
            return Err(Error::Stale);
        }
        Err(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ViewportFrameData<Constants> {
        ViewportFrameData::new("common")
    }

    #[test]
    fn first_set_succeeds_duplicate_fails() {
        let store = store();
        let viewport = ViewportHandle(0);
        assert!(store.set(viewport, 5, Constants::default()).is_ok());
        assert_eq!(
            store.set(viewport, 5, Constants::default()),
            Err(Error::DuplicatedConstants)
        );
        // Other frames and viewports are unaffected.
        assert!(store.set(viewport, 6, Constants::default()).is_ok());
        assert!(store.set(ViewportHandle(1), 5, Constants::default()).is_ok());
    }

    #[test]
    fn duplicate_allowed_again_after_ring_advances() {
        let store = store();
        let viewport = ViewportHandle(0);
        store.set(viewport, 1, Constants::default()).unwrap();
        for frame in 2..=4 {
            store.set(viewport, frame, Constants::default()).unwrap();
        }
        // Frame 1 left the history, so setting it again is a fresh set.
        assert!(store.set(viewport, 1, Constants::default()).is_ok());
    }

    #[test]
    fn get_distinguishes_missing_from_stale() {
        let store = store();
        let viewport = ViewportHandle(2);
        assert_eq!(store.get(viewport, 1).unwrap_err(), Error::NotFound);

        for frame in 1..=5 {
            let mut constants = Constants::default();
            constants.camera_near = frame as f32;
            store.set(viewport, frame, constants).unwrap();
        }
        assert_eq!(store.get(viewport, 4).unwrap().camera_near, 4.0);
        assert_eq!(store.get(viewport, 1).unwrap_err(), Error::Stale);
        // A frame newer than anything stored was simply never set.
        assert_eq!(store.get(viewport, 99).unwrap_err(), Error::NotFound);
    }
}
