//! Math types for sonara

pub use glam::{Quat, Vec3};

/// Position and orientation of a listener or emitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    /// The listener's +X axis in world space; panning projects onto it.
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}
