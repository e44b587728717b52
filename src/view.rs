//! The point of view a frame is rendered from.

use glam::{Mat4, Vec3};

/// Per-view uniforms, uploaded once per evaluation.
///
/// Field order matches [`view_layout`](crate::pipeline::bindings::view_layout),
/// which generated shaders declare as `ViewData`.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ViewUniforms {
    /// World to camera space.
    pub view: [[f32; 4]; 4],
    /// Camera to clip space.
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    /// Camera position in world space, useful for lighting calculations.
    pub camera_position: [f32; 3],
    /// Elapsed time in seconds, for animated shaders.
    pub time: f32,
}

/// Camera, viewport extent and time for one evaluation.
///
/// Relative frame sizes resolve against `extent`.
///
/// ```
/// use phalanx::View;
///
/// let view = View::new(1280, 720)
///     .at(0.0, 2.0, 8.0)
///     .looking_at(0.0, 0.0, 0.0)
///     .with_fov(60.0)
///     .at_time(1.5);
/// assert_eq!(view.extent, (1280, 720));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct View {
    pub extent: (u32, u32),
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub time: f32,
}

impl View {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: (width.max(1), height.max(1)),
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_2,
            near: 0.1,
            far: 1000.0,
            time: 0.0,
        }
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3::new(x, y, z);
        self
    }

    pub fn looking_at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.forward = (Vec3::new(x, y, z) - self.position).normalize_or(Vec3::NEG_Z);
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn at_time(mut self, time: f32) -> Self {
        self.time = time;
        self
    }

    pub fn aspect(&self) -> f32 {
        self.extent.0 as f32 / self.extent.1 as f32
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect(), self.near, self.far)
    }

    pub fn uniforms(&self) -> ViewUniforms {
        let view = self.view_matrix();
        let projection = self.projection_matrix();
        ViewUniforms {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            view_projection: (projection * view).to_cols_array_2d(),
            camera_position: self.position.to_array(),
            time: self.time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::bindings::view_layout;

    #[test]
    fn uniforms_match_view_layout() {
        assert_eq!(
            std::mem::size_of::<ViewUniforms>() as u64,
            view_layout().stride
        );
    }

    #[test]
    fn looking_at_normalizes_forward() {
        let view = View::new(100, 100).at(0.0, 0.0, 10.0).looking_at(0.0, 0.0, 0.0);
        assert!((view.forward - Vec3::NEG_Z).length() < 1e-6);
    }
}
