//! Orbit camera

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};

/// Camera uniform for GPU
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub position: [f32; 3],
    pub time: f32,
}

/// Camera orbiting a target point
pub struct Camera {
    pub distance: f32,
    pub rotation: Quat,
    pub target: Vec3,
    pub aspect: f32,
    pub fovy: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            distance: 4.0,
            rotation: Quat::from_rotation_x(-0.3),
            target: Vec3::ZERO,
            aspect: width as f32 / height.max(1) as f32,
            fovy: 45.0_f32.to_radians(),
            znear: 0.01,
            zfar: 100.0,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.target + self.rotation * Vec3::new(0.0, 0.0, self.distance)
    }

    pub fn rotate(&mut self, delta_x: f32, delta_y: f32) {
        let yaw = Quat::from_axis_angle(Vec3::Y, -delta_x);
        let right = self.rotation * Vec3::X;
        let pitch = Quat::from_axis_angle(right, -delta_y);
        self.rotation = (yaw * pitch * self.rotation).normalize();
    }

    pub fn zoom(&mut self, delta: f32) {
        self.distance = (self.distance + delta).clamp(0.5, 50.0);
    }

    pub fn build_view_projection_matrix(&self) -> Mat4 {
        let view = Mat4::from_quat(self.rotation.conjugate()) * Mat4::from_translation(-self.position());
        let proj = Mat4::perspective_rh(self.fovy, self.aspect, self.znear, self.zfar);
        proj * view
    }

    pub fn to_uniform(&self, time: f32) -> CameraUniform {
        CameraUniform {
            view_proj: self.build_view_projection_matrix().to_cols_array_2d(),
            position: self.position().to_array(),
            time,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }
}
