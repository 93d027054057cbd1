//! First-person camera.
//!
//! Input is accumulated by [`Camera::handle_input`] and applied once per
//! frame by [`Camera::update`]. Movement follows the yaw only, so looking up
//! or down does not change the walking direction.
//!
//! # Key types
//! - [`Camera`]: eye, look-at target, yaw/pitch and the view matrix
//! - [`DirectionsInput`], [`MouseRelativeMovement`]: per-frame input
//! - [`CameraUniform`]: the camera constant buffer (slot 0)

use cgmath::{
    EuclideanSpace, InnerSpace, Matrix, Matrix3, Matrix4, Point3, Rad, SquareMatrix, Vector2,
    Vector3, Zero,
};

use crate::context::{BufferId, GpuContext, create_constant_buffer, upload};
use crate::error::Result;

pub const DEFAULT_FORWARD: Vector3<f32> = Vector3::new(0.0, 0.0, 1.0);
pub const DEFAULT_RIGHT: Vector3<f32> = Vector3::new(1.0, 0.0, 0.0);
pub const DEFAULT_UP: Vector3<f32> = Vector3::new(0.0, 1.0, 0.0);

pub const DEFAULT_TRAVEL_SPEED: f32 = 15.0;
pub const DEFAULT_ROTATION_SPEED: f32 = 10.0;

/// Keys held during a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionsInput {
    pub front: bool,
    pub left: bool,
    pub back: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub reserved: [bool; 2],
}

/// Raw mouse motion since the last frame, in device units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseRelativeMovement {
    pub x: i32,
    pub y: i32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
}

#[derive(Debug, Clone)]
pub struct Camera {
    yaw: f32,
    pitch: f32,
    move_left_right: f32,
    move_back_forward: f32,
    move_up_down: f32,
    travel_speed: f32,
    rotation_speed: f32,
    camera_forward: Vector3<f32>,
    camera_right: Vector3<f32>,
    camera_up: Vector3<f32>,
    eye: Point3<f32>,
    at: Point3<f32>,
    up: Vector3<f32>,
    rotation: Matrix3<f32>,
    view: Matrix4<f32>,
    buffer: Option<BufferId>,
}

impl Camera {
    pub fn new(position: Point3<f32>) -> Self {
        let mut camera = Self {
            yaw: 0.0,
            pitch: 0.0,
            move_left_right: 0.0,
            move_back_forward: 0.0,
            move_up_down: 0.0,
            travel_speed: DEFAULT_TRAVEL_SPEED,
            rotation_speed: DEFAULT_ROTATION_SPEED,
            camera_forward: DEFAULT_FORWARD,
            camera_right: DEFAULT_RIGHT,
            camera_up: DEFAULT_UP,
            eye: position,
            at: position + DEFAULT_FORWARD,
            up: DEFAULT_UP,
            rotation: Matrix3::identity(),
            view: Matrix4::identity(),
            buffer: None,
        };
        camera.update(0.0);
        camera
    }

    /// Overrides the travel speed (units per second) and rotation speed
    /// (radians per second at full mouse deflection).
    pub fn with_speeds(mut self, travel_speed: f32, rotation_speed: f32) -> Self {
        self.travel_speed = travel_speed;
        self.rotation_speed = rotation_speed;
        self
    }

    pub fn eye(&self) -> Point3<f32> {
        self.eye
    }

    pub fn at(&self) -> Point3<f32> {
        self.at
    }

    pub fn up(&self) -> Vector3<f32> {
        self.up
    }

    pub fn view(&self) -> Matrix4<f32> {
        self.view
    }

    pub fn yaw(&self) -> Rad<f32> {
        Rad(self.yaw)
    }

    pub fn pitch(&self) -> Rad<f32> {
        Rad(self.pitch)
    }

    /// Movement accumulated since the last update as (right, up, forward).
    pub fn pending_movement(&self) -> Vector3<f32> {
        Vector3::new(
            self.move_left_right,
            self.move_up_down,
            self.move_back_forward,
        )
    }

    pub fn constant_buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Accumulates movement and rotation. The eye and view are left alone
    /// until [`update`](Self::update).
    pub fn handle_input(
        &mut self,
        directions: &DirectionsInput,
        mouse: &MouseRelativeMovement,
        delta_time: f32,
    ) {
        let axis = |negative: bool, positive: bool| match (negative, positive) {
            (true, _) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        };
        let movement = Vector3::new(
            axis(directions.left, directions.right),
            axis(directions.down, directions.up),
            axis(directions.back, directions.front),
        );
        if !movement.is_zero() {
            let movement = movement.normalize() * self.travel_speed * delta_time;
            self.move_left_right += movement.x;
            self.move_up_down += movement.y;
            self.move_back_forward += movement.z;
        }

        let rotation = Vector2::new(mouse.x as f32, mouse.y as f32);
        if !rotation.is_zero() {
            let rotation = rotation.normalize() * self.rotation_speed * delta_time;
            self.yaw += rotation.x;
            self.pitch = (self.pitch + rotation.y)
                .clamp(-std::f32::consts::FRAC_PI_2, std::f32::consts::FRAC_PI_2);
        }
    }

    /// Applies pending movement and rebuilds the view matrix.
    pub fn update(&mut self, _delta_time: f32) {
        let yaw = Matrix3::from_angle_y(Rad(self.yaw));
        self.rotation = yaw * Matrix3::from_angle_x(Rad(self.pitch));

        self.camera_right = yaw * DEFAULT_RIGHT;
        self.camera_up = yaw * DEFAULT_UP;
        self.camera_forward = yaw * DEFAULT_FORWARD;

        self.eye += self.move_left_right * self.camera_right;
        self.eye += self.move_up_down * self.camera_up;
        self.eye += self.move_back_forward * self.camera_forward;

        self.at = self.eye + self.rotation * DEFAULT_FORWARD;
        self.up = self.rotation * DEFAULT_UP;

        self.move_left_right = 0.0;
        self.move_up_down = 0.0;
        self.move_back_forward = 0.0;

        self.view = Matrix4::look_at_lh(self.eye, self.at, self.up);
    }

    pub fn uniform(&self) -> CameraUniform {
        CameraUniform {
            view: self.view.transpose().into(),
            camera_position: self.eye.to_homogeneous().into(),
        }
    }

    /// Allocates the camera constant buffer.
    pub fn initialize(&mut self, ctx: &mut dyn GpuContext) -> Result<()> {
        if self.buffer.is_none() {
            self.buffer = Some(create_constant_buffer(ctx, "camera", &self.uniform())?);
        }
        Ok(())
    }

    /// Uploads the current view and eye position, returning the buffer.
    pub fn upload(&self, ctx: &mut dyn GpuContext) -> Option<BufferId> {
        let buffer = self.buffer?;
        upload(ctx, buffer, &self.uniform());
        Some(buffer)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Point3::new(0.0, 1.0, -5.0))
    }
}

/// Left-handed perspective projection mapping depth to [0, 1].
pub fn perspective_lh(fovy: Rad<f32>, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let y_scale = 1.0 / (fovy.0 * 0.5).tan();
    let x_scale = y_scale / aspect;
    let range = far / (far - near);
    Matrix4::new(
        x_scale, 0.0, 0.0, 0.0, //
        0.0, y_scale, 0.0, 0.0, //
        0.0, 0.0, range, 1.0, //
        0.0, 0.0, -near * range, 0.0,
    )
}

/// A point transformed by `matrix` with the perspective divide applied.
pub fn project(matrix: Matrix4<f32>, point: Point3<f32>) -> Point3<f32> {
    let clip = matrix * point.to_homogeneous();
    Point3::from_vec(clip.truncate() / clip.w)
}
