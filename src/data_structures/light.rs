//! Point lights and the lights constant buffer.
//!
//! Light 0 casts the scene's shadow: its view and projection are the ones
//! the shadow pass renders with.

use cgmath::{
    InnerSpace, Matrix, Matrix4, Point3, Quaternion, Rad, Rotation, Rotation3, SquareMatrix,
    Vector3,
};

use crate::camera::perspective_lh;

/// Number of point lights every scene carries.
pub const NUM_LIGHTS: usize = 2;

/// Field of view of the shadow-casting frustum.
pub const SHADOW_FOV: Rad<f32> = Rad(std::f32::consts::FRAC_PI_2);
pub const SHADOW_NEAR: f32 = 0.01;
pub const SHADOW_FAR: f32 = 1000.0;

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniform {
    pub position: [f32; 4],
    pub color: [f32; 4],
    /// Attenuation distance, repeated, then squared twice.
    pub attenuation_distance: [f32; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightsUniform {
    pub lights: [LightUniform; NUM_LIGHTS],
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointLight {
    position: Point3<f32>,
    color: [f32; 4],
    attenuation_distance: f32,
    target: Point3<f32>,
    /// Radians per second the light orbits the world Y axis.
    orbit_speed: Option<f32>,
    view: Matrix4<f32>,
    projection: Matrix4<f32>,
}

impl PointLight {
    pub fn new(position: Point3<f32>, color: [f32; 4], attenuation_distance: f32) -> Self {
        let mut light = Self {
            position,
            color,
            attenuation_distance,
            target: Point3::new(0.0, 0.0, 0.0),
            orbit_speed: None,
            view: Matrix4::identity(),
            projection: perspective_lh(SHADOW_FOV, 1.0, SHADOW_NEAR, SHADOW_FAR),
        };
        light.update_view();
        light
    }

    /// Makes the light circle the world Y axis.
    pub fn with_orbit(mut self, radians_per_second: f32) -> Self {
        self.orbit_speed = Some(radians_per_second);
        self
    }

    /// Points the shadow frustum at `target` instead of the origin.
    pub fn looking_at(mut self, target: Point3<f32>) -> Self {
        self.target = target;
        self.update_view();
        self
    }

    pub fn position(&self) -> Point3<f32> {
        self.position
    }

    pub fn set_position(&mut self, position: Point3<f32>) {
        self.position = position;
        self.update_view();
    }

    pub fn color(&self) -> [f32; 4] {
        self.color
    }

    pub fn attenuation_distance(&self) -> f32 {
        self.attenuation_distance
    }

    pub fn view(&self) -> Matrix4<f32> {
        self.view
    }

    pub fn projection(&self) -> Matrix4<f32> {
        self.projection
    }

    /// Sets up the shadow projection for a `width` by `height` shadow map.
    pub fn initialize(&mut self, width: u32, height: u32) {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        self.projection = perspective_lh(SHADOW_FOV, aspect, SHADOW_NEAR, SHADOW_FAR);
        self.update_view();
    }

    pub fn update(&mut self, delta_time: f32) {
        if let Some(speed) = self.orbit_speed {
            let orbit = Quaternion::from_angle_y(Rad(speed * delta_time));
            self.position = orbit.rotate_point(self.position);
            self.update_view();
        }
    }

    fn update_view(&mut self) {
        let forward = self.target - self.position;
        if forward.magnitude2() <= f32::EPSILON {
            return;
        }
        let up = if forward.normalize().y.abs() > 0.999 {
            Vector3::unit_z()
        } else {
            Vector3::unit_y()
        };
        self.view = Matrix4::look_at_lh(self.position, self.target, up);
    }

    pub fn uniform(&self) -> LightUniform {
        let d = self.attenuation_distance;
        LightUniform {
            position: [self.position.x, self.position.y, self.position.z, 1.0],
            color: self.color,
            attenuation_distance: [d, d, d * d, d * d],
            view: self.view.transpose().into(),
            projection: self.projection.transpose().into(),
        }
    }
}

impl Default for PointLight {
    /// A black light one unit behind the origin.
    fn default() -> Self {
        Self::new(Point3::new(0.0, 0.0, -1.0), [0.0; 4], 1.0)
    }
}

pub fn lights_uniform(lights: &[PointLight; NUM_LIGHTS]) -> LightsUniform {
    LightsUniform {
        lights: std::array::from_fn(|i| lights[i].uniform()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::project;

    #[test]
    fn uniform_carries_attenuation_terms() {
        let light = PointLight::new(Point3::new(1.0, 2.0, 3.0), [1.0, 0.5, 0.0, 1.0], 4.0);
        let uniform = light.uniform();
        assert_eq!(uniform.position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(uniform.attenuation_distance, [4.0, 4.0, 16.0, 16.0]);
        let view: [[f32; 4]; 4] = light.view().transpose().into();
        assert_eq!(uniform.view, view);
    }

    #[test]
    fn shadow_frustum_sees_the_target() {
        let mut light = PointLight::new(Point3::new(0.0, 20.0, -20.0), [1.0; 4], 50.0);
        light.initialize(800, 600);
        let projected = project(light.projection() * light.view(), Point3::new(0.0, 0.0, 0.0));
        assert!(projected.x.abs() < 1e-4 && projected.y.abs() < 1e-4);
        assert!(projected.z > 0.0 && projected.z < 1.0);
    }

    #[test]
    fn orbiting_keeps_distance_to_axis() {
        let mut light =
            PointLight::new(Point3::new(10.0, 5.0, 0.0), [1.0; 4], 20.0).with_orbit(1.0);
        let before = light.view();
        light.update(0.5);
        let p = light.position();
        assert!(((p.x * p.x + p.z * p.z).sqrt() - 10.0).abs() < 1e-4);
        assert!((p.y - 5.0).abs() < 1e-4);
        assert_ne!(light.view(), before);
    }

    #[test]
    fn new_light_has_a_square_shadow_projection() {
        let light = PointLight::new(Point3::new(0.0, 10.0, -10.0), [1.0; 4], 50.0);
        assert_ne!(light.projection(), Matrix4::identity());
        assert_eq!(light.projection()[0][0], light.projection()[1][1]);
    }

    #[test]
    fn light_above_target_has_a_valid_view() {
        let mut light = PointLight::new(Point3::new(0.0, 10.0, 0.0), [1.0; 4], 20.0);
        light.initialize(1, 1);
        assert!(light.view().determinant().abs() > 0.5);
    }
}
