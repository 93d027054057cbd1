//! Window and event loop driving a [`Renderer`].
//!
//! [`run`] opens a fixed-size window, creates a [`WgpuContext`] for it and
//! awaits the caller's setup future on a tokio runtime. Every frame then
//! follows the same order:
//! 1. Collect keyboard and raw mouse input
//! 2. `Renderer::handle_input` with the input gathered since the last frame
//! 3. `Renderer::update` (main scene, then camera)
//! 4. `Renderer::render` (shadow pass, main pass, present)
//!
//! W/A/S/D move, Space and Shift rise and sink, holding the right mouse
//! button looks around. Escape closes the window.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use instant::Instant;
use serde::{Deserialize, Serialize};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{DeviceEvent, DeviceId, ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::camera::{DirectionsInput, MouseRelativeMovement};
use crate::context::native::WgpuContext;
use crate::render::Renderer;

/// Builds the renderer once the window exists. Assets can be awaited here.
pub type Setup = Pin<Box<dyn Future<Output = anyhow::Result<Renderer>>>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "lumen-ngin".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Sets the direction flag bound to `code`. Returns false for unbound keys.
pub fn apply_key(directions: &mut DirectionsInput, code: KeyCode, pressed: bool) -> bool {
    let flag = match code {
        KeyCode::KeyW => &mut directions.front,
        KeyCode::KeyA => &mut directions.left,
        KeyCode::KeyS => &mut directions.back,
        KeyCode::KeyD => &mut directions.right,
        KeyCode::Space => &mut directions.up,
        KeyCode::ShiftLeft | KeyCode::ShiftRight => &mut directions.down,
        _ => return false,
    };
    *flag = pressed;
    true
}

/// Adds raw mouse motion to the movement gathered this frame.
pub fn accumulate_motion(mouse: &mut MouseRelativeMovement, dx: f64, dy: f64) {
    mouse.x = mouse.x.saturating_add(dx.round() as i32);
    mouse.y = mouse.y.saturating_add(dy.round() as i32);
}

struct Running {
    ctx: WgpuContext,
    renderer: Renderer,
}

struct App {
    window_config: WindowConfig,
    async_runtime: tokio::runtime::Runtime,
    setup: Option<Setup>,
    running: Option<Running>,
    directions: DirectionsInput,
    mouse: MouseRelativeMovement,
    looking: bool,
    last_time: Instant,
    outcome: anyhow::Result<()>,
}

impl App {
    fn new(window_config: WindowConfig, setup: Setup) -> anyhow::Result<Self> {
        Ok(Self {
            window_config,
            async_runtime: tokio::runtime::Runtime::new()?,
            setup: Some(setup),
            running: None,
            directions: DirectionsInput::default(),
            mouse: MouseRelativeMovement::default(),
            looking: false,
            last_time: Instant::now(),
            outcome: Ok(()),
        })
    }

    fn start(&mut self, window: Arc<Window>, setup: Setup) -> anyhow::Result<Running> {
        let (mut ctx, mut renderer) = self.async_runtime.block_on(async move {
            let ctx = WgpuContext::new(window).await?;
            let renderer = setup.await?;
            Ok::<_, anyhow::Error>((ctx, renderer))
        })?;
        renderer.initialize(&mut ctx)?;
        log::info!("running on {:?} driver", renderer.driver_type());
        Ok(Running { ctx, renderer })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.outcome = Err(error);
        event_loop.exit();
    }

    fn frame(&mut self) {
        let Some(running) = &mut self.running else {
            return;
        };
        let dt = self.last_time.elapsed().as_secs_f32();
        self.last_time = Instant::now();

        running
            .renderer
            .handle_input(&self.directions, &self.mouse, dt);
        self.mouse = MouseRelativeMovement::default();
        running.renderer.update(dt);
        if let Err(e) = running.renderer.render(&mut running.ctx) {
            log::error!("Unable to render: {}", e);
        }
        running.ctx.window().request_redraw();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(setup) = self.setup.take() else {
            return;
        };
        let window_attributes = Window::default_attributes()
            .with_title(self.window_config.title.clone())
            .with_inner_size(PhysicalSize::new(
                self.window_config.width,
                self.window_config.height,
            ))
            .with_resizable(false);
        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, e.into()),
        };
        match self.start(window, setup) {
            Ok(running) => {
                running.ctx.window().request_redraw();
                self.last_time = Instant::now();
                self.running = Some(running);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: DeviceId,
        event: DeviceEvent,
    ) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            if self.looking {
                accumulate_motion(&mut self.mouse, dx, dy);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(code) = event.physical_key else {
                    return;
                };
                let pressed = event.state == ElementState::Pressed;
                if code == KeyCode::Escape && pressed {
                    event_loop.exit();
                } else {
                    apply_key(&mut self.directions, code, pressed);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => self.looking = state.is_pressed(),
            WindowEvent::Focused(false) => {
                self.directions = DirectionsInput::default();
                self.looking = false;
            }
            WindowEvent::RedrawRequested => self.frame(),
            _ => {}
        }
    }
}

/// Opens the window and runs until it is closed. `setup` is awaited after
/// the device exists and before the first frame.
pub fn run<F>(window_config: WindowConfig, setup: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<Renderer>> + 'static,
{
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    }

    let event_loop = EventLoop::new()?;
    let mut app = App::new(window_config, Box::pin(setup))?;
    event_loop.run_app(&mut app)?;
    app.outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_keys_toggle_their_direction() {
        let mut directions = DirectionsInput::default();
        assert!(apply_key(&mut directions, KeyCode::KeyW, true));
        assert!(apply_key(&mut directions, KeyCode::ShiftRight, true));
        assert!(directions.front && directions.down);
        assert!(apply_key(&mut directions, KeyCode::KeyW, false));
        assert!(!directions.front);
        assert!(!apply_key(&mut directions, KeyCode::KeyQ, true));
        assert_eq!(directions.reserved, [false; 2]);
    }

    #[test]
    fn mouse_motion_adds_up_within_a_frame() {
        let mut mouse = MouseRelativeMovement::default();
        accumulate_motion(&mut mouse, 2.4, -1.0);
        accumulate_motion(&mut mouse, 1.0, -0.6);
        assert_eq!(mouse, MouseRelativeMovement { x: 3, y: -2 });
    }

    #[test]
    fn window_config_defaults() {
        let config: WindowConfig = serde_json::from_str(r#"{ "title": "demo" }"#).unwrap();
        assert_eq!(config.title, "demo");
        assert_eq!((config.width, config.height), (1280, 720));
    }
}
