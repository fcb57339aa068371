use std::path::PathBuf;
use std::sync::Arc;

use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::config::SimSettings;
use crate::error::{Result, SimError};
use crate::rendering::Renderer;
use crate::simulation::{Scene, Shape};

pub struct App {
    settings: SimSettings,
    scene_path: Option<PathBuf>,
    state: Option<Renderer>,
    /// First fatal error, returned from [`run`] once the loop exits.
    fatal: Option<SimError>,
}

impl App {
    pub fn new(settings: SimSettings, scene_path: Option<PathBuf>) -> Self {
        Self {
            settings,
            scene_path,
            state: None,
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: SimError) {
        log::error!("{error}");
        self.fatal.get_or_insert(error);
        event_loop.exit();
    }

    /// Scenes are authored against a window size, so they are loaded once
    /// the window exists.
    fn load_scene(&self, window: &Window) -> Result<(SimSettings, Vec<Shape>)> {
        let mut settings = self.settings.clone();
        let Some(path) = &self.scene_path else {
            return Ok((settings, Vec::new()));
        };
        let size = window.inner_size();
        let scene = Scene::load(path, [size.width, size.height])?;
        scene.apply_settings(&mut settings)?;
        Ok((settings, scene.shapes))
    }

    fn create_renderer(&self, event_loop: &ActiveEventLoop) -> Result<Renderer> {
        let window = Arc::new(
            event_loop
                .create_window(Window::default_attributes().with_title("GPU particle sandbox"))
                .map_err(|err| SimError::Platform(format!("failed to create window: {err}")))?,
        );
        let (settings, shapes) = self.load_scene(&window)?;
        let renderer = pollster::block_on(Renderer::new(window.clone(), settings, shapes))?;
        window.request_redraw();
        Ok(renderer)
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        match self.create_renderer(event_loop) {
            Ok(renderer) => self.state = Some(renderer),
            Err(error) => self.fail(event_loop, error),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                log::info!("close requested, stopping");
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Err(error) = state.render() {
                    self.fail(event_loop, error);
                    return;
                }
                // Emits a new redraw requested event.
                state.get_window().request_redraw();
            }
            WindowEvent::Resized(size) => {
                // No render here, a redraw request always follows
                state.resize(size);
            }
            WindowEvent::MouseInput {
                state: button_state,
                button: MouseButton::Left,
                ..
            } => {
                state.handle_mouse_button(button_state == ElementState::Pressed);
            }
            WindowEvent::CursorMoved { position, .. } => {
                state.handle_mouse_move([position.x as f32, position.y as f32]);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match key_code {
                KeyCode::Space => state.toggle_pause(),
                KeyCode::KeyR | KeyCode::F5 => state.request_reset(),
                KeyCode::Escape => event_loop.exit(),
                _ => (),
            },
            _ => (),
        }
    }
}

/// Opens the window and runs the frame loop until it is closed or a frame
/// fails.
pub fn run(settings: SimSettings, scene_path: Option<PathBuf>) -> Result<()> {
    settings.validate()?;

    let event_loop =
        EventLoop::new().map_err(|err| SimError::Platform(format!("failed to create event loop: {err}")))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(settings, scene_path);
    event_loop
        .run_app(&mut app)
        .map_err(|err| SimError::Platform(format!("event loop failed: {err}")))?;

    match app.fatal.take() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
