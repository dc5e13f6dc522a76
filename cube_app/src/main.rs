//! Rotating cube demo
//!
//! Exercises the full backend protocol with one shader, one mesh, and one
//! shader instance: global camera state, per-instance material state, and a
//! per-draw model transform.

use glfw::{Action, Key, WindowEvent};
use prism_engine::foundation::math::Mat4Ext;
use prism_engine::prelude::*;

struct CubeApp {
    window: Window,
    backend: VulkanBackend,
    shader: ShaderHandle,
    texture: TextureHandle,
    cube_instance: u32,
}

impl CubeApp {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let mut window = Window::new("Prism Engine - Cube Demo", 1280, 720)?;

        let config = RendererConfig::new("cube_demo")
            .with_version(0, 1, 0)
            .with_clear_color([0.02, 0.02, 0.03, 1.0]);
        let mut backend = VulkanBackend::new(&mut window, &config)?;

        let shader = backend.create_shader(&ShaderConfig::builtin_material())?;
        backend.upload_geometry(&GeometryData::unit_cube("cube"))?;

        let texture_data = TextureData::from_file("assets/textures/cube.png").unwrap_or_else(|err| {
            log::warn!("Using the builtin checkerboard: {err}");
            TextureData::fallback_checkerboard()
        });
        let texture = backend.create_texture(&texture_data)?;

        backend.use_shader(shader)?;
        let cube_instance = backend.acquire_shader_instance()?;
        backend.bind_instance(cube_instance)?;
        backend.set_uniform("diffuse_color", bytemuck::cast_slice(&[1.0f32, 1.0, 1.0, 1.0]))?;
        backend.set_sampler("diffuse_texture", texture)?;

        Ok(Self { window, backend, shader, texture, cube_instance })
    }

    fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut last_time = self.window.time();

        while !self.window.should_close() {
            self.window.poll_events();
            self.handle_events();

            let now = self.window.time();
            let delta_time = (now - last_time) as f32;
            last_time = now;

            if self.backend.begin_frame(delta_time)? != FrameStatus::Ready {
                continue;
            }
            self.render_frame(now as f32)?;
            self.backend.end_frame()?;
        }

        self.backend.use_shader(self.shader)?;
        self.backend.release_shader_instance(self.cube_instance)?;
        self.backend.destroy_texture(self.texture)?;
        self.backend.wait_idle()?;
        Ok(())
    }

    fn handle_events(&mut self) {
        let events: Vec<(f64, WindowEvent)> = self.window.flush_events().collect();
        for (_, event) in events {
            match event {
                WindowEvent::Key(Key::Escape, _, Action::Press, _) => {
                    self.window.set_should_close(true);
                }
                WindowEvent::FramebufferSize(width, height) => {
                    self.backend.on_resized(width.max(0) as u32, height.max(0) as u32);
                }
                _ => {}
            }
        }
    }

    fn render_frame(&mut self, elapsed: f32) -> Result<(), Box<dyn std::error::Error>> {
        let (width, height) = self.backend.swapchain_extent();
        let aspect = width as f32 / height.max(1) as f32;

        // Vulkan's framebuffer Y points down; flip the projection here so
        // the engine math stays conventional.
        let mut projection = Mat4::perspective(45.0f32.to_radians(), aspect, 0.1, 100.0);
        projection[(1, 1)] *= -1.0;

        let eye = Vec3::new(2.0, 2.0, 4.0);
        let view = Mat4::look_at(eye, Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0));

        self.backend.use_shader(self.shader)?;
        self.backend.update_global_state(
            projection,
            view,
            eye,
            Vec4::new(0.25, 0.25, 0.25, 1.0),
            DebugViewMode::Default,
        )?;
        self.backend.apply_global()?;

        self.backend.bind_instance(self.cube_instance)?;
        self.backend.apply_instance()?;

        let model = Mat4::rotation_y(elapsed * 0.8) * Mat4::rotation_x(elapsed * 0.3);
        self.backend.draw_geometry(model)?;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    prism_engine::foundation::logging::init();

    log::info!("Starting cube demo");
    let mut app = CubeApp::new()?;
    app.run()?;
    log::info!("Cube demo finished");
    Ok(())
}
