//! Windowed presentation layer for the swarm.
//!
//! Drives the simulation from the redraw loop: each frame reads the live
//! parameters, advances the world once, uploads the committed snapshot to
//! the GPU, and draws one heading-rotated triangle per agent. Drawing only
//! ever sees a fully committed frame; the simulation step finishes before
//! the instance upload begins.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use flock_core::{AgentData, SwarmWorld};
use tracing::{debug, info, warn};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.05,
    g: 0.05,
    b: 0.05,
    a: 1.0,
};

const SHADER: &str = r#"
struct Viewport {
    size: vec2<f32>,
    _pad: vec2<f32>,
};

@group(0) @binding(0)
var<uniform> viewport: Viewport;

struct VsIn {
    @builtin(vertex_index) vertex_index: u32,
    @location(0) instance_pos: vec2<f32>,
    @location(1) instance_vel: vec2<f32>,
};

@vertex
fn vs_main(in: VsIn) -> @builtin(position) vec4<f32> {
    var corners = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, -1.0),
        vec2<f32>(3.0, 0.0),
    );
    let corner = corners[in.vertex_index];
    let heading = atan2(in.instance_vel.y, in.instance_vel.x);
    let c = cos(heading);
    let s = sin(heading);
    let rotated = vec2<f32>(
        corner.x * c - corner.y * s,
        corner.x * s + corner.y * c,
    );
    let pixel = in.instance_pos + rotated;
    let ndc = pixel / viewport.size * 2.0 - vec2<f32>(1.0, 1.0);
    return vec4<f32>(ndc.x, -ndc.y, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(0.55, 0.8, 1.0, 0.6);
}
"#;

/// Per-agent instance record uploaded every frame.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct InstanceRaw {
    position: [f32; 2],
    velocity: [f32; 2],
}

impl InstanceRaw {
    fn from_agent(agent: &AgentData) -> Self {
        Self {
            position: [agent.position.x, agent.position.y],
            velocity: [agent.velocity.x, agent.velocity.y],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct ViewportUniform {
    size: [f32; 2],
    _pad: [f32; 2],
}

struct Renderer {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    instance_buffer: wgpu::Buffer,
    instance_capacity: u64,
    viewport_buffer: wgpu::Buffer,
    viewport_bind_group: wgpu::BindGroup,
    scratch: Vec<InstanceRaw>,
}

impl Renderer {
    async fn new(window: Arc<Window>, agent_capacity: usize) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("no compatible graphics adapter found"))?;
        info!(adapter = %adapter.get_info().name, "selected graphics adapter");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("flock device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let instance_capacity = (agent_capacity * std::mem::size_of::<InstanceRaw>()) as u64;
        let instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("agent instances"),
            size: instance_capacity,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let viewport_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("viewport uniform"),
            size: std::mem::size_of::<ViewportUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let viewport_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("viewport layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let viewport_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("viewport bind group"),
            layout: &viewport_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: viewport_buffer.as_entire_binding(),
            }],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("flock shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("flock pipeline layout"),
            bind_group_layouts: &[&viewport_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("flock pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<InstanceRaw>() as u64,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let renderer = Self {
            surface,
            device,
            queue,
            config,
            pipeline,
            instance_buffer,
            instance_capacity,
            viewport_buffer,
            viewport_bind_group,
            scratch: Vec::with_capacity(agent_capacity),
        };
        renderer.upload_viewport();
        Ok(renderer)
    }

    fn upload_viewport(&self) {
        let uniform = ViewportUniform {
            size: [self.config.width as f32, self.config.height as f32],
            _pad: [0.0; 2],
        };
        self.queue
            .write_buffer(&self.viewport_buffer, 0, bytemuck::bytes_of(&uniform));
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.upload_viewport();
    }

    /// Upload the committed snapshot and draw it.
    fn render(&mut self, agents: &[AgentData]) -> Result<(), wgpu::SurfaceError> {
        self.scratch.clear();
        self.scratch.extend(agents.iter().map(InstanceRaw::from_agent));
        let bytes = bytemuck::cast_slice(&self.scratch);
        debug_assert!(bytes.len() as u64 <= self.instance_capacity);
        self.queue.write_buffer(&self.instance_buffer, 0, bytes);

        let frame = self.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("flock encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("flock pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.viewport_bind_group, &[]);
            pass.set_vertex_buffer(0, self.instance_buffer.slice(..));
            pass.draw(0..3, 0..self.scratch.len() as u32);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}

/// Which rule the keyboard currently edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleSlot {
    Separation,
    Cohesion,
    Alignment,
    Shape,
}

impl RuleSlot {
    fn label(self) -> &'static str {
        match self {
            Self::Separation => "separation",
            Self::Cohesion => "cohesion",
            Self::Alignment => "alignment",
            Self::Shape => "shape",
        }
    }
}

struct FlockApp {
    world: SwarmWorld,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    selected: RuleSlot,
}

impl FlockApp {
    fn new(world: SwarmWorld) -> Self {
        Self {
            world,
            window: None,
            renderer: None,
            selected: RuleSlot::Separation,
        }
    }

    /// Adjust the selected rule from a key press. Weights and ranges are
    /// clamped to non-negative before they reach the simulation.
    fn handle_key(&mut self, code: KeyCode) {
        const WEIGHT_STEP: f32 = 0.005;
        const RANGE_STEP: f32 = 5.0;

        match code {
            KeyCode::Digit1 => self.selected = RuleSlot::Separation,
            KeyCode::Digit2 => self.selected = RuleSlot::Cohesion,
            KeyCode::Digit3 => self.selected = RuleSlot::Alignment,
            KeyCode::Digit4 => self.selected = RuleSlot::Shape,
            KeyCode::ArrowUp | KeyCode::ArrowDown | KeyCode::ArrowLeft | KeyCode::ArrowRight => {
                let selected = self.selected;
                let params = self.world.params_mut();
                let (weight, range) = match selected {
                    RuleSlot::Separation => {
                        (&mut params.separation_weight, &mut params.separation_range)
                    }
                    RuleSlot::Cohesion => {
                        (&mut params.cohesion_weight, &mut params.cohesion_range)
                    }
                    RuleSlot::Alignment => {
                        (&mut params.alignment_weight, &mut params.alignment_range)
                    }
                    RuleSlot::Shape => (&mut params.shape_weight, &mut params.shape_range),
                };
                match code {
                    KeyCode::ArrowUp => *weight += WEIGHT_STEP,
                    KeyCode::ArrowDown => *weight = (*weight - WEIGHT_STEP).max(0.0),
                    KeyCode::ArrowRight => *range += RANGE_STEP,
                    KeyCode::ArrowLeft => *range = (*range - RANGE_STEP).max(0.0),
                    _ => unreachable!(),
                }
                debug!(
                    rule = selected.label(),
                    weight = *weight,
                    range = *range,
                    "rule parameters adjusted"
                );
            }
            _ => {}
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        // Parameters were read once at the top of step; the draw below
        // observes only the committed snapshot.
        let summary = self.world.step();
        if summary.frame.0 % 600 == 0 {
            info!(
                frame = summary.frame.0,
                mean_speed = summary.mean_speed,
                max_speed = summary.max_speed,
                "frame summary"
            );
        }

        let Some(renderer) = &mut self.renderer else {
            return;
        };
        match renderer.render(self.world.agents()) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let (width, height) = (renderer.config.width, renderer.config.height);
                renderer.resize(width, height);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                warn!("surface out of memory, shutting down");
                event_loop.exit();
            }
            Err(err) => warn!(error = ?err, "frame render failed"),
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

impl ApplicationHandler for FlockApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let config = self.world.config();
        let attrs = Window::default_attributes()
            .with_title("flock")
            .with_inner_size(winit::dpi::LogicalSize::new(
                config.viewport_width,
                config.viewport_height,
            ));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                warn!(error = ?err, "window creation failed");
                event_loop.exit();
                return;
            }
        };

        match pollster::block_on(Renderer::new(window.clone(), self.world.agent_count())) {
            Ok(renderer) => {
                self.window = Some(window);
                self.renderer = Some(renderer);
            }
            Err(err) => {
                warn!(error = ?err, "renderer initialization failed");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    if let Err(err) = self.world.resize(size.width, size.height) {
                        warn!(error = %err, "viewport resize rejected");
                    }
                    if let Some(renderer) = &mut self.renderer {
                        renderer.resize(size.width, size.height);
                    }
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                if code == KeyCode::Escape {
                    event_loop.exit();
                } else {
                    self.handle_key(code);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }
}

/// Open a window and run the simulation until the user closes it.
pub fn run(world: SwarmWorld) -> anyhow::Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = FlockApp::new(world);
    event_loop.run_app(&mut app)?;
    Ok(())
}
