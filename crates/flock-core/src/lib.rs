//! Swarm state store and the parallel flocking update kernel.
//!
//! The world owns two equally sized agent buffers. Every frame the kernel
//! runs once per agent, all invocations reading the frozen front buffer and
//! writing the back buffer; the buffers swap roles only after the whole
//! frame has been written. No agent can ever observe another agent's
//! same-frame update.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use thiserror::Error;

/// Floor applied to inter-agent distances before any division.
///
/// Keeps the separation term finite when agents overlap; a pair closer than
/// this is treated as coincident.
pub const MIN_DISTANCE: f32 = 1e-3;

/// Agent position in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Agent velocity in viewport units per frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

impl Velocity {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean magnitude.
    #[must_use]
    pub fn speed(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

/// Full per-agent state. Identity is the index into the swarm slice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentData {
    pub position: Position,
    pub velocity: Velocity,
}

impl AgentData {
    #[must_use]
    pub const fn new(position: Position, velocity: Velocity) -> Self {
        Self { position, velocity }
    }
}

/// Monotonic frame counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Frame(pub u64);

impl Frame {
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Wrap bounds for the toroidal viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportBounds {
    pub width: f32,
    pub height: f32,
}

impl ViewportBounds {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Wrap a position into `[0, width) x [0, height)`.
    #[must_use]
    pub fn wrap(&self, position: Position) -> Position {
        Position::new(
            wrap_coordinate(position.x, self.width),
            wrap_coordinate(position.y, self.height),
        )
    }
}

fn wrap_coordinate(value: f32, extent: f32) -> f32 {
    if extent <= 0.0 {
        return 0.0;
    }
    let mut v = value % extent;
    if v < 0.0 {
        v += extent;
    }
    v
}

/// Live rule weights and interaction ranges.
///
/// Mutable between frames only; `step` copies them into an immutable
/// [`FrameContext`] before launching the kernel, so every agent in a frame
/// sees the same values. Weights are dimensionless, ranges are in pixels.
/// A non-positive or non-finite range simply disqualifies every neighbor
/// for that rule; it is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleParameters {
    pub separation_weight: f32,
    pub separation_range: f32,
    pub cohesion_weight: f32,
    pub cohesion_range: f32,
    pub alignment_weight: f32,
    pub alignment_range: f32,
    pub shape_weight: f32,
    pub shape_range: f32,
}

impl Default for RuleParameters {
    fn default() -> Self {
        Self {
            separation_weight: 0.05,
            separation_range: 25.0,
            cohesion_weight: 0.005,
            cohesion_range: 50.0,
            alignment_weight: 0.05,
            alignment_range: 50.0,
            shape_weight: 0.0,
            shape_range: 200.0,
        }
    }
}

/// Pluggable target geometry for the shape-following rule.
///
/// Implementations return, for a given agent position, the point on the
/// formation the agent should steer toward. They must be cheap: the kernel
/// calls `attractor` once per agent per frame.
pub trait ShapeField: Send + Sync {
    /// Stable identifier of the formation (e.g., "ring", "point").
    fn kind(&self) -> &'static str;

    /// The formation point closest to `position`.
    fn attractor(&self, position: Position) -> Position;
}

/// Circle formation: agents are drawn onto the circle perimeter.
#[derive(Debug, Clone, Copy)]
pub struct RingFormation {
    pub center: Position,
    pub radius: f32,
}

impl ShapeField for RingFormation {
    fn kind(&self) -> &'static str {
        "ring"
    }

    fn attractor(&self, position: Position) -> Position {
        let dx = position.x - self.center.x;
        let dy = position.y - self.center.y;
        let dist = (dx * dx + dy * dy).sqrt();
        if dist < MIN_DISTANCE {
            // Sitting on the axis: every perimeter point is equidistant.
            return Position::new(self.center.x + self.radius, self.center.y);
        }
        let scale = self.radius / dist;
        Position::new(self.center.x + dx * scale, self.center.y + dy * scale)
    }
}

/// Single-point formation: all agents converge on one location.
#[derive(Debug, Clone, Copy)]
pub struct PointFormation(pub Position);

impl ShapeField for PointFormation {
    fn kind(&self) -> &'static str {
        "point"
    }

    fn attractor(&self, _position: Position) -> Position {
        self.0
    }
}

/// Errors that can occur when constructing or reconfiguring the swarm.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Indicates a configuration value the simulation cannot start with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Static configuration for a swarm world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Number of agents; fixed for the lifetime of the world.
    pub agent_count: u32,
    /// Initial viewport width in pixels.
    pub viewport_width: u32,
    /// Initial viewport height in pixels.
    pub viewport_height: u32,
    /// Optional RNG seed for reproducible initial states.
    pub rng_seed: Option<u64>,
    /// Hard velocity magnitude cap; 0 disables the cap.
    pub speed_limit: f32,
    /// Maximum number of frame summaries retained in memory; 0 disables.
    pub history_capacity: usize,
    /// Rule weights and ranges applied until changed at runtime.
    pub params: RuleParameters,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            agent_count: 30_000,
            viewport_width: 1_280,
            viewport_height: 720,
            rng_seed: None,
            speed_limit: 0.0,
            history_capacity: 256,
            params: RuleParameters::default(),
        }
    }
}

impl SwarmConfig {
    /// Validates the configuration, returning the derived wrap bounds.
    fn bounds(&self) -> Result<ViewportBounds, SwarmError> {
        if self.agent_count == 0 {
            return Err(SwarmError::InvalidConfig("agent_count must be non-zero"));
        }
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(SwarmError::InvalidConfig(
                "viewport dimensions must be non-zero",
            ));
        }
        if self.speed_limit < 0.0 || !self.speed_limit.is_finite() {
            return Err(SwarmError::InvalidConfig(
                "speed_limit must be finite and non-negative",
            ));
        }
        Ok(ViewportBounds::new(
            self.viewport_width as f32,
            self.viewport_height as f32,
        ))
    }

    /// Returns the configured RNG, seeding from entropy when no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Per-rule gate compiled once per frame: weight plus squared range.
///
/// Ranges that cannot admit any neighbor (non-positive, non-finite) compile
/// to a sentinel no squared distance passes.
#[derive(Debug, Clone, Copy)]
struct RuleGate {
    weight: f32,
    range_sq: f32,
}

impl RuleGate {
    fn compile(weight: f32, range: f32) -> Self {
        let range_sq = if range.is_finite() && range > 0.0 {
            range * range
        } else {
            -1.0
        };
        Self { weight, range_sq }
    }

    #[inline]
    fn admits(&self, dist_sq: f32) -> bool {
        dist_sq <= self.range_sq
    }
}

/// Immutable inputs shared by every kernel invocation of one frame.
///
/// Constructed once at frame start from the live parameters, per the
/// consistent-snapshot requirement: no agent reads a mutable location
/// while the frame is in flight.
pub struct FrameContext<'a> {
    separation: RuleGate,
    cohesion: RuleGate,
    alignment: RuleGate,
    shape: RuleGate,
    bounds: ViewportBounds,
    speed_limit: f32,
    shape_field: &'a dyn ShapeField,
}

impl<'a> FrameContext<'a> {
    /// Freeze the given parameters and collaborators for one frame.
    #[must_use]
    pub fn new(
        params: &RuleParameters,
        bounds: ViewportBounds,
        speed_limit: f32,
        shape_field: &'a dyn ShapeField,
    ) -> Self {
        Self {
            separation: RuleGate::compile(params.separation_weight, params.separation_range),
            cohesion: RuleGate::compile(params.cohesion_weight, params.cohesion_range),
            alignment: RuleGate::compile(params.alignment_weight, params.alignment_range),
            shape: RuleGate::compile(params.shape_weight, params.shape_range),
            bounds,
            speed_limit,
            shape_field,
        }
    }
}

/// Advance one agent by one frame from the frozen snapshot.
///
/// Pure function: same snapshot, same context, same output. The agent at
/// `index` is never counted as its own neighbor, and every division is
/// floored by [`MIN_DISTANCE`], so the result is finite for finite input.
#[must_use]
pub fn advance_agent(index: usize, snapshot: &[AgentData], ctx: &FrameContext<'_>) -> AgentData {
    let agent = snapshot[index];
    let px = agent.position.x;
    let py = agent.position.y;

    let mut repulsion_x = 0.0_f32;
    let mut repulsion_y = 0.0_f32;
    let mut centroid_x = 0.0_f32;
    let mut centroid_y = 0.0_f32;
    let mut cohesion_count = 0_u32;
    let mut mean_vx = 0.0_f32;
    let mut mean_vy = 0.0_f32;
    let mut alignment_count = 0_u32;

    for (other_index, other) in snapshot.iter().enumerate() {
        if other_index == index {
            continue;
        }
        let dx = other.position.x - px;
        let dy = other.position.y - py;
        let dist_sq = dx * dx + dy * dy;

        if ctx.separation.admits(dist_sq) {
            if dist_sq >= MIN_DISTANCE * MIN_DISTANCE {
                // Unit direction away from the neighbor, scaled by 1/d.
                let dist = dist_sq.sqrt();
                repulsion_x -= dx / (dist * dist);
                repulsion_y -= dy / (dist * dist);
            } else {
                // Coincident pair: no repulsion direction exists, so break
                // the tie along x, signed by index order. Both agents of the
                // pair see opposite signs and drift apart.
                let sign = if index < other_index { -1.0 } else { 1.0 };
                repulsion_x += sign / MIN_DISTANCE;
            }
        }
        if ctx.cohesion.admits(dist_sq) {
            centroid_x += other.position.x;
            centroid_y += other.position.y;
            cohesion_count += 1;
        }
        if ctx.alignment.admits(dist_sq) {
            mean_vx += other.velocity.x;
            mean_vy += other.velocity.y;
            alignment_count += 1;
        }
    }

    let mut vx = agent.velocity.x;
    let mut vy = agent.velocity.y;

    vx += repulsion_x * ctx.separation.weight;
    vy += repulsion_y * ctx.separation.weight;

    if cohesion_count > 0 {
        let inv = 1.0 / cohesion_count as f32;
        vx += (centroid_x * inv - px) * ctx.cohesion.weight;
        vy += (centroid_y * inv - py) * ctx.cohesion.weight;
    }

    if alignment_count > 0 {
        let inv = 1.0 / alignment_count as f32;
        vx += (mean_vx * inv - agent.velocity.x) * ctx.alignment.weight;
        vy += (mean_vy * inv - agent.velocity.y) * ctx.alignment.weight;
    }

    let attractor = ctx.shape_field.attractor(agent.position);
    let sx = attractor.x - px;
    let sy = attractor.y - py;
    if ctx.shape.admits(sx * sx + sy * sy) {
        vx += sx * ctx.shape.weight;
        vy += sy * ctx.shape.weight;
    }

    if ctx.speed_limit > 0.0 {
        let speed_sq = vx * vx + vy * vy;
        if speed_sq > ctx.speed_limit * ctx.speed_limit {
            let scale = ctx.speed_limit / speed_sq.sqrt();
            vx *= scale;
            vy *= scale;
        }
    }

    let position = ctx.bounds.wrap(Position::new(px + vx, py + vy));
    AgentData::new(position, Velocity::new(vx, vy))
}

/// Aggregate statistics for one completed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub frame: Frame,
    pub agent_count: usize,
    pub mean_speed: f32,
    pub max_speed: f32,
}

/// Double-buffered swarm state shared by the simulation and the renderer.
pub struct SwarmWorld {
    config: SwarmConfig,
    frame: Frame,
    bounds: ViewportBounds,
    rng: SmallRng,
    params: RuleParameters,
    shape: Box<dyn ShapeField>,
    agents: Vec<AgentData>,
    scratch: Vec<AgentData>,
    history: VecDeque<FrameSummary>,
}

impl fmt::Debug for SwarmWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwarmWorld")
            .field("config", &self.config)
            .field("frame", &self.frame)
            .field("bounds", &self.bounds)
            .field("agent_count", &self.agents.len())
            .field("shape", &self.shape.kind())
            .finish()
    }
}

impl SwarmWorld {
    /// Instantiate a swarm with uniformly random positions over the
    /// viewport and velocity components uniform over `[-1, 1]`.
    pub fn new(config: SwarmConfig) -> Result<Self, SwarmError> {
        let shape = Box::new(RingFormation {
            center: Position::new(
                config.viewport_width as f32 * 0.5,
                config.viewport_height as f32 * 0.5,
            ),
            radius: config.viewport_height as f32 * 0.25,
        });
        Self::with_shape(config, shape)
    }

    /// Instantiate a swarm with an explicit shape-following policy.
    pub fn with_shape(
        config: SwarmConfig,
        shape: Box<dyn ShapeField>,
    ) -> Result<Self, SwarmError> {
        let bounds = config.bounds()?;
        let mut rng = config.seeded_rng();
        let agents: Vec<AgentData> = (0..config.agent_count)
            .map(|_| {
                AgentData::new(
                    Position::new(
                        rng.random_range(0.0..bounds.width),
                        rng.random_range(0.0..bounds.height),
                    ),
                    Velocity::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)),
                )
            })
            .collect();
        let scratch = agents.clone();
        let params = config.params;
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            frame: Frame::zero(),
            bounds,
            rng,
            params,
            shape,
            agents,
            scratch,
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Execute one frame: freeze the inputs, run the kernel once per agent
    /// against the front buffer, then commit the back buffer.
    pub fn step(&mut self) -> FrameSummary {
        let ctx = FrameContext::new(
            &self.params,
            self.bounds,
            self.config.speed_limit,
            self.shape.as_ref(),
        );
        let snapshot: &[AgentData] = &self.agents;
        self.scratch
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, slot)| {
                *slot = advance_agent(index, snapshot, &ctx);
            });

        // Full-frame barrier: par_iter_mut has joined, every next state is
        // written. Only now do the buffer roles swap.
        self.commit_frame();

        let summary = self.summarize();
        if self.config.history_capacity > 0 {
            if self.history.len() >= self.config.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(summary.clone());
        }
        summary
    }

    /// Swap front and back buffers and advance the frame counter.
    fn commit_frame(&mut self) {
        mem::swap(&mut self.agents, &mut self.scratch);
        self.frame = self.frame.next();
    }

    fn summarize(&self) -> FrameSummary {
        let mut total_speed = 0.0_f32;
        let mut max_speed = 0.0_f32;
        for agent in &self.agents {
            let speed = agent.velocity.speed();
            total_speed += speed;
            if speed > max_speed {
                max_speed = speed;
            }
        }
        let agent_count = self.agents.len();
        let mean_speed = if agent_count > 0 {
            total_speed / agent_count as f32
        } else {
            0.0
        };
        FrameSummary {
            frame: self.frame,
            agent_count,
            mean_speed,
            max_speed,
        }
    }

    /// Read-only view of the committed snapshot.
    #[must_use]
    pub fn agents(&self) -> &[AgentData] {
        &self.agents
    }

    /// Number of agents; invariant across frames.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Completed frame count.
    #[must_use]
    pub const fn frame(&self) -> Frame {
        self.frame
    }

    /// Current wrap bounds.
    #[must_use]
    pub const fn bounds(&self) -> ViewportBounds {
        self.bounds
    }

    /// Update wrap bounds from a viewport resize. Positions outside the new
    /// bounds are rewrapped by the next frame's integration.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), SwarmError> {
        if width == 0 || height == 0 {
            return Err(SwarmError::InvalidConfig(
                "viewport dimensions must be non-zero",
            ));
        }
        self.config.viewport_width = width;
        self.config.viewport_height = height;
        self.bounds = ViewportBounds::new(width as f32, height as f32);
        Ok(())
    }

    /// Rule parameters in effect for the next frame.
    #[must_use]
    pub const fn params(&self) -> &RuleParameters {
        &self.params
    }

    /// Mutable access to the rule parameters (for hot edits between frames).
    #[must_use]
    pub fn params_mut(&mut self) -> &mut RuleParameters {
        &mut self.params
    }

    /// Replace the rule parameters wholesale.
    pub fn set_params(&mut self, params: RuleParameters) {
        self.params = params;
    }

    /// Replace the shape-following policy.
    pub fn set_shape_field(&mut self, shape: Box<dyn ShapeField>) {
        self.shape = shape;
    }

    /// Identifier of the active shape-following policy.
    #[must_use]
    pub fn shape_kind(&self) -> &'static str {
        self.shape.kind()
    }

    /// Immutable reference to configuration.
    #[must_use]
    pub const fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Iterate over retained frame summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &FrameSummary> {
        self.history.iter()
    }

    /// Borrow the world RNG mutably for deterministic sampling.
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }
}
