//! Physics world adapter
//!
//! The simulation and command handlers talk to physics only through the
//! [`PhysicsWorld`] trait. [`RapierWorld`] is the production implementation;
//! tests use the scripted world in [`testing`].

use hashbrown::HashMap;
use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::util::math::{Quat, Vec3};

/// Opaque physics body identifier. May be recycled by the engine after the
/// body is removed, so it must never be used as entity identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(pub u64);

/// How the engine drives a body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Fully simulated, responds to contacts
    Dynamic,
    /// Moved only by the velocity we set
    KinematicVelocity,
}

/// Box collider attached to a body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColliderShape {
    pub half_extents: Vec3,
    /// Sensors report overlaps but produce no contact forces
    pub sensor: bool,
    /// Whether this collider emits collision start/stop events
    pub collision_events: bool,
}

impl ColliderShape {
    pub fn cuboid(half_extents: Vec3) -> Self {
        Self {
            half_extents,
            sensor: false,
            collision_events: false,
        }
    }

    pub fn sensor(mut self) -> Self {
        self.sensor = true;
        self
    }

    pub fn with_collision_events(mut self) -> Self {
        self.collision_events = true;
        self
    }
}

/// Position + orientation used when creating a body
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Body state read back after a step
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
}

/// Contact begin/end between two bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionEvent {
    pub a: BodyHandle,
    pub b: BodyHandle,
    pub started: bool,
}

impl CollisionEvent {
    pub fn involves(&self, handle: BodyHandle) -> bool {
        self.a == handle || self.b == handle
    }
}

/// Line-list collider wireframes for client-side visualization.
/// `vertices` holds xyz triples (two per line), `colors` one rgba per vertex.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugGeometry {
    pub vertices: Vec<f32>,
    pub colors: Vec<f32>,
}

impl DebugGeometry {
    pub fn line_count(&self) -> usize {
        self.vertices.len() / 6
    }

    pub fn push_line(&mut self, a: Vec3, b: Vec3, rgba: [f32; 4]) {
        self.vertices.extend_from_slice(&[a.x, a.y, a.z, b.x, b.y, b.z]);
        self.colors.extend_from_slice(&rgba);
        self.colors.extend_from_slice(&rgba);
    }
}

/// Capabilities the game needs from a rigid-body engine
pub trait PhysicsWorld: Send {
    /// Create a body with one attached collider
    fn create_body(&mut self, pose: Pose, kind: BodyKind, shape: ColliderShape) -> BodyHandle;

    /// Remove a body and its colliders. Returns false if it did not exist.
    fn remove_body(&mut self, handle: BodyHandle) -> bool;

    /// Advance the world by `dt` seconds and return the collision events
    /// generated during the step
    fn step(&mut self, dt: f32) -> Vec<CollisionEvent>;

    fn transform(&self, handle: BodyHandle) -> Option<Transform>;

    fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec3) -> bool;

    fn set_rotation(&mut self, handle: BodyHandle, rotation: Quat) -> bool;

    fn body_count(&self) -> usize;

    fn debug_geometry(&self) -> DebugGeometry;
}

fn to_rapier(handle: BodyHandle) -> RigidBodyHandle {
    RigidBodyHandle::from_raw_parts((handle.0 & 0xFFFF_FFFF) as u32, (handle.0 >> 32) as u32)
}

fn from_rapier(handle: RigidBodyHandle) -> BodyHandle {
    let (index, generation) = handle.into_raw_parts();
    BodyHandle(((generation as u64) << 32) | index as u64)
}

fn to_unit_quaternion(q: Quat) -> UnitQuaternion<Real> {
    let q = q.normalize();
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
}

fn from_unit_quaternion(q: &UnitQuaternion<Real>) -> Quat {
    Quat::new(q.i, q.j, q.k, q.w)
}

/// Zero-gravity rapier3d world
pub struct RapierWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_params: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    /// Collider -> owning body, kept so events for just-removed colliders
    /// can still be resolved
    collider_owner: HashMap<ColliderHandle, RigidBodyHandle>,
}

impl RapierWorld {
    pub fn new() -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vector![0.0, 0.0, 0.0],
            integration_params: IntegrationParameters::default(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            collider_owner: HashMap::new(),
        }
    }
}

impl Default for RapierWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsWorld for RapierWorld {
    fn create_body(&mut self, pose: Pose, kind: BodyKind, shape: ColliderShape) -> BodyHandle {
        let isometry = Isometry::from_parts(
            vector![pose.position.x, pose.position.y, pose.position.z].into(),
            to_unit_quaternion(pose.rotation),
        );
        let builder = match kind {
            BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
            BodyKind::KinematicVelocity => RigidBodyBuilder::kinematic_velocity_based(),
        };
        let body_handle = self.bodies.insert(builder.position(isometry).build());

        let half = shape.half_extents;
        let mut collider = ColliderBuilder::cuboid(half.x, half.y, half.z).sensor(shape.sensor);
        if shape.collision_events {
            collider = collider.active_events(ActiveEvents::COLLISION_EVENTS);
        }
        let collider_handle =
            self.colliders
                .insert_with_parent(collider.build(), body_handle, &mut self.bodies);
        self.collider_owner.insert(collider_handle, body_handle);

        from_rapier(body_handle)
    }

    fn remove_body(&mut self, handle: BodyHandle) -> bool {
        let rapier_handle = to_rapier(handle);
        let removed = self.bodies.remove(
            rapier_handle,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        // Owner entries stay until the next step so removal events resolve
        removed.is_some()
    }

    fn step(&mut self, dt: f32) -> Vec<CollisionEvent> {
        self.integration_params.dt = dt;

        let (collision_send, collision_recv) =
            rapier3d::crossbeam::channel::unbounded::<rapier3d::geometry::CollisionEvent>();
        let (force_send, _force_recv) =
            rapier3d::crossbeam::channel::unbounded::<ContactForceEvent>();
        let event_handler = ChannelEventCollector::new(collision_send, force_send);

        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &event_handler,
        );

        let mut events = Vec::new();
        while let Ok(event) = collision_recv.try_recv() {
            let (c1, c2, started) = match event {
                rapier3d::geometry::CollisionEvent::Started(c1, c2, _) => (c1, c2, true),
                rapier3d::geometry::CollisionEvent::Stopped(c1, c2, _) => (c1, c2, false),
            };
            match (self.collider_owner.get(&c1), self.collider_owner.get(&c2)) {
                (Some(&a), Some(&b)) => events.push(CollisionEvent {
                    a: from_rapier(a),
                    b: from_rapier(b),
                    started,
                }),
                _ => debug!("Dropping collision event for unknown collider"),
            }
        }

        let colliders = &self.colliders;
        self.collider_owner.retain(|collider, _| colliders.contains(*collider));

        events
    }

    fn transform(&self, handle: BodyHandle) -> Option<Transform> {
        let body = self.bodies.get(to_rapier(handle))?;
        let t = body.translation();
        let v = body.linvel();
        Some(Transform {
            position: Vec3::new(t.x, t.y, t.z),
            rotation: from_unit_quaternion(body.rotation()),
            velocity: Vec3::new(v.x, v.y, v.z),
        })
    }

    fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec3) -> bool {
        match self.bodies.get_mut(to_rapier(handle)) {
            Some(body) => {
                body.set_linvel(vector![velocity.x, velocity.y, velocity.z], true);
                true
            }
            None => false,
        }
    }

    fn set_rotation(&mut self, handle: BodyHandle, rotation: Quat) -> bool {
        match self.bodies.get_mut(to_rapier(handle)) {
            Some(body) => {
                body.set_rotation(to_unit_quaternion(rotation), true);
                true
            }
            None => false,
        }
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }

    #[cfg(feature = "debug_meshes")]
    fn debug_geometry(&self) -> DebugGeometry {
        use rapier3d::pipeline::{DebugRenderMode, DebugRenderPipeline, DebugRenderStyle};

        let mut pipeline =
            DebugRenderPipeline::new(DebugRenderStyle::default(), DebugRenderMode::COLLIDER_SHAPES);
        let mut backend = debug_render::LineCollector::default();
        pipeline.render(
            &mut backend,
            &self.bodies,
            &self.colliders,
            &self.impulse_joints,
            &self.multibody_joints,
            &self.narrow_phase,
        );
        backend.geometry
    }

    #[cfg(not(feature = "debug_meshes"))]
    fn debug_geometry(&self) -> DebugGeometry {
        DebugGeometry::default()
    }
}

#[cfg(feature = "debug_meshes")]
mod debug_render {
    use rapier3d::pipeline::{DebugRenderBackend, DebugRenderObject};
    use rapier3d::prelude::*;

    use super::DebugGeometry;
    use crate::util::math::Vec3;

    #[derive(Default)]
    pub(super) struct LineCollector {
        pub(super) geometry: DebugGeometry,
    }

    impl DebugRenderBackend for LineCollector {
        fn draw_line(
            &mut self,
            _object: DebugRenderObject,
            a: Point<Real>,
            b: Point<Real>,
            color: [f32; 4],
        ) {
            self.geometry.push_line(
                Vec3::new(a.x, a.y, a.z),
                Vec3::new(b.x, b.y, b.z),
                super::hsla_to_rgba(color),
            );
        }
    }
}

/// rapier's debug style colors are HSLA (hue in degrees)
#[cfg_attr(not(feature = "debug_meshes"), allow(dead_code))]
fn hsla_to_rgba([h, s, l, a]: [f32; 4]) -> [f32; 4] {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let h = (h.rem_euclid(360.0)) / 60.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    [r + m, g + m, b + m, a]
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::physics::DT;

    fn player_shape() -> ColliderShape {
        ColliderShape::cuboid(Vec3::new(1.0, 1.0, 2.0))
    }

    #[test]
    fn test_handle_roundtrip() {
        let mut world = RapierWorld::new();
        let handle = world.create_body(Pose::default(), BodyKind::Dynamic, player_shape());
        assert_eq!(from_rapier(to_rapier(handle)), handle);
    }

    #[test]
    fn test_create_and_remove_body() {
        let mut world = RapierWorld::new();
        let handle = world.create_body(Pose::default(), BodyKind::Dynamic, player_shape());
        assert_eq!(world.body_count(), 1);
        assert!(world.transform(handle).is_some());

        assert!(world.remove_body(handle));
        assert_eq!(world.body_count(), 0);
        assert!(world.transform(handle).is_none());
        assert!(!world.remove_body(handle));
    }

    #[test]
    fn test_missing_body_is_not_fatal() {
        let mut world = RapierWorld::new();
        let ghost = BodyHandle(42);
        assert!(!world.set_linear_velocity(ghost, Vec3::X));
        assert!(!world.set_rotation(ghost, Quat::IDENTITY));
        assert!(world.transform(ghost).is_none());
    }

    #[test]
    fn test_velocity_moves_body() {
        let mut world = RapierWorld::new();
        let handle = world.create_body(
            Pose::at(Vec3::ZERO),
            BodyKind::KinematicVelocity,
            player_shape(),
        );
        world.set_linear_velocity(handle, Vec3::new(6.0, 0.0, 0.0));

        for _ in 0..60 {
            world.step(DT);
        }

        let transform = world.transform(handle).unwrap();
        assert!((transform.position.x - 6.0).abs() < 0.1);
        assert!(transform.velocity.approx_eq(Vec3::new(6.0, 0.0, 0.0), 1e-4));
    }

    #[test]
    fn test_set_rotation_reads_back() {
        let mut world = RapierWorld::new();
        let handle = world.create_body(Pose::default(), BodyKind::KinematicVelocity, player_shape());
        let half_turn = Quat::new(0.0, 1.0, 0.0, 0.0);
        world.set_rotation(handle, half_turn);

        let rotation = world.transform(handle).unwrap().rotation;
        assert!(rotation.approx_eq(half_turn, 1e-4));
    }

    #[test]
    fn test_sensor_overlap_reports_started_event() {
        let mut world = RapierWorld::new();
        let player = world.create_body(Pose::at(Vec3::ZERO), BodyKind::Dynamic, player_shape());
        let enemy = world.create_body(
            Pose::at(Vec3::new(0.5, 0.0, 0.0)),
            BodyKind::KinematicVelocity,
            player_shape().sensor().with_collision_events(),
        );

        let mut events = Vec::new();
        for _ in 0..3 {
            events.extend(world.step(DT));
        }

        assert!(events
            .iter()
            .any(|e| e.started && e.involves(player) && e.involves(enemy)));
    }

    #[test]
    fn test_hsla_to_rgba_primaries() {
        let red = hsla_to_rgba([0.0, 1.0, 0.5, 1.0]);
        assert!((red[0] - 1.0).abs() < 1e-5 && red[1].abs() < 1e-5 && red[2].abs() < 1e-5);
        let blue = hsla_to_rgba([240.0, 1.0, 0.5, 0.5]);
        assert!(blue[0].abs() < 1e-5 && (blue[2] - 1.0).abs() < 1e-5);
        assert_eq!(blue[3], 0.5);
    }

    #[cfg(feature = "debug_meshes")]
    #[test]
    fn test_debug_geometry_draws_cuboid_edges() {
        let mut world = RapierWorld::new();
        world.create_body(Pose::default(), BodyKind::Dynamic, player_shape());
        world.step(DT);

        let geometry = world.debug_geometry();
        assert!(geometry.line_count() >= 12);
        assert_eq!(geometry.colors.len(), geometry.vertices.len() / 3 * 4);
    }

    #[test]
    fn test_scripted_world_recycles_handles() {
        let mut world = testing::ScriptedWorld::new();
        let first = world.create_body(Pose::default(), BodyKind::Dynamic, player_shape());
        world.remove_body(first);
        let second = world.create_body(Pose::default(), BodyKind::Dynamic, player_shape());
        assert_eq!(first, second);
    }
}
