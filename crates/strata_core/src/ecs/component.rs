//! # Component Types
//!
//! Components are pure data containers with no behavior. They are `Pod` so
//! that their durable form is simply their byte image.

use bytemuck::{Pod, Zeroable};

/// Stable identifier of a component type.
///
/// Shared with the persistence backend, so it must never be reassigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeId(pub u16);

impl std::fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marker trait for components.
///
/// Components must be:
/// - `Copy` + `Pod`: bitwise copyable, byte image is the stored form
/// - `PartialEq`: lets tests and observers compare values
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
/// #[repr(C)]
/// struct Fuel {
///     litres: f32,
/// }
///
/// impl Component for Fuel {
///     const ID: ComponentTypeId = ComponentTypeId(40);
///     const NAME: &'static str = "fuel";
/// }
/// ```
pub trait Component: Copy + Pod + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    /// Unique identifier for this component type.
    const ID: ComponentTypeId;

    /// Human-readable name, used in logs.
    const NAME: &'static str;

    /// Whether changes are mirrored to the database.
    const PERSISTENT: bool = true;
}

/// Block/voxel material of an entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Material {
    /// Material type ID.
    pub id: u16,
}

impl Material {
    /// Creates a material component.
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self { id }
    }
}

impl Component for Material {
    const ID: ComponentTypeId = ComponentTypeId(1);
    const NAME: &'static str = "material";
}

/// Position in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Position {
    /// X coordinate in world space.
    pub x: f32,
    /// Y coordinate in world space.
    pub y: f32,
    /// Z coordinate in world space.
    pub z: f32,
}

impl Position {
    /// Creates a new position.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl Component for Position {
    const ID: ComponentTypeId = ComponentTypeId(2);
    const NAME: &'static str = "position";
}

/// Hit points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Health {
    /// Current hit points.
    pub current: i32,
    /// Maximum hit points.
    pub max: i32,
}

impl Health {
    /// Creates a health component at full hit points.
    #[inline]
    #[must_use]
    pub const fn full(max: i32) -> Self {
        Self { current: max, max }
    }
}

impl Component for Health {
    const ID: ComponentTypeId = ComponentTypeId(3);
    const NAME: &'static str = "health";
}

/// Movement speed in world units per second.
///
/// Recomputed every tick, so never mirrored to the database.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Velocity {
    /// X velocity component.
    pub x: f32,
    /// Y velocity component.
    pub y: f32,
    /// Z velocity component.
    pub z: f32,
}

impl Velocity {
    /// Creates a new velocity.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl Component for Velocity {
    const ID: ComponentTypeId = ComponentTypeId(4);
    const NAME: &'static str = "velocity";
    const PERSISTENT: bool = false;
}
