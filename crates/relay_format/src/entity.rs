//! Scene entities as seen by the exporter
//!
//! Every entity has a stable [`EntityId`] and a [`Revision`] that the host
//! bumps on each attribute change. The payload is one of the kinds the
//! stream format knows how to encode; kinds surfaced by the host that the
//! format does not know are carried as [`EntityData::Foreign`] and rejected
//! at encode time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a scene entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Create an ID from its raw value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic per-entity change counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Revision(u64);

impl Revision {
    /// Revision of an entity that has never been edited
    pub const ZERO: Revision = Revision(0);

    /// Create a revision from its raw value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw revision value
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// The revision following this one
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// The kind of an entity, with its wire tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Mesh,
    Material,
    Light,
    Camera,
    Object,
    Action,
    Image,
    /// A kind the stream format has no encoding for
    Foreign(String),
}

impl EntityKind {
    /// Wire tag for this kind (`None` for foreign kinds)
    pub fn tag(&self) -> Option<u8> {
        match self {
            Self::Mesh => Some(1),
            Self::Material => Some(2),
            Self::Light => Some(3),
            Self::Camera => Some(4),
            Self::Object => Some(5),
            Self::Action => Some(6),
            Self::Image => Some(7),
            Self::Foreign(_) => None,
        }
    }

    /// Look up a kind by wire tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Mesh),
            2 => Some(Self::Material),
            3 => Some(Self::Light),
            4 => Some(Self::Camera),
            5 => Some(Self::Object),
            6 => Some(Self::Action),
            7 => Some(Self::Image),
            _ => None,
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &str {
        match self {
            Self::Mesh => "mesh",
            Self::Material => "material",
            Self::Light => "light",
            Self::Camera => "camera",
            Self::Object => "object",
            Self::Action => "action",
            Self::Image => "image",
            Self::Foreign(name) => name.as_str(),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Triangle mesh geometry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    /// Empty, or one normal per position
    pub normals: Vec<[f32; 3]>,
    /// Empty, or one UV per position
    pub uvs: Vec<[f32; 2]>,
    /// Triangle list
    pub indices: Vec<u32>,
    pub material: Option<EntityId>,
}

/// Surface material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialData {
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub roughness: f32,
    pub metallic: f32,
    pub base_color_texture: Option<EntityId>,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            base_color: [0.8, 0.8, 0.8, 1.0],
            emissive: [0.0; 3],
            roughness: 0.5,
            metallic: 0.0,
            base_color_texture: None,
        }
    }
}

/// Light emitter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightType {
    Point,
    Sun,
    Spot,
}

/// Light source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightData {
    pub light_type: LightType,
    pub color: [f32; 3],
    pub intensity: f32,
    pub radius: f32,
    pub animation: Option<EntityId>,
}

impl Default for LightData {
    fn default() -> Self {
        Self {
            light_type: LightType::Point,
            color: [1.0; 3],
            intensity: 1.0,
            radius: 0.1,
            animation: None,
        }
    }
}

/// Column-major identity matrix
pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Camera with physical lens parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraData {
    pub view: [f32; 16],
    pub projection: [f32; 16],
    pub shutter_speed: f32,
    pub focus_distance: f32,
    pub focal_length: f32,
    pub fstop: f32,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            view: IDENTITY,
            projection: IDENTITY,
            shutter_speed: 0.01,
            focus_distance: 1.0,
            focal_length: 35.0,
            fstop: 16.0,
        }
    }
}

/// Placed instance in the scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    pub transform: [f32; 16],
    pub mesh: Option<EntityId>,
    pub parent: Option<EntityId>,
    pub animation: Option<EntityId>,
    pub visible: bool,
}

impl Default for ObjectData {
    fn default() -> Self {
        Self {
            transform: IDENTITY,
            mesh: None,
            parent: None,
            animation: None,
            visible: true,
        }
    }
}

/// Keyframe interpolation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    Constant,
    Linear,
    Bezier,
}

/// A single animation key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
    pub interpolation: Interpolation,
}

/// One animated property channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveData {
    /// Property path, e.g. `location`
    pub target: String,
    /// Component index within the property
    pub index: u32,
    /// Sorted by time
    pub keyframes: Vec<Keyframe>,
}

/// Animation clip
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionData {
    pub curves: Vec<CurveData>,
}

/// RGBA8 image
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Entity payload
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Mesh(MeshData),
    Material(MaterialData),
    Light(LightData),
    Camera(CameraData),
    Object(ObjectData),
    Action(ActionData),
    Image(ImageData),
    /// Host data of a kind the format cannot encode
    Foreign { kind: String },
}

impl EntityData {
    /// The kind of this payload
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Mesh(_) => EntityKind::Mesh,
            Self::Material(_) => EntityKind::Material,
            Self::Light(_) => EntityKind::Light,
            Self::Camera(_) => EntityKind::Camera,
            Self::Object(_) => EntityKind::Object,
            Self::Action(_) => EntityKind::Action,
            Self::Image(_) => EntityKind::Image,
            Self::Foreign { kind } => EntityKind::Foreign(kind.clone()),
        }
    }
}

/// An addressable unit of the scene at a given revision
#[derive(Debug, Clone, PartialEq)]
pub struct SceneEntity {
    pub id: EntityId,
    pub revision: Revision,
    pub name: String,
    pub data: EntityData,
}

impl SceneEntity {
    /// Create an entity at the given revision
    pub fn new(id: EntityId, revision: Revision, name: impl Into<String>, data: EntityData) -> Self {
        Self {
            id,
            revision,
            name: name.into(),
            data,
        }
    }

    /// The kind of this entity
    pub fn kind(&self) -> EntityKind {
        self.data.kind()
    }
}
