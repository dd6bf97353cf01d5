//! # viewsync: multi-instance view synchronization
//!
//! Keeps several map / 3D viewers looking at the same place. One instance
//! moves its camera; the others follow, optionally through a per-instance
//! transform (offset, mirror, satellite overview). Selection, layer
//! visibility and lighting ride the same channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   JSON frames    ┌────────────────┐
//! │ SyncController │ ◄──────────────► │ SyncController │
//! │  (master)      │   BroadcastBus   │  (slave)       │
//! └───────┬────────┘   per group      └───────┬────────┘
//!         │                                   │
//!         ▼                                   ▼
//! ┌────────────────┐                  ┌────────────────┐
//! │ RoleResolver   │                  │ TransformConfig│
//! │ PeerRegistry   │                  │ (derive view)  │
//! └───────┬────────┘                  └────────────────┘
//!         │
//!  ┌──────┴──────────┐
//!  │ PersistenceAdapter ──► SnapshotStore (RocksDB / memory)
//!  └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`camera`]: map and scene camera states
//! - [`transform`]: reference → derived camera mapping
//! - [`role`]: master / peer / slave gating
//! - [`config`]: per-instance policy and timings
//! - [`protocol`]: wire envelope and message kinds
//! - [`peers`]: liveness registry
//! - [`transport`]: group-scoped broadcast channels
//! - [`persistence`]: late-join snapshots
//! - [`controller`]: the per-instance orchestrator
//! - [`renderer`]: host renderer bridge (move / gesture-end events)

pub mod camera;
pub mod config;
pub mod controller;
pub mod error;
pub mod peers;
pub mod persistence;
pub mod protocol;
pub mod renderer;
pub mod role;
pub mod task;
pub mod transform;
pub mod transport;

// Re-exports for convenience
pub use camera::{CameraState, MapCamera, SceneCamera, Vec3};
pub use config::{SyncConfig, TimingConfig};
pub use controller::{ControllerBuilder, LinkState, SyncController};
pub use error::{ProtocolError, StoreError, SyncError, TransportError};
pub use peers::{PeerInfo, PeerRegistry};
pub use persistence::{
    MemorySnapshotStore, PersistedSnapshot, PersistenceAdapter, RocksSnapshotStore,
    SnapshotStore, StoreConfig,
};
pub use protocol::{AmbianceState, LayerVisibility, MessageBody, SelectionState, SyncMessage};
pub use renderer::{CameraRenderer, RendererBridge};
pub use role::{ChannelKind, Direction, Role, RoleResolver};
pub use transform::{CustomTransform, MirrorParams, OffsetParams, TransformConfig};
pub use transport::{BroadcastBus, BusChannel, NullTransport, Subscription, TransportChannel};
