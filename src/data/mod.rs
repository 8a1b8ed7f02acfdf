/// Data layer: exposure models, loading, and association member selection.
///
/// Architecture:
/// ```text
///  uncal / rate / asn .json
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → DataModel / Association
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │  DataModel    │  ArrayD<f32> + ExposureMeta
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  group product members by type → science, background
///   └──────────┘
/// ```

pub mod loader;
pub mod model;
pub mod filter;
