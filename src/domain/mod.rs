// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types shared by every other layer: the training
// stage, the dynamic values flowing through dataset pipelines,
// and the step-wise decoding abstraction used by the searcher.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §6 (Enums), §10 (Traits)

// Train / valid / test stage marker
pub mod stage;

// Values produced by manifests and dynamic items
pub mod value;

// Core abstractions (traits) that other layers implement
pub mod traits;
