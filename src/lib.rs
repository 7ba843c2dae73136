//! Minimact core: the reconciliation and template-prediction engine.
//!
//! The host runtime submits pre-built VNode trees and state deltas; the
//! core diffs trees into ordered patch lists, generalizes observed
//! transitions into parameterized templates, and serves predicted patches
//! for future deltas. It renders no HTML, opens no sockets, and loads no
//! files.

pub mod engine;
pub mod error;
pub mod extractor;
pub mod ffi;
pub mod hints;
pub mod logging;
pub mod metrics;
pub mod patch_validator;
pub mod path;
pub mod predictor;
pub mod reconciler;
pub mod state_paths;
pub mod store;
pub mod template;
pub mod transform;
pub mod validation;
pub mod vdom;
pub mod wire;

pub use engine::{Engine, EngineConfig};
pub use error::{Error, ErrorCode, FfiResult, Result, ValidationError};
pub use extractor::extract;
pub use hints::{HintCache, HintCacheConfig};
pub use metrics::{MetricsSnapshot, METRICS};
pub use path::HexPath;
pub use predictor::{predict, Hint};
pub use reconciler::{reconcile, reconcile_with_limits};
pub use state_paths::StateMap;
pub use store::{StoreConfig, TemplateDelta, TemplateStore};
pub use template::{Fingerprint, ListOperation, ListOperationKind, NodeTemplate, Slot, Template};
pub use transform::{Transform, TRANSFORM_WHITELIST_VERSION};
pub use validation::{deserialize_vnode_safe, Limits};
pub use vdom::{Patch, VElement, VNode, VNull, VText};
