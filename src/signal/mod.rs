pub mod levels;
pub mod momentum;

pub use levels::{build_levels, FallbackCaps};
pub use momentum::{base_confidence, classify_side, MomentumThresholds};
