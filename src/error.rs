use thiserror::Error;

/// Configuration rejected at construction. Invalid values are reported,
/// never clamped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("grid size must be at least 2, got {0}")]
    GridTooSmall(usize),
    #[error("{hazards} hazards do not fit a {size}x{size} grid with a start and a goal")]
    TooManyHazards { size: usize, hazards: usize },
    #[error("a layout of {len} tiles does not fill a {size}x{size} grid")]
    LayoutSize { size: usize, len: usize },
    #[error("a layout must contain exactly one start and one goal tile")]
    LayoutAnchors,
    #[error("`{name}` must be in the interval [0, 1], got {value}")]
    OutOfInterval { name: &'static str, value: f32 },
    #[error("`{0}` must be at least 1")]
    ZeroCount(&'static str),
    #[error("`vi - vf` must have the same sign as `rate`")]
    InvalidDecay,
}
