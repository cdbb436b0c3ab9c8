/// The Q-learning clown agent and batch trainer
pub mod agent;

/// Implementations of strategies for time-decaying hyperparameters
pub mod decay;

/// Configuration errors
pub mod error;

/// Events emitted toward a downstream renderer
pub mod event;

/// Exploration policies
pub mod exploration;

/// The circus grid world
pub mod grid;

/// The shared action-value table
pub mod table;
