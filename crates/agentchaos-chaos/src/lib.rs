//! Chaos strategy engine
//!
//! Traffic classification plus the strategy catalog: every attack a chaos
//! plan can schedule against intercepted agent traffic, executed behind a
//! per-strategy circuit breaker so a misbehaving strategy disables itself
//! instead of breaking the proxied flow.

pub mod classifier;
pub mod factory;
pub mod strategies;
pub mod strategy;

pub use classifier::TrafficClassifier;
pub use factory::StrategyFactory;
pub use strategy::{Strategy, StrategyCommon, StrategyHandle, TargetMatcher};
