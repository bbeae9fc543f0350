//! Engine-construction knobs — `spec.md` §4.11.
//!
//! Grounded on `ouros::resource::ResourceLimits`'s plain-struct-plus-builder
//! idiom, simplified: every field here always applies (there's no sandbox
//! "disabled" state a `None` would represent), so `Config` carries bare
//! values with a `Default` impl instead of `Option<T>` fields.

/// Tunables `engine::Engine::new` consumes to build its [`crate::heap::Heap`]
/// and [`crate::vm::Vm`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Byte threshold that triggers the first garbage collection.
    pub gc_initial_threshold: usize,
    /// Multiplier applied to the surviving byte count after a collection to
    /// pick the next threshold.
    pub gc_growth_factor: f64,
    /// Run a full mark-sweep cycle on every allocation instead of waiting
    /// for the threshold. Exists for tests that want to observe collection
    /// deterministically; never enable it outside test code.
    pub stress_gc: bool,
    /// Value stack capacity, in slots.
    pub value_stack_size: usize,
    /// Call-frame stack capacity, in frames.
    pub call_frame_stack_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gc_initial_threshold: 1 << 20,
            gc_growth_factor: 2.0,
            stress_gc: false,
            value_stack_size: 4096,
            call_frame_stack_size: 256,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn gc_initial_threshold(mut self, bytes: usize) -> Self {
        self.gc_initial_threshold = bytes;
        self
    }

    #[must_use]
    pub fn gc_growth_factor(mut self, factor: f64) -> Self {
        self.gc_growth_factor = factor;
        self
    }

    #[must_use]
    pub fn stress_gc(mut self, enabled: bool) -> Self {
        self.stress_gc = enabled;
        self
    }

    #[must_use]
    pub fn value_stack_size(mut self, slots: usize) -> Self {
        self.value_stack_size = slots;
        self
    }

    #[must_use]
    pub fn call_frame_stack_size(mut self, frames: usize) -> Self {
        self.call_frame_stack_size = frames;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.gc_initial_threshold, 1 << 20);
        assert!((config.gc_growth_factor - 2.0).abs() < f64::EPSILON);
        assert!(!config.stress_gc);
        assert_eq!(config.value_stack_size, 4096);
        assert_eq!(config.call_frame_stack_size, 256);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::new().stress_gc(true).value_stack_size(64);
        assert!(config.stress_gc);
        assert_eq!(config.value_stack_size, 64);
        assert_eq!(config.gc_initial_threshold, 1 << 20);
    }
}
