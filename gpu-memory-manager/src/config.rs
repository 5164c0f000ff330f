use crate::error::{MemoryError, Result};

/// Memory pool configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum device memory the pool may hold from the backend (bytes)
    pub memory_limit: usize,
    /// Slab size classes, ascending. Requests above the largest class are
    /// served by the backend directly.
    pub slab_sizes: Vec<usize>,
    /// Upper bound on live slabs per class
    pub max_slabs_per_class: usize,
    /// Alignment of oversize allocations (power of two)
    pub alignment: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            memory_limit: 8 * 1024 * 1024 * 1024, // 8GB
            slab_sizes: vec![
                256,
                1024,
                4 * 1024,
                16 * 1024,
                64 * 1024,
                256 * 1024,
                1024 * 1024,
                4 * 1024 * 1024,
            ],
            max_slabs_per_class: 1024,
            alignment: 256,
        }
    }
}

impl MemoryConfig {
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn with_slab_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.slab_sizes = sizes;
        self
    }

    pub fn with_max_slabs_per_class(mut self, max: usize) -> Self {
        self.max_slabs_per_class = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.slab_sizes.is_empty() {
            return Err(MemoryError::InvalidConfig("no slab sizes configured".into()));
        }
        if self.slab_sizes.contains(&0) {
            return Err(MemoryError::InvalidConfig("slab size must be non-zero".into()));
        }
        if self.slab_sizes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(MemoryError::InvalidConfig(format!(
                "slab sizes must be strictly ascending: {:?}",
                self.slab_sizes
            )));
        }
        if !self.alignment.is_power_of_two() {
            return Err(MemoryError::InvalidConfig(format!(
                "alignment {} is not a power of two",
                self.alignment
            )));
        }
        if self.max_slabs_per_class == 0 {
            return Err(MemoryError::InvalidConfig("max_slabs_per_class must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(MemoryConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_unsorted_slab_sizes() {
        let config = MemoryConfig::default().with_slab_sizes(vec![1024, 256]);
        assert!(matches!(config.validate(), Err(MemoryError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_bad_alignment() {
        let config = MemoryConfig {
            alignment: 48,
            ..MemoryConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
