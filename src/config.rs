use serde::{Deserialize, Serialize};

/// Environment variable overriding the block pool constraints.
///
/// The value is `A:B:C` (or `A;B;C`): minimum block size in megabytes,
/// maximum block size in megabytes, and maximum block count. Fields are
/// applied left to right; missing trailing fields keep their defaults.
pub const CONFIG_ENV_VAR: &str = "BLOCKALLOC_CONFIG";

const MEGABYTE: u64 = 1024 * 1024;

/// Default minimum block size (32 MB).
pub const DEFAULT_MINIMUM_BLOCK_SIZE: u64 = 32 * MEGABYTE;

/// Runtime constraints on the block pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Smallest block the pool will request from the driver, in bytes.
    pub minimum_block_size: u64,
    /// Largest block the pool will request, in bytes. Zero means
    /// unconstrained.
    pub maximum_block_size: u64,
    /// Ceiling on concurrently live blocks. Zero means unconstrained.
    pub maximum_block_count: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            minimum_block_size: DEFAULT_MINIMUM_BLOCK_SIZE,
            maximum_block_size: 0,
            maximum_block_count: 0,
        }
    }
}

impl AllocatorConfig {
    /// The defaults with any `BLOCKALLOC_CONFIG` overrides applied.
    pub fn from_env() -> Self {
        Self::default().override_from_env()
    }

    /// Apply overrides from the environment on top of `self`.
    pub fn override_from_env(self) -> Self {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(value) => self.override_from_str(&value),
            Err(_) => self,
        }
    }

    /// Apply `A:B:C` / `A;B;C` overrides on top of `self`. Sizes are in
    /// megabytes; a zero minimum keeps the default, zero maxima mean
    /// unconstrained.
    pub fn override_from_str(mut self, value: &str) -> Self {
        for (index, field) in value.split([':', ';']).take(3).enumerate() {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let Ok(parsed) = field.parse::<u64>() else {
                log::warn!("ignoring malformed allocator config field {field:?}");
                continue;
            };
            match index {
                0 => {
                    if parsed > 0 {
                        self.minimum_block_size = parsed * MEGABYTE;
                    }
                }
                1 => self.maximum_block_size = parsed * MEGABYTE,
                _ => self.maximum_block_count = parsed as usize,
            }
        }
        log::debug!(
            "allocator configured: minimum_block_size={} maximum_block_size={} maximum_block_count={}",
            self.minimum_block_size,
            self.maximum_block_size,
            self.maximum_block_count
        );
        self
    }
}
