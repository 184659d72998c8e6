use serde::{Deserialize, Serialize};

/// Configuration for fingerprinting behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Remove `//` and `/* */` comments before chunking
    pub strip_comments: bool,

    /// Number of tokens per chunk
    pub chunk_size: usize,

    /// Number of consecutive chunk hashes per winnowing window
    pub window_size: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            strip_comments: true,
            chunk_size: 30,
            window_size: 4,
        }
    }
}

impl FingerprintConfig {
    /// Smaller chunks, denser signature. Catches shorter shared fragments at
    /// the cost of larger fingerprints.
    pub fn fine_grained() -> Self {
        Self {
            chunk_size: 8,
            window_size: 2,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be > 0".to_string());
        }

        if self.window_size == 0 {
            return Err("window_size must be > 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = FingerprintConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 30);
        assert_eq!(config.window_size, 4);
        assert!(config.strip_comments);
    }

    #[test]
    fn test_preset_configs_valid() {
        assert!(FingerprintConfig::fine_grained().validate().is_ok());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let config = FingerprintConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FingerprintConfig {
            window_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
