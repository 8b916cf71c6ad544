//! Tests for engine configuration parsing
//!
//! - Loading the shipped config file
//! - Defaults for omitted fields
//! - Rejection of malformed JSON, unknown fields and out-of-range variants

use std::io::Write;

use convnet_engine::config::{load_config, EngineConfig};
use convnet_engine::{Backend, EngineError};
use tempfile::NamedTempFile;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn load_str(contents: &str) -> Result<EngineConfig, EngineError> {
    let file = write_temp(contents);
    load_config(file.path().to_str().unwrap())
}

// ============================================================================
// Valid Config Loading Tests
// ============================================================================

mod valid_config_tests {
    use super::*;

    #[test]
    fn test_load_shipped_config() {
        let config = load_config("config/engine.json").expect("Failed to load engine config");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.device().unwrap().backend(), Backend::Cpu);
    }

    #[test]
    fn test_variant_overrides() {
        let config = load_str(
            r#"{
  "backend": "cpu",
  "propagate_variant": 1,
  "backprop_errors_variant": 2,
  "backprop_weights_variant": 0,
  "pooling_variant": 1
}"#,
        )
        .unwrap();
        assert_eq!(config.propagate_variant, Some(1));
        assert_eq!(config.backprop_errors_variant, Some(2));
        assert_eq!(config.backprop_weights_variant, Some(0));
        assert_eq!(config.pooling_variant, Some(1));
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = load_str("{}").unwrap();
        assert_eq!(config.backend, Backend::Cpu);
        assert!(config.propagate_variant.is_none());
    }
}

// ============================================================================
// Error Handling Tests
// ============================================================================

mod error_handling_tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let result = load_config("nonexistent_config.json");
        assert!(matches!(result, Err(EngineError::Io(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            load_str("not valid json at all"),
            Err(EngineError::Json(_))
        ));
    }

    #[test]
    fn test_unknown_backend() {
        assert!(matches!(
            load_str(r#"{ "backend": "opencl" }"#),
            Err(EngineError::Json(_))
        ));
    }

    #[test]
    fn test_variant_out_of_range() {
        let result = load_str(r#"{ "pooling_variant": 2 }"#);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_wrong_type_variant() {
        assert!(load_str(r#"{ "propagate_variant": "gemm" }"#).is_err());
    }

    #[cfg(not(feature = "blas"))]
    #[test]
    fn test_blas_backend_needs_feature() {
        let result = load_str(r#"{ "backend": "blas" }"#);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }
}
