//! Worker service registry.
//!
//! Maps a step's `service` name to the subjects the engine publishes
//! dispatch messages to and consumes responses from. Loaded from YAML:
//!
//! ```yaml
//! services:
//!   - name: echo-service
//!     input_subject: services.echo.in
//!     output_subject: services.echo.out
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::state::NATIVE_SERVICE;
use crate::error::{AppError, AppResult};

/// Bus channels of one worker service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub input_subject: String,
    pub output_subject: String,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    services: Vec<ServiceEndpoint>,
}

/// Registry of worker services keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceEndpoint>,
}

impl ServiceRegistry {
    /// Build a registry from endpoints, rejecting duplicates and the reserved
    /// `native` name.
    pub fn new(endpoints: impl IntoIterator<Item = ServiceEndpoint>) -> AppResult<Self> {
        let mut services = HashMap::new();
        for endpoint in endpoints {
            if endpoint.name == NATIVE_SERVICE {
                return Err(AppError::Config(format!(
                    "service name '{}' is reserved",
                    NATIVE_SERVICE
                )));
            }
            if services.contains_key(&endpoint.name) {
                return Err(AppError::Config(format!(
                    "service '{}' is declared twice",
                    endpoint.name
                )));
            }
            services.insert(endpoint.name.clone(), endpoint);
        }
        Ok(Self { services })
    }

    /// Parse a registry from YAML text.
    pub fn from_yaml(content: &str) -> AppResult<Self> {
        let file: RegistryFile = serde_yaml::from_str(content)?;
        Self::new(file.services)
    }

    /// Load the registry file. A missing file yields an empty registry so the
    /// engine can still run native-only workflows.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Service registry not found, no worker services configured");
                Ok(Self::default())
            }
            Err(e) => Err(AppError::Config(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceEndpoint> {
        self.services.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceEndpoint> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
