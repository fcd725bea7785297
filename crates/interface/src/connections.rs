//! 连接定义文件
//!
//! ```yaml
//! connections:
//!   - id: shop
//!     type: mysql
//!     host: db.internal
//!     database: shop
//!     username: analyst
//!     password: secret
//! notebooks:
//!   finance: [shop]
//! ```

use std::collections::HashMap;
use std::path::Path;

use datasage_core::{ConnectionDescriptor, StaticConnectionResolver};
use serde::Deserialize;
use tracing::debug;

use crate::cli::CliError;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectionsFile {
    #[serde(default)]
    pub connections: Vec<ConnectionDescriptor>,

    /// notebook id -> 可访问的连接 ID
    #[serde(default)]
    pub notebooks: HashMap<String, Vec<String>>,
}

impl ConnectionsFile {
    pub fn parse(content: &str) -> Result<Self, CliError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: Self = serde_yaml::from_str(content)
            .map_err(|e| CliError::Connections(e.to_string()))?;

        let mut seen = std::collections::HashSet::new();
        for conn in &file.connections {
            if !seen.insert(conn.id.as_str()) {
                return Err(CliError::Connections(format!("duplicate connection id: {}", conn.id)));
            }
        }
        Ok(file)
    }

    /// 文件不存在时视为空
    pub fn load(path: &Path) -> Result<Self, CliError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No connections file");
                Ok(Self::default())
            }
            Err(e) => Err(CliError::Connections(format!("{}: {}", path.display(), e))),
        }
    }

    pub fn into_resolver(self) -> StaticConnectionResolver {
        self.notebooks
            .into_iter()
            .fold(StaticConnectionResolver::new(self.connections), |resolver, (notebook, ids)| {
                resolver.with_notebook(notebook, ids)
            })
    }
}
