use serde::{Deserialize, Serialize};

/// Where a container lives or where an operation is directed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Local,
    Remote(String),
}

impl Target {
    /// Build a target from an optional host name; empty means local.
    pub fn from_host(host: Option<&str>) -> Self {
        match host {
            Some(h) if !h.trim().is_empty() => Target::Remote(h.trim().to_string()),
            _ => Target::Local,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Target::Local)
    }

    /// Qualify an lxc object name with the remote prefix (`host:name`).
    pub fn qualify(&self, name: &str) -> String {
        match self {
            Target::Local => name.to_string(),
            Target::Remote(host) => format!("{host}:{name}"),
        }
    }

    /// The bare remote spec (`host:` or `local:`), as accepted by `lxc image copy`.
    pub fn remote_spec(&self) -> String {
        match self {
            Target::Local => "local:".to_string(),
            Target::Remote(host) => format!("{host}:"),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Local => write!(f, "local"),
            Target::Remote(host) => write!(f, "{host}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_host_is_local() {
        assert_eq!(Target::from_host(None), Target::Local);
        assert_eq!(Target::from_host(Some("  ")), Target::Local);
        assert_eq!(Target::from_host(Some("mbuzi")), Target::Remote("mbuzi".into()));
    }

    #[test]
    fn qualify_prefixes_remote_names() {
        assert_eq!(Target::Local.qualify("web/snap"), "web/snap");
        assert_eq!(Target::Remote("h1".into()).qualify("web/snap"), "h1:web/snap");
        assert_eq!(Target::Remote("h1".into()).remote_spec(), "h1:");
    }
}
