//! Path patterns for routing hub requests.
//!
//! A pattern is a `/`-separated template where `{name}` segments capture the
//! corresponding request segment. Matching is exact on segment count and the
//! query string is ignored.

use crate::error::WireError;

/// Captured path parameters of a single match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    values: Vec<(String, String)>,
}

impl PathParams {
    /// Value of a captured parameter
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Value of a captured parameter, failing when missing
    pub fn require(&self, name: &str) -> Result<&str, WireError> {
        self.get(name)
            .ok_or_else(|| WireError::Param(name.to_string()))
    }

    /// Captured parameter parsed as a port number
    pub fn port(&self, name: &str) -> Result<u16, WireError> {
        self.require(name)?
            .parse()
            .map_err(|_| WireError::Param(name.to_string()))
    }

    /// Number of captured parameters
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Compiled path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a template such as `/api/services/{proto}/{svc}`
    pub fn new(template: &str) -> Self {
        let segments = split(template)
            .map(|seg| {
                match seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(name) => Segment::Param(name.to_string()),
                    None => Segment::Literal(seg.to_string()),
                }
            })
            .collect();

        Self { segments }
    }

    /// Match a request path, returning the captured parameters
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let path = path.split('?').next().unwrap_or_default();
        let mut params = PathParams::default();
        let mut parts = split(path);

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => params.values.push((name.clone(), part.to_string())),
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.trim_start_matches('/').split('/').filter(|s| !s.is_empty())
}

/// Builders for the concrete paths of the hub protocol
pub mod paths {
    /// Reverse tunnel opened by an agent
    pub fn endpoint_tunnel(agent_id: &str) -> String {
        format!("/api/endpoints/{}", agent_id)
    }

    /// Every endpoint known to a hub
    pub fn endpoints() -> String {
        "/api/endpoints".to_string()
    }

    /// Directory entry of a remote endpoint
    pub fn endpoint(ep: &str) -> String {
        format!("/api/endpoints/{}", ep)
    }

    /// Service list, either the hub-wide one or that of one endpoint
    pub fn services(ep: Option<&str>) -> String {
        match ep {
            Some(ep) => format!("/api/endpoints/{}/services", ep),
            None => "/api/services".to_string(),
        }
    }

    /// Directory entry of a service
    pub fn service(proto: &str, svc: &str) -> String {
        format!("/api/services/{}/{}", proto, svc)
    }

    /// Tunnel to a service hosted by a remote endpoint
    pub fn service_tunnel(ep: &str, proto: &str, svc: &str) -> String {
        format!("/api/endpoints/{}/services/{}/{}", ep, proto, svc)
    }

    /// Control-API service collection relayed to a remote endpoint
    pub fn forward_services(ep: &str) -> String {
        format!("/api/forward/{}/services", ep)
    }

    /// Control-API service item relayed to a remote endpoint
    pub fn forward_service(ep: &str, proto: &str, name: &str) -> String {
        format!("/api/forward/{}/services/{}/{}", ep, proto, name)
    }

    /// Control-API port collection relayed to a remote endpoint
    pub fn forward_ports(ep: &str) -> String {
        format!("/api/forward/{}/ports", ep)
    }

    /// Control-API port item relayed to a remote endpoint
    pub fn forward_port(ep: &str, ip: &str, proto: &str, port: u16) -> String {
        format!("/api/forward/{}/ports/{}/{}/{}", ep, ip, proto, port)
    }
}
