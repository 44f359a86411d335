//! Session selection parameters and environment overrides.

use serde::{Deserialize, Serialize};

/// Platform index used when none is passed explicitly.
pub const PLATFORM_ENV: &str = "CL_DEFAULT_PLATFORM";
/// Device index used when none is passed explicitly.
pub const DEVICE_ENV: &str = "CL_DEFAULT_DEVICE";

/// Explicit selection parameters for (re)initializing a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectRequest {
    pub platform: Option<usize>,
    pub device: Option<usize>,
    /// Only consider GPU devices. Without a platform, every platform is
    /// scanned for the first one exposing a GPU.
    pub gpu_only: bool,
}

impl SelectRequest {
    pub fn platform(mut self, index: usize) -> Self {
        self.platform = Some(index);
        self
    }

    pub fn device(mut self, index: usize) -> Self {
        self.device = Some(index);
        self
    }

    pub fn gpu_only(mut self) -> Self {
        self.gpu_only = true;
        self
    }
}

/// Indices taken from the environment, consulted only when the matching
/// explicit index is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvOverrides {
    pub platform: Option<usize>,
    pub device: Option<usize>,
}

impl EnvOverrides {
    /// Read `CL_DEFAULT_PLATFORM` and `CL_DEFAULT_DEVICE` from the process
    /// environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build overrides from an arbitrary variable lookup. Unset or
    /// unparsable values count as not given.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            platform: parse_index(PLATFORM_ENV, lookup(PLATFORM_ENV)),
            device: parse_index(DEVICE_ENV, lookup(DEVICE_ENV)),
        }
    }
}

fn parse_index(name: &str, value: Option<String>) -> Option<usize> {
    let value = value?;
    match value.trim().parse::<usize>() {
        Ok(index) => Some(index),
        Err(_) => {
            tracing::warn!("ignoring {}={:?}: not a device index", name, value);
            None
        }
    }
}

/// Everything needed to bind a session: explicit request plus environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(flatten)]
    pub request: SelectRequest,
    #[serde(skip)]
    pub env: EnvOverrides,
}

impl SessionConfig {
    /// Config with `request` and overrides read from the environment.
    pub fn from_env(request: SelectRequest) -> Self {
        Self {
            request,
            env: EnvOverrides::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_overrides_parsed() {
        let env = EnvOverrides::from_lookup(lookup(&[(PLATFORM_ENV, "1"), (DEVICE_ENV, " 2 ")]));
        assert_eq!(env.platform, Some(1));
        assert_eq!(env.device, Some(2));
    }

    #[test]
    fn test_unset_and_unparsable_ignored() {
        let env = EnvOverrides::from_lookup(lookup(&[(PLATFORM_ENV, "gpu")]));
        assert_eq!(env, EnvOverrides::default());
        let env = EnvOverrides::from_lookup(lookup(&[(DEVICE_ENV, "-1")]));
        assert_eq!(env.device, None);
    }

    #[test]
    fn test_request_builder() {
        let req = SelectRequest::default().platform(2).gpu_only();
        assert_eq!(req.platform, Some(2));
        assert_eq!(req.device, None);
        assert!(req.gpu_only);
    }

    #[test]
    fn test_config_from_json() {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{"platform": 1, "gpu_only": true}"#).unwrap();
        assert_eq!(cfg.request, SelectRequest::default().platform(1).gpu_only());
        assert_eq!(cfg.env, EnvOverrides::default());
    }
}
