//! Process environment with structural redaction.
//!
//! Secret-bearing variables are stored as [`EnvValue::Secret`]. The
//! execution form exposes them to the child process; the redacted form,
//! which is the only one ever logged or persisted, masks them.

use crate::credentials::Secret;

#[derive(Debug, Clone)]
pub enum EnvValue {
    Plain(String),
    Secret(Secret),
}

#[derive(Debug, Clone, Default)]
pub struct SandboxEnv {
    vars: Vec<(String, EnvValue)>,
}

impl SandboxEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.push((name.into(), EnvValue::Plain(value.into())));
        self
    }

    pub fn set_secret(&mut self, name: impl Into<String>, value: Secret) -> &mut Self {
        self.vars.push((name.into(), EnvValue::Secret(value)));
        self
    }

    pub fn extend<I>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.vars
            .extend(vars.into_iter().map(|(k, v)| (k, EnvValue::Plain(v))));
        self
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Name/value pairs for the child process, secrets included.
    pub fn execution(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(name, value)| {
            let value = match value {
                EnvValue::Plain(v) => v.as_str(),
                EnvValue::Secret(s) => s.expose(),
            };
            (name.as_str(), value)
        })
    }

    /// `NAME=value` entries with secret values masked to the same length.
    pub fn redacted(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|(name, value)| match value {
                EnvValue::Plain(v) => format!("{}={}", name, v),
                EnvValue::Secret(s) => format!("{}={}", name, s.masked()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_masks_only_secrets() {
        let mut env = SandboxEnv::new();
        env.set("JOB_ID", "42")
            .set_secret("REST_API_TOKEN", Secret::new("abc123"))
            .extend(vec![("EXTRA".to_string(), "x".to_string())]);

        assert_eq!(
            env.redacted(),
            vec!["JOB_ID=42", "REST_API_TOKEN=******", "EXTRA=x"]
        );

        let exec: Vec<(&str, &str)> = env.execution().collect();
        assert_eq!(
            exec,
            vec![("JOB_ID", "42"), ("REST_API_TOKEN", "abc123"), ("EXTRA", "x")]
        );
        assert_eq!(env.len(), 3);
    }

    #[test]
    fn debug_does_not_leak() {
        let mut env = SandboxEnv::new();
        env.set_secret("REST_API_TOKEN", Secret::new("hunter2"));
        assert!(!format!("{:?}", env).contains("hunter2"));
    }
}
