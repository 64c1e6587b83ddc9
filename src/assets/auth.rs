use std::fmt;

use thiserror::Error;
use tracing::debug;

use super::config::{AuthConfig, AuthStrategy, SourceKind};

/// Credential attached to a fetch request. `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Http {
        header_name: String,
        header_value: String,
    },
    HuggingFace {
        token: String,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Http { header_name, .. } => f
                .debug_struct("Http")
                .field("header_name", header_name)
                .field("header_value", &"<redacted>")
                .finish(),
            Credential::HuggingFace { .. } => f
                .debug_struct("HuggingFace")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("environment variable {env_var} is not set")]
    MissingToken { env_var: String },
    #[error("authentication for a {kind} source needs a `{kind}` section")]
    MissingSection { kind: SourceKind },
}

/// Reads the token named by `auth` for the given source kind.
///
/// Returns `Ok(None)` when the source kind takes no credential. An unset or
/// empty variable, or a missing section for the source kind, is an error
/// rather than an anonymous fallback.
pub fn resolve(auth: &AuthConfig, kind: SourceKind) -> Result<Option<Credential>, AuthError> {
    resolve_with(auth, kind, |var| std::env::var(var).ok())
}

fn resolve_with<F>(
    auth: &AuthConfig,
    kind: SourceKind,
    lookup: F,
) -> Result<Option<Credential>, AuthError>
where
    F: Fn(&str) -> Option<String>,
{
    let AuthStrategy::EnvToken = auth.strategy;
    let read = |var: &str| {
        lookup(var)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| AuthError::MissingToken {
                env_var: var.to_string(),
            })
    };

    match kind {
        SourceKind::HuggingFace => {
            let hf = auth.hf.clone().unwrap_or_default();
            let token = read(&hf.token_env_var)?;
            Ok(Some(Credential::HuggingFace { token }))
        }
        SourceKind::Http => {
            let http = auth.http.as_ref().ok_or(AuthError::MissingSection {
                kind: SourceKind::Http,
            })?;
            let token = read(&http.token_env_var)?;
            Ok(Some(Credential::Http {
                header_name: http.header_name.clone(),
                header_value: format!("{} {}", http.scheme, token.trim()),
            }))
        }
        SourceKind::Local => {
            debug!("authentication is ignored for local sources");
            Ok(None)
        }
    }
}
