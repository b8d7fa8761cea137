//! Extension hooks
//!
//! Extensions are out-of-process collaborators reached through an
//! [`ExtensionHost`]. At fixed points the pipeline hands them the in-flight
//! value wrapped in a versioned envelope:
//!
//! ```json
//! {"version": "0.1", "data": ...}
//! ```
//!
//! Read-write hooks may answer with a replacement `data`, which overwrites
//! the in-flight value. Read-only hooks only observe.
//!
//! # Failure policy
//!
//! Each extension has its own [`ExtensionPolicy`]: the host receives the
//! timeout, failed calls are retried a bounded number of times with fixed
//! backoff, and a final failure either aborts the stage (default) or is
//! logged and skipped when `continue_on_error` is set.

use crate::core::HOOK_PAYLOAD_VERSION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed points at which extensions are called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    AfterCandidatesGenerated,
    AfterBondsDistributed,
    OnFeesCollection,
    CheckBalance,
    AfterPayoutsBlueprintGenerated,
    AfterPayoutsPrepared,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::AfterCandidatesGenerated => "after_candidates_generated",
            Hook::AfterBondsDistributed => "after_bonds_distributed",
            Hook::OnFeesCollection => "on_fees_collection",
            Hook::CheckBalance => "check_balance",
            Hook::AfterPayoutsBlueprintGenerated => "after_payouts_blueprint_generated",
            Hook::AfterPayoutsPrepared => "after_payouts_prepared",
        }
    }

    /// Hooks whose responses are always ignored
    pub fn is_read_only(&self) -> bool {
        matches!(self, Hook::AfterPayoutsBlueprintGenerated)
    }
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an extension subscribes to a hook
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookMode {
    /// Request/response: the answer replaces the in-flight value
    #[default]
    ReadWrite,
    /// Notify only
    ReadOnly,
}

/// Versioned hook payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookEnvelope<T> {
    pub version: String,
    pub data: T,
}

impl<T> HookEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            version: HOOK_PAYLOAD_VERSION.to_string(),
            data,
        }
    }
}

/// Errors raised by extension calls
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("Extension {extension} timed out on {hook}")]
    Timeout { extension: String, hook: Hook },

    #[error("Extension {extension} failed on {hook}: {message}")]
    Failed {
        extension: String,
        hook: Hook,
        message: String,
    },

    #[error("Extension {extension} returned an invalid {hook} payload: {message}")]
    InvalidResponse {
        extension: String,
        hook: Hook,
        message: String,
    },

    #[error("Hook payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Transport to one extension
pub trait ExtensionHost {
    fn name(&self) -> &str;

    /// Deliver `envelope` and wait at most `timeout` for the answer
    ///
    /// `None` means the extension had nothing to say (notify-only hooks or
    /// no change).
    fn call(
        &self,
        hook: Hook,
        envelope: &Value,
        timeout: Duration,
    ) -> Result<Option<Value>, ExtensionError>;
}

/// Per-extension call policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionPolicy {
    pub timeout: Duration,
    /// Additional attempts after the first failure
    pub retries: u32,
    pub retry_backoff: Duration,
    pub continue_on_error: bool,
}

impl Default for ExtensionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 0,
            retry_backoff: Duration::from_secs(1),
            continue_on_error: false,
        }
    }
}

struct RegisteredExtension {
    host: Box<dyn ExtensionHost>,
    policy: ExtensionPolicy,
    hooks: BTreeMap<Hook, HookMode>,
}

/// Extensions available to a pipeline run, in registration order
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<RegisteredExtension>,
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field(
                "extensions",
                &self
                    .extensions
                    .iter()
                    .map(|e| e.host.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `host` to `hooks`
    pub fn register(
        &mut self,
        host: Box<dyn ExtensionHost>,
        policy: ExtensionPolicy,
        hooks: &[(Hook, HookMode)],
    ) {
        self.extensions.push(RegisteredExtension {
            host,
            policy,
            hooks: hooks.iter().copied().collect(),
        });
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Run `hook` over every subscribed extension
    ///
    /// Extensions are called in registration order; each sees the value
    /// left by the previous one.
    ///
    /// # Errors
    /// The first failure of an extension whose policy does not continue on
    /// error.
    pub fn execute_hook<T>(&self, hook: Hook, data: &mut T) -> Result<(), ExtensionError>
    where
        T: Serialize + DeserializeOwned,
    {
        for extension in &self.extensions {
            let Some(mode) = extension.hooks.get(&hook).copied() else {
                continue;
            };

            match call_extension(extension, hook, mode, data) {
                Ok(Some(replacement)) => *data = replacement,
                Ok(None) => {}
                Err(e) if extension.policy.continue_on_error => {
                    warn!(
                        extension = extension.host.name(),
                        hook = hook.as_str(),
                        error = %e,
                        "extension failed, continuing"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn call_extension<T>(
    extension: &RegisteredExtension,
    hook: Hook,
    mode: HookMode,
    data: &T,
) -> Result<Option<T>, ExtensionError>
where
    T: Serialize + DeserializeOwned,
{
    let envelope = serde_json::to_value(HookEnvelope::new(data))?;
    let name = extension.host.name();

    let mut attempt = 0;
    let response = loop {
        debug!(extension = name, hook = hook.as_str(), attempt, "calling extension");
        match extension.host.call(hook, &envelope, extension.policy.timeout) {
            Ok(response) => break response,
            Err(e) if attempt < extension.policy.retries => {
                warn!(extension = name, hook = hook.as_str(), attempt, error = %e, "extension call failed, retrying");
                attempt += 1;
                std::thread::sleep(extension.policy.retry_backoff);
            }
            Err(e) => return Err(e),
        }
    };

    if mode == HookMode::ReadOnly || hook.is_read_only() {
        return Ok(None);
    }
    let Some(response) = response else {
        return Ok(None);
    };

    let payload = match response {
        Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value(payload)
        .map(Some)
        .map_err(|e| ExtensionError::InvalidResponse {
            extension: name.to_string(),
            hook,
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    type Respond = fn(u32, &Value) -> Result<Option<Value>, ExtensionError>;

    struct FnHost {
        name: String,
        calls: Arc<AtomicU32>,
        respond: Respond,
    }

    impl ExtensionHost for FnHost {
        fn name(&self) -> &str {
            &self.name
        }

        fn call(&self, _hook: Hook, envelope: &Value, _timeout: Duration) -> Result<Option<Value>, ExtensionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.respond)(n, envelope)
        }
    }

    fn quick_policy(retries: u32, continue_on_error: bool) -> ExtensionPolicy {
        ExtensionPolicy {
            timeout: Duration::from_millis(10),
            retries,
            retry_backoff: Duration::from_millis(1),
            continue_on_error,
        }
    }

    #[test]
    fn test_read_write_hook_replaces_data() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ExtensionRegistry::new();
        registry.register(
            Box::new(FnHost {
                name: "doubler".to_string(),
                calls: calls.clone(),
                respond: |_, env: &Value| {
                    assert_eq!(env["version"], "0.1");
                    let v = env["data"].as_i64().unwrap_or(0);
                    Ok(Some(json!({"version": "0.1", "data": v * 2})))
                },
            }),
            quick_policy(0, false),
            &[(Hook::OnFeesCollection, HookMode::ReadWrite)],
        );

        let mut value = 21i64;
        registry.execute_hook(Hook::OnFeesCollection, &mut value).unwrap();
        assert_eq!(value, 42);

        // not subscribed
        registry.execute_hook(Hook::CheckBalance, &mut value).unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_only_hook_ignores_response() {
        let mut registry = ExtensionRegistry::new();
        registry.register(
            Box::new(FnHost {
                name: "observer".to_string(),
                calls: Arc::new(AtomicU32::new(0)),
                respond: |_, _: &Value| Ok(Some(json!({"data": 0}))),
            }),
            quick_policy(0, false),
            &[(Hook::AfterPayoutsBlueprintGenerated, HookMode::ReadWrite)],
        );
        let mut value = 7i64;
        registry
            .execute_hook(Hook::AfterPayoutsBlueprintGenerated, &mut value)
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ExtensionRegistry::new();
        registry.register(
            Box::new(FnHost {
                name: "flaky".to_string(),
                calls: calls.clone(),
                respond: |n, _: &Value| {
                    if n < 2 {
                        Err(ExtensionError::Timeout {
                            extension: "flaky".to_string(),
                            hook: Hook::CheckBalance,
                        })
                    } else {
                        Ok(None)
                    }
                },
            }),
            quick_policy(2, false),
            &[(Hook::CheckBalance, HookMode::ReadWrite)],
        );
        let mut value = 1i64;
        registry.execute_hook(Hook::CheckBalance, &mut value).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failure_policy() {
        let failing = |continue_on_error| {
            let mut registry = ExtensionRegistry::new();
            registry.register(
                Box::new(FnHost {
                    name: "broken".to_string(),
                    calls: Arc::new(AtomicU32::new(0)),
                    respond: |_, _: &Value| {
                        Err(ExtensionError::Failed {
                            extension: "broken".to_string(),
                            hook: Hook::AfterBondsDistributed,
                            message: "exit status 1".to_string(),
                        })
                    },
                }),
                quick_policy(0, continue_on_error),
                &[(Hook::AfterBondsDistributed, HookMode::ReadWrite)],
            );
            registry
        };

        let mut value = 1i64;
        assert!(failing(false)
            .execute_hook(Hook::AfterBondsDistributed, &mut value)
            .is_err());
        assert!(failing(true)
            .execute_hook(Hook::AfterBondsDistributed, &mut value)
            .is_ok());
    }

    #[test]
    fn test_invalid_response_is_reported() {
        let mut registry = ExtensionRegistry::new();
        registry.register(
            Box::new(FnHost {
                name: "garbage".to_string(),
                calls: Arc::new(AtomicU32::new(0)),
                respond: |_, _: &Value| Ok(Some(json!({"data": "not a number"}))),
            }),
            quick_policy(0, false),
            &[(Hook::OnFeesCollection, HookMode::ReadWrite)],
        );
        let mut value = 1i64;
        let err = registry
            .execute_hook(Hook::OnFeesCollection, &mut value)
            .unwrap_err();
        assert!(matches!(err, ExtensionError::InvalidResponse { .. }));
        assert_eq!(value, 1);
    }
}
