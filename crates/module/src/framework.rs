//! Conventions shared by driver implementations.
//!
//! Multi-step work is carried in `state.module_data` as
//! `{"pending_steps": [..], ..kind specific fields..}`. `plan` seeds the list,
//! every `sync` pass pops the head and either performs it or fails
//! retryably. Once the list drains the driver refreshes its output and
//! completes.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Utc};
use entropy_core::{Error, ErrorContext, Result, State, Status, SyncResult};
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// JSON key holding the ordered step tokens inside `module_data`.
pub const PENDING_STEPS_KEY: &str = "pending_steps";

/// Kubernetes object-name ceiling used by helm releases.
pub const MAX_RELEASE_NAME_LEN: usize = 53;

const HASH_SUFFIX_LEN: usize = 8;

/// Decode a driver's transient data. `null` decodes to `T::default()`.
pub fn decode_transient<T>(module_data: &Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if module_data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(module_data.clone())
        .invalid("module data is corrupt")
}

/// Encode a driver's transient data back into `module_data`.
pub fn encode_transient<T: Serialize>(data: &T) -> Result<Value> {
    serde_json::to_value(data).internal("failed to encode module data")
}

/// Decode opaque JSON configs into a driver's typed config.
pub fn decode_configs<T: DeserializeOwned>(configs: &Value) -> Result<T> {
    serde_json::from_value(configs.clone())
        .invalid("invalid configs")
}

/// Deep-merge config layers. Later layers win; objects merge key by key,
/// everything else replaces. `null` layers are skipped.
pub fn merge_configs<'a, I>(layers: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    layers
        .into_iter()
        .filter(|layer| !layer.is_null())
        .fold(Value::Object(Map::new()), |mut acc, layer| {
            merge_into(&mut acc, layer);
            acc
        })
}

fn merge_into(target: &mut Value, layer: &Value) {
    match (target, layer) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                let nested = value.is_object() && dst.get(key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = dst.get_mut(key) {
                        merge_into(existing, value);
                    }
                } else {
                    dst.insert(key.clone(), value.clone());
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}

/// Deterministically shorten `name` to at most `max_len` bytes.
///
/// Names that fit are returned untouched. Longer names keep a prefix and gain
/// a `-<sha256 prefix>` suffix so distinct inputs stay distinct.
pub fn safe_name(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }

    let digest = Sha256::digest(name.as_bytes());
    let hash: String = digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(HASH_SUFFIX_LEN)
        .collect();

    let keep = max_len.saturating_sub(HASH_SUFFIX_LEN + 1);
    let mut prefix: String = String::with_capacity(keep);
    for ch in name.chars() {
        if prefix.len() + ch.len_utf8() > keep {
            break;
        }
        prefix.push(ch);
    }
    let prefix = prefix.trim_end_matches(['-', '.', '_']);

    if prefix.is_empty() {
        hash.chars().take(max_len).collect()
    } else {
        format!("{prefix}-{hash}")
    }
}

/// State for a pass that left work behind: re-queue immediately.
pub fn pending_state(previous: &State, module_data: Value, now: DateTime<Utc>) -> State {
    State {
        status: Status::Pending,
        output: previous.output.clone(),
        module_data,
        next_sync_at: Some(now),
        sync_result: SyncResult::default(),
    }
}

/// State once every step is done.
pub fn completed_state(output: Value) -> State {
    State {
        status: Status::Completed,
        output,
        module_data: Value::Null,
        next_sync_at: None,
        sync_result: SyncResult::default(),
    }
}

/// Run a driver call, turning a panic into an `Internal` error.
pub async fn guarded<F, T>(call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::internal("driver panicked").with_cause(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use std::collections::VecDeque;

    use super::*;
    use entropy_core::ErrorKind;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Transient {
        #[serde(default)]
        pending_steps: VecDeque<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reset_to: Option<String>,
    }

    #[test]
    fn test_decode_transient_null_is_default() {
        let data: Transient = decode_transient(&Value::Null).unwrap();
        assert_eq!(data, Transient::default());
    }

    #[test]
    fn test_transient_encodes_pending_steps_key() {
        let data = Transient {
            pending_steps: VecDeque::from(["release_stop".to_string()]),
            reset_to: Some("latest".into()),
        };
        let value = encode_transient(&data).unwrap();
        assert_eq!(value[PENDING_STEPS_KEY], json!(["release_stop"]));
        let back: Transient = decode_transient(&value).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_corrupt_transient_is_invalid() {
        let err = decode_transient::<Transient>(&json!({"pending_steps": 7})).unwrap_err();
        assert!(err.is_kind(ErrorKind::Invalid));
    }

    #[test]
    fn test_merge_configs_later_layers_win() {
        let defaults = json!({"replicas": 1, "chart": {"name": "firehose", "version": "0.1.0"}});
        let existing = json!({"replicas": 2, "env": {"A": "1"}});
        let params = json!({"chart": {"version": "0.2.0"}, "env": {"B": "2"}});

        let merged = merge_configs([&defaults, &existing, &Value::Null, &params]);
        assert_eq!(
            merged,
            json!({
                "replicas": 2,
                "chart": {"name": "firehose", "version": "0.2.0"},
                "env": {"A": "1", "B": "2"}
            })
        );
    }

    #[test]
    fn test_safe_name_short_names_untouched() {
        assert_eq!(safe_name("orders-firehose", MAX_RELEASE_NAME_LEN), "orders-firehose");
    }

    #[test]
    fn test_safe_name_truncates_with_hash() {
        let long = "a".repeat(80);
        let safe = safe_name(&long, MAX_RELEASE_NAME_LEN);
        assert_eq!(safe.len(), MAX_RELEASE_NAME_LEN);
        assert!(safe.starts_with(&"a".repeat(44)));
        assert_eq!(safe, safe_name(&long, MAX_RELEASE_NAME_LEN));
    }

    #[test]
    fn test_state_helpers() {
        let now = Utc::now();
        let previous = State {
            output: json!({"pods": []}),
            ..State::default()
        };
        let pending = pending_state(&previous, json!({"pending_steps": ["x"]}), now);
        assert_eq!(pending.status, Status::Pending);
        assert_eq!(pending.next_sync_at, Some(now));
        assert_eq!(pending.output, previous.output);

        let done = completed_state(json!({"ok": true}));
        assert!(done.is_terminal());
        assert!(done.is_quiescent());
    }

    #[tokio::test]
    async fn test_guarded_converts_panic() {
        async fn explode() -> Result<()> {
            panic!("driver blew up")
        }

        let err = guarded(explode()).await.unwrap_err();
        assert!(err.is_kind(ErrorKind::Internal));
        assert_eq!(err.cause(), Some("driver blew up"));
    }

    #[tokio::test]
    async fn test_guarded_passes_through() {
        let ok = guarded(async { Ok::<_, Error>(3) }).await.unwrap();
        assert_eq!(ok, 3);
    }
}
