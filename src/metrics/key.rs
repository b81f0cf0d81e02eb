//! Typed metric keys for the timer and counter families.
//!
//! Keys are plain values with derived `Eq`/`Hash` over every field, and map to a [`MeterId`] by a
//! pure function: two keys produce the same stored meter exactly when they are equal. In
//! particular class and method take part in counter identity, so two methods that share a logical
//! name, attempt index and exception kind still get separate counters.

use super::meter::MeterId;

pub const NAME_TAG: &str = "name";
pub const CLASS_TAG: &str = "class";
pub const METHOD_TAG: &str = "method";
pub const RETRY_TAG: &str = "retry";
pub const EXCEPTION_TAG: &str = "exception";

/// Suffix of the whole-sequence timer family.
pub const SEQUENCE_SUFFIX: &str = "_retry";
pub const RETRIES_SUFFIX: &str = "_retries";
pub const FAILURES_SUFFIX: &str = "_failures";

/// Identity of one timer series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub metric_name: String,
    pub exception_kind: String,
    pub class_name: String,
    pub method_name: String,
}

impl MetricKey {
    pub fn meter_id(&self) -> MeterId {
        MeterId::new(self.metric_name.as_str())
            .with_tag(CLASS_TAG, self.class_name.as_str())
            .with_tag(METHOD_TAG, self.method_name.as_str())
            .with_tag(EXCEPTION_TAG, self.exception_kind.as_str())
    }
}

/// Identity of one retries/failures counter.
///
/// `attempt_count` is `None` for the failures family, which carries no `retry` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub logical_name: String,
    pub class_name: String,
    pub method_name: String,
    pub attempt_count: Option<usize>,
    pub exception_kind: String,
}

impl CounterKey {
    pub fn meter_id(&self, metric_name: &str) -> MeterId {
        let id = MeterId::new(metric_name)
            .with_tag(NAME_TAG, self.logical_name.as_str())
            .with_tag(CLASS_TAG, self.class_name.as_str())
            .with_tag(METHOD_TAG, self.method_name.as_str())
            .with_tag(EXCEPTION_TAG, self.exception_kind.as_str());
        match self.attempt_count {
            Some(attempt) => id.with_tag(RETRY_TAG, attempt.to_string()),
            None => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retries_key(class: &str, method: &str) -> CounterKey {
        CounterKey {
            logical_name: "github_api".into(),
            class_name: class.into(),
            method_name: method.into(),
            attempt_count: Some(0),
            exception_kind: "Timeout".into(),
        }
    }

    #[test]
    fn counter_identity_includes_class_and_method() {
        let a = retries_key("GithubApi", "listRepositories");
        let b = retries_key("GithubApi", "getRepository");
        assert_ne!(a, b);
        assert_ne!(a.meter_id("api_retries"), b.meter_id("api_retries"));
        assert_eq!(a.meter_id("api_retries"), a.clone().meter_id("api_retries"));
    }

    #[test]
    fn retries_key_carries_retry_tag() {
        let id = retries_key("C", "m").meter_id("api_retries");
        assert_eq!(id.tag(RETRY_TAG), Some("0"));
        assert_eq!(id.tag(NAME_TAG), Some("github_api"));
        assert_eq!(id.tag(EXCEPTION_TAG), Some("Timeout"));
    }

    #[test]
    fn failures_key_has_no_retry_tag() {
        let key = CounterKey { attempt_count: None, ..retries_key("C", "m") };
        let id = key.meter_id("api_failures");
        assert_eq!(id.tag(RETRY_TAG), None);
        assert_eq!(id.tag_keys().len(), 4);
    }

    #[test]
    fn timer_key_tags() {
        let key = MetricKey {
            metric_name: "api".into(),
            exception_kind: "none".into(),
            class_name: "C".into(),
            method_name: "m".into(),
        };
        let id = key.meter_id();
        assert!(id.matches("api", &[(CLASS_TAG, "C"), (METHOD_TAG, "m"), (EXCEPTION_TAG, "none")]));
    }
}
