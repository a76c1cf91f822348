use std::collections::{BTreeMap, HashMap};
use std::env;

use serde::Deserialize;

use crate::comparison::WildcardFields;
use crate::request::{BodyPrintLimit, BODY_PRINT_LIMIT};
use crate::tracked::{ConsumptionPolicy, OverCallRepeat};

/// The section every directory falls back to.
pub const DEFAULT_SECTION: &str = "default";

/// Overrides the default body print limit, in bytes.
pub const BODY_PRINT_LIMIT_ENV: &str = "MOCKMALL_BODY_PRINT_LIMIT";

/// The options of one configuration section. Every key is optional: an absent key is
/// looked up in the default section.
///
/// Meant to be deserialized by whatever loads the configuration, e.g.
///
/// ```rust
/// use mockmall::ScopeConfig;
///
/// let config: ScopeConfig = serde_json::from_str(
///     r#"{"assert_no_extra_calls": false, "http_req_wildcard_fields": ["netloc"]}"#,
/// ).unwrap();
/// assert_eq!(config.assert_no_extra_calls, Some(false));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScopeConfig {
    pub http_req_wildcard_fields: Option<WildcardFields>,
    pub assert_no_missing_calls: Option<bool>,
    pub assert_no_extra_calls: Option<bool>,
    /// Name of a handler constructor registered on the [`Registry`](crate::Registry).
    pub request_handler: Option<String>,
    pub env_vars: Option<BTreeMap<String, String>>,
    /// Names of plugin constructors registered on the [`Registry`](crate::Registry).
    pub plugins: Option<Vec<String>>,
    pub over_call_repeat: Option<OverCallRepeat>,
    pub body_print_limit: Option<usize>,
}

impl ScopeConfig {
    /// Overlay `other` on top of `self`: keys set in `other` win.
    fn merge(&mut self, other: ScopeConfig) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        overlay!(
            http_req_wildcard_fields,
            assert_no_missing_calls,
            assert_no_extra_calls,
            request_handler,
            env_vars,
            plugins,
            over_call_repeat,
            body_print_limit
        );
    }
}

/// A two-level configuration lookup chain: per-directory sections over a default section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ConfigCascade {
    sections: HashMap<String, ScopeConfig>,
}

impl ConfigCascade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `config` into `section`, overlaying whatever the section already holds.
    pub fn load(&mut self, section: impl Into<String>, config: ScopeConfig) {
        self.sections.entry(section.into()).or_default().merge(config);
    }

    pub fn section(&self, section: &str) -> Option<&ScopeConfig> {
        self.sections.get(section)
    }

    /// Look a key up in `directory`'s section, then in the default section.
    pub fn lookup<T>(&self, directory: &str, key: impl Fn(&ScopeConfig) -> Option<T>) -> Option<T> {
        let from_directory = if directory == DEFAULT_SECTION {
            None
        } else {
            self.section(directory).and_then(&key)
        };
        from_directory.or_else(|| self.section(DEFAULT_SECTION).and_then(&key))
    }

    /// The settings in effect for tests in `directory`.
    pub fn resolve(&self, directory: &str) -> Settings {
        let defaults = Settings::default();
        Settings {
            wildcard_fields: self
                .lookup(directory, |c| c.http_req_wildcard_fields.clone())
                .unwrap_or(defaults.wildcard_fields),
            assert_no_missing_calls: self
                .lookup(directory, |c| c.assert_no_missing_calls)
                .unwrap_or(defaults.assert_no_missing_calls),
            assert_no_extra_calls: self
                .lookup(directory, |c| c.assert_no_extra_calls)
                .unwrap_or(defaults.assert_no_extra_calls),
            over_call_repeat: self
                .lookup(directory, |c| c.over_call_repeat)
                .unwrap_or(defaults.over_call_repeat),
            request_handler: self.lookup(directory, |c| c.request_handler.clone()),
            env_vars: self
                .lookup(directory, |c| c.env_vars.clone())
                .unwrap_or_default(),
            plugins: self
                .lookup(directory, |c| c.plugins.clone())
                .unwrap_or_default(),
            body_print_limit: self
                .lookup(directory, |c| c.body_print_limit)
                .map(BodyPrintLimit::Limited)
                .unwrap_or(defaults.body_print_limit),
        }
    }
}

/// The options in effect for one store, with built-in defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub wildcard_fields: WildcardFields,
    pub assert_no_missing_calls: bool,
    pub assert_no_extra_calls: bool,
    pub over_call_repeat: OverCallRepeat,
    pub request_handler: Option<String>,
    pub env_vars: BTreeMap<String, String>,
    pub plugins: Vec<String>,
    pub body_print_limit: BodyPrintLimit,
}

impl Default for Settings {
    /// Strict on both flags. The body print limit can be set with the
    /// `MOCKMALL_BODY_PRINT_LIMIT` environment variable.
    fn default() -> Self {
        let body_print_limit = match env::var(BODY_PRINT_LIMIT_ENV)
            .ok()
            .and_then(|x| x.parse::<usize>().ok())
        {
            Some(limit) => BodyPrintLimit::Limited(limit),
            None => BodyPrintLimit::Limited(BODY_PRINT_LIMIT),
        };
        Self {
            wildcard_fields: WildcardFields::none(),
            assert_no_missing_calls: true,
            assert_no_extra_calls: true,
            over_call_repeat: OverCallRepeat::default(),
            request_handler: None,
            env_vars: BTreeMap::new(),
            plugins: Vec::new(),
            body_print_limit,
        }
    }
}

impl Settings {
    /// Settings that only warn on missing, extra and uncalled doubles.
    pub fn relaxed() -> Self {
        Self {
            assert_no_missing_calls: false,
            assert_no_extra_calls: false,
            ..Self::default()
        }
    }

    pub fn consumption_policy(&self) -> ConsumptionPolicy {
        ConsumptionPolicy {
            assert_no_extra_calls: self.assert_no_extra_calls,
            over_call_repeat: self.over_call_repeat,
        }
    }
}
