//! YAML profile describing the target app: server address, capabilities,
//! screen fingerprints, feed selectors, and search keywords.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use idlewalk_core::{
    BrowseConfig, FeedSelectors, Locator, ScreenDescriptor, ScreenKind, ScreenRegistry,
};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::{Error, Result};

/// Top-level profile structure.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Name of this profile.
    pub name: String,

    /// Appium server address.
    #[serde(default)]
    pub server: ServerConfig,

    /// Target app under automation.
    pub app: AppSpec,

    /// Screen fingerprints, listed in recognition priority order.
    pub screens: Vec<ScreenSpec>,

    /// Feed structure selectors.
    pub feed: FeedSpec,

    /// Title matching.
    #[serde(default)]
    pub search: SearchConfig,

    /// Browse loop tuning (optional overrides).
    #[serde(default)]
    pub browse: BrowseTuning,
}

impl AppConfig {
    /// Load a profile from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse a profile from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("name is required".into()));
        }
        if self.app.package.is_empty() {
            return Err(Error::Config("app.package is required".into()));
        }
        if self.screens.is_empty() {
            return Err(Error::Config("at least one screen is required".into()));
        }
        for screen in &self.screens {
            if screen.identifiers.is_empty() {
                return Err(Error::Config(format!(
                    "screen '{}' has no identifiers",
                    screen.kind.0
                )));
            }
        }
        if !self.screens.iter().any(|s| s.kind.0 == ScreenKind::Feed) {
            return Err(Error::Config("a 'feed' screen is required".into()));
        }
        if self.search.keywords.is_empty() {
            return Err(Error::Config("search.keywords must not be empty".into()));
        }
        Ok(())
    }

    /// Screen registry in the profile's listed priority order.
    pub fn screen_registry(&self) -> ScreenRegistry {
        let mut registry = ScreenRegistry::new();
        for screen in &self.screens {
            registry.register(ScreenDescriptor::new(
                screen.kind.0,
                screen.identifiers.iter().map(|s| s.0.clone()).collect(),
            ));
        }
        registry
    }

    pub fn feed_selectors(&self) -> FeedSelectors {
        FeedSelectors {
            container: self.feed.container.0.clone(),
            item: self.feed.item.0.clone(),
            title: self.feed.title.0.clone(),
        }
    }

    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server.host, self.server.port)
    }
}

impl Default for AppConfig {
    /// Built-in profile for the Xianyu second-hand marketplace app, used
    /// when no profile file is given.
    fn default() -> Self {
        Self::parse(DEFAULT_PROFILE).expect("built-in profile must parse")
    }
}

/// Appium server address.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 4723,
        }
    }
}

/// Target application.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSpec {
    pub package: String,
    pub activity: String,

    /// Raw `appium:*` capability overrides.
    #[serde(default)]
    pub capabilities: HashMap<String, serde_yaml::Value>,
}

/// One screen fingerprint: a kind plus its ordered identifiers.
#[derive(Debug, Clone, Deserialize)]
pub struct ScreenSpec {
    pub kind: ScreenKindSpec,
    pub identifiers: Vec<LocatorSpec>,
}

/// Feed structure selectors.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSpec {
    pub container: LocatorSpec,
    pub item: LocatorSpec,
    pub title: LocatorSpec,
}

/// Title matching configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub keywords: Vec<String>,
    pub case_sensitive: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            case_sensitive: false,
        }
    }
}

/// Optional overrides over the browse loop defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrowseTuning {
    pub retries: Option<u32>,
    pub ensure_feed_attempts: Option<u32>,
    pub feed_backoff_secs: Option<u64>,
    pub detail_wait_secs: Option<u64>,
    pub scroll_duration_ms: Option<u64>,
    pub detail_scroll_duration_ms: Option<u64>,
    pub dwell_scrolls: Option<(u32, u32)>,
    pub dwell_pause_ms: Option<(u64, u64)>,
    pub final_dwell_ms: Option<(u64, u64)>,
    pub scan_pause_ms: Option<u64>,
}

impl BrowseTuning {
    pub fn to_browse_config(&self) -> BrowseConfig {
        let mut config = BrowseConfig::default();
        if let Some(v) = self.retries {
            config.retries = v;
        }
        if let Some(v) = self.ensure_feed_attempts {
            config.ensure_feed_attempts = v;
        }
        if let Some(v) = self.feed_backoff_secs {
            config.feed_backoff = Duration::from_secs(v);
        }
        if let Some(v) = self.detail_wait_secs {
            config.detail_wait = Duration::from_secs(v);
        }
        if let Some(v) = self.scroll_duration_ms {
            config.scroll_duration_ms = v;
        }
        if let Some(v) = self.detail_scroll_duration_ms {
            config.detail_scroll_duration_ms = v;
        }
        if let Some(v) = self.dwell_scrolls {
            config.dwell_scrolls = v;
        }
        if let Some(v) = self.dwell_pause_ms {
            config.dwell_pause_ms = v;
        }
        if let Some(v) = self.final_dwell_ms {
            config.final_dwell_ms = v;
        }
        if let Some(v) = self.scan_pause_ms {
            config.scan_pause = Duration::from_millis(v);
        }
        config
    }
}

/// Screen kind as a YAML string ("feed", "detail", "services").
#[derive(Debug, Clone, Copy)]
pub struct ScreenKindSpec(pub ScreenKind);

impl<'de> Deserialize<'de> for ScreenKindSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "feed" => Ok(ScreenKindSpec(ScreenKind::Feed)),
            "detail" => Ok(ScreenKindSpec(ScreenKind::Detail)),
            "services" => Ok(ScreenKindSpec(ScreenKind::Services)),
            other => Err(de::Error::unknown_variant(
                other,
                &["feed", "detail", "services"],
            )),
        }
    }
}

/// Locator as a single-key YAML map, e.g. `id: com.app:id/list` or
/// `desc_pattern: "^tab$"`.
#[derive(Debug, Clone)]
pub struct LocatorSpec(pub Locator);

impl<'de> Deserialize<'de> for LocatorSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(LocatorVisitor)
    }
}

struct LocatorVisitor;

impl<'de> Visitor<'de> for LocatorVisitor {
    type Value = LocatorSpec;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a locator map with single key (id, class, xpath or desc_pattern)")
    }

    fn visit_map<M>(self, mut map: M) -> std::result::Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let key: String = map
            .next_key()?
            .ok_or_else(|| de::Error::custom("expected locator strategy key"))?;

        let locator = match key.as_str() {
            "id" => Locator::id(map.next_value::<String>()?),
            "class" => Locator::class_name(map.next_value::<String>()?),
            "xpath" => Locator::xpath(map.next_value::<String>()?),
            "desc_pattern" => Locator::description_pattern(map.next_value::<String>()?),
            other => {
                return Err(de::Error::unknown_variant(
                    other,
                    &["id", "class", "xpath", "desc_pattern"],
                ))
            }
        };
        Ok(LocatorSpec(locator))
    }
}

/// The profile shipped in `configs/idlefish.yaml`, compiled in as the
/// no-arguments default.
const DEFAULT_PROFILE: &str = include_str!("../configs/idlefish.yaml");
