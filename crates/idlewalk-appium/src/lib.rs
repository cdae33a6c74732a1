//! Appium (UiAutomator2) backend: implements the engine's driver traits over
//! the W3C WebDriver HTTP protocol plus Appium's touch extensions.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use idlewalk_core::driver::{DriverError, DriverResult, UiDriver, UiElement};
use idlewalk_core::{Locator, Strategy};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// W3C element id key in find-element responses.
const ELEMENT_KEY: &str = "element-6066-11e4-a852-e4f223680c0b";
/// Legacy JSONWP key some Appium versions still emit.
const LEGACY_ELEMENT_KEY: &str = "ELEMENT";

/// Session capabilities, W3C `alwaysMatch` shape.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub platform_name: String,
    pub automation_name: String,
    pub device_name: String,
    pub app_package: Option<String>,
    pub app_activity: Option<String>,
    pub no_reset: bool,
    pub new_command_timeout_secs: u64,
    /// Raw `appium:*` capability overrides merged in last.
    pub extra: serde_json::Map<String, Value>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            platform_name: "Android".into(),
            automation_name: "UiAutomator2".into(),
            device_name: "Android".into(),
            app_package: None,
            app_activity: None,
            no_reset: true,
            new_command_timeout_secs: 60,
            extra: serde_json::Map::new(),
        }
    }
}

impl Capabilities {
    pub fn app(mut self, package: impl Into<String>, activity: impl Into<String>) -> Self {
        self.app_package = Some(package.into());
        self.app_activity = Some(activity.into());
        self
    }

    /// W3C new-session payload.
    pub fn to_json(&self) -> Value {
        let mut caps = serde_json::Map::new();
        caps.insert("platformName".into(), json!(self.platform_name));
        caps.insert("appium:automationName".into(), json!(self.automation_name));
        caps.insert("appium:deviceName".into(), json!(self.device_name));
        caps.insert("appium:noReset".into(), json!(self.no_reset));
        caps.insert(
            "appium:newCommandTimeout".into(),
            json!(self.new_command_timeout_secs),
        );
        if let Some(package) = &self.app_package {
            caps.insert("appium:appPackage".into(), json!(package));
        }
        if let Some(activity) = &self.app_activity {
            caps.insert("appium:appActivity".into(), json!(activity));
        }
        for (key, value) in &self.extra {
            caps.insert(key.clone(), value.clone());
        }
        json!({ "capabilities": { "alwaysMatch": Value::Object(caps) } })
    }
}

/// One wire-level WebDriver failure.
#[derive(Debug)]
struct WireError {
    error: String,
    message: String,
}

impl WireError {
    fn is_no_such_element(&self) -> bool {
        self.error == "no such element"
    }

    fn into_driver(self) -> DriverError {
        match self.error.as_str() {
            "stale element reference" => DriverError::StaleElement,
            "invalid session id" | "session not created" | "no such window" => {
                DriverError::Session(self.message)
            }
            _ => DriverError::Protocol(format!("{}: {}", self.error, self.message)),
        }
    }
}

/// Request failure: either the server answered with a WebDriver error, or
/// the exchange itself broke.
#[derive(Debug)]
enum ExecError {
    Wire(WireError),
    Driver(DriverError),
}

impl From<ExecError> for DriverError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Wire(wire) => wire.into_driver(),
            ExecError::Driver(d) => d,
        }
    }
}

struct Inner {
    http: reqwest::Client,
    base: String,
    session_id: String,
}

impl Inner {
    fn url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base, self.session_id, path)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ExecError> {
        let resp = self
            .http
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        unwrap_value(resp).await
    }

    async fn get(&self, path: &str) -> Result<Value, ExecError> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(transport)?;
        unwrap_value(resp).await
    }
}

fn transport(e: reqwest::Error) -> ExecError {
    ExecError::Driver(DriverError::Session(e.to_string()))
}

/// Extract the `value` field, mapping non-2xx answers to wire errors.
async fn unwrap_value(resp: reqwest::Response) -> Result<Value, ExecError> {
    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .map_err(|e| ExecError::Driver(DriverError::Protocol(e.to_string())))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(value);
    }
    Err(ExecError::Wire(wire_error(&value)))
}

fn wire_error(value: &Value) -> WireError {
    WireError {
        error: value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
        message: value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Element id from a find-element response value.
fn element_id(value: &Value) -> DriverResult<String> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get(LEGACY_ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DriverError::Protocol(format!("no element id in response: {value}")))
}

/// Native `using`/`value` pair for a locator.
fn wire_locator(locator: &Locator) -> DriverResult<(&'static str, &str)> {
    match locator.strategy.as_webdriver() {
        Some(using) => Ok((using, locator.value.as_str())),
        None => Err(DriverError::UnsupportedStrategy(locator.to_string())),
    }
}

/// One Appium session. Cheap to clone; all clones share the connection.
#[derive(Clone)]
pub struct AppiumSession {
    inner: Arc<Inner>,
}

impl AppiumSession {
    /// Open a session against a running Appium server, e.g.
    /// `http://localhost:4723`.
    pub async fn connect(server_url: &str, caps: &Capabilities) -> DriverResult<Self> {
        let http = reqwest::Client::new();
        let base = server_url.trim_end_matches('/').to_string();
        info!("opening appium session at {}", base);
        let resp = http
            .post(format!("{}/session", base))
            .json(&caps.to_json())
            .send()
            .await
            .map_err(|e| DriverError::Session(e.to_string()))?;
        let value = unwrap_value(resp).await.map_err(DriverError::from)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol(format!("no session id in response: {value}")))?
            .to_string();
        info!("appium session established: {}", session_id);
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base,
                session_id,
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    fn element(&self, id: String) -> AppiumElement {
        AppiumElement {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    async fn find_in(
        &self,
        scope: &str,
        locator: &Locator,
    ) -> DriverResult<Vec<Box<dyn UiElement>>> {
        let (using, value) = wire_locator(locator)?;
        let body = json!({ "using": using, "value": value });
        let found = match self.inner.post(&format!("{scope}/elements"), body).await {
            Ok(v) => v,
            Err(ExecError::Wire(w)) if w.is_no_such_element() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let ids = found.as_array().cloned().unwrap_or_default();
        let mut elements = Vec::with_capacity(ids.len());
        for entry in &ids {
            elements.push(Box::new(self.element(element_id(entry)?)) as Box<dyn UiElement>);
        }
        Ok(elements)
    }
}

#[async_trait]
impl UiDriver for AppiumSession {
    async fn find_one(&self, locator: &Locator) -> DriverResult<Option<Box<dyn UiElement>>> {
        let (using, value) = wire_locator(locator)?;
        let body = json!({ "using": using, "value": value });
        match self.inner.post("/element", body).await {
            Ok(v) => Ok(Some(Box::new(self.element(element_id(&v)?)))),
            Err(ExecError::Wire(w)) if w.is_no_such_element() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_many(&self, locator: &Locator) -> DriverResult<Vec<Box<dyn UiElement>>> {
        self.find_in("", locator).await
    }

    async fn window_size(&self) -> DriverResult<(u32, u32)> {
        let rect = self.inner.get("/window/rect").await.map_err(DriverError::from)?;
        let width = rect.get("width").and_then(Value::as_u64);
        let height = rect.get("height").and_then(Value::as_u64);
        match (width, height) {
            (Some(w), Some(h)) => Ok((w as u32, h as u32)),
            _ => Err(DriverError::Protocol(format!("bad window rect: {rect}"))),
        }
    }

    async fn swipe(
        &self,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u64,
    ) -> DriverResult<()> {
        debug!("touch swipe ({},{}) -> ({},{})", x1, y1, x2, y2);
        let body = json!({
            "actions": [
                { "action": "press", "options": { "x": x1, "y": y1 } },
                { "action": "wait", "options": { "ms": duration_ms } },
                { "action": "moveTo", "options": { "x": x2, "y": y2 } },
                { "action": "release", "options": {} }
            ]
        });
        self.inner
            .post("/touch/perform", body)
            .await
            .map(|_| ())
            .map_err(DriverError::from)
    }

    async fn back(&self) -> DriverResult<()> {
        self.inner
            .post("/back", json!({}))
            .await
            .map(|_| ())
            .map_err(DriverError::from)
    }

    async fn screenshot(&self, path: &Path) -> DriverResult<()> {
        let value = self.inner.get("/screenshot").await.map_err(DriverError::from)?;
        let encoded = value
            .as_str()
            .ok_or_else(|| DriverError::Protocol("screenshot is not a string".into()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DriverError::Protocol(format!("bad screenshot payload: {e}")))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| DriverError::Session(format!("writing {}: {e}", path.display())))?;
        Ok(())
    }

    async fn quit(&self) -> DriverResult<()> {
        let resp = self
            .inner
            .http
            .delete(format!(
                "{}/session/{}",
                self.inner.base, self.inner.session_id
            ))
            .send()
            .await
            .map_err(|e| DriverError::Session(e.to_string()))?;
        match unwrap_value(resp).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("session teardown reported an error");
                Err(e.into())
            }
        }
    }
}

/// Handle to one element inside an [`AppiumSession`].
pub struct AppiumElement {
    inner: Arc<Inner>,
    id: String,
}

impl AppiumElement {
    fn path(&self, suffix: &str) -> String {
        format!("/element/{}{}", self.id, suffix)
    }
}

#[async_trait]
impl UiElement for AppiumElement {
    async fn is_displayed(&self) -> DriverResult<bool> {
        let value = self
            .inner
            .get(&self.path("/displayed"))
            .await
            .map_err(DriverError::from)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn text(&self) -> DriverResult<String> {
        let value = self
            .inner
            .get(&self.path("/text"))
            .await
            .map_err(DriverError::from)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(&self, name: &str) -> DriverResult<Option<String>> {
        let value = self
            .inner
            .get(&self.path(&format!("/attribute/{name}")))
            .await
            .map_err(DriverError::from)?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click(&self) -> DriverResult<()> {
        self.inner
            .post(&self.path("/click"), json!({}))
            .await
            .map(|_| ())
            .map_err(DriverError::from)
    }

    async fn children(&self, locator: &Locator) -> DriverResult<Vec<Box<dyn UiElement>>> {
        let session = AppiumSession {
            inner: Arc::clone(&self.inner),
        };
        session.find_in(&format!("/element/{}", self.id), locator).await
    }
}

/// Locators only resolve natively; the pattern family is handled above this
/// layer.
pub fn supports(strategy: &Strategy) -> bool {
    strategy.as_webdriver().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_payload_is_w3c_shaped() {
        let caps = Capabilities::default().app(
            "com.taobao.idlefish",
            ".maincontainer.activity.MainFrameworkActivity",
        );
        let payload = caps.to_json();
        let always = &payload["capabilities"]["alwaysMatch"];
        assert_eq!(always["platformName"], "Android");
        assert_eq!(always["appium:automationName"], "UiAutomator2");
        assert_eq!(always["appium:appPackage"], "com.taobao.idlefish");
        assert_eq!(always["appium:noReset"], true);
    }

    #[test]
    fn extra_capabilities_override_defaults() {
        let mut caps = Capabilities::default();
        caps.extra
            .insert("appium:deviceName".into(), json!("emulator-5554"));
        let payload = caps.to_json();
        assert_eq!(
            payload["capabilities"]["alwaysMatch"]["appium:deviceName"],
            "emulator-5554"
        );
    }

    #[test]
    fn stale_wire_errors_are_transient() {
        let err = WireError {
            error: "stale element reference".into(),
            message: "gone".into(),
        }
        .into_driver();
        assert!(err.is_transient());
        assert!(matches!(err, DriverError::StaleElement));
    }

    #[test]
    fn session_wire_errors_are_fatal() {
        let err = WireError {
            error: "invalid session id".into(),
            message: "session deleted".into(),
        }
        .into_driver();
        assert!(!err.is_transient());
        assert!(matches!(err, DriverError::Session(_)));
    }

    #[test]
    fn unknown_wire_errors_map_to_protocol() {
        let err = WireError {
            error: "unexpected alert open".into(),
            message: "dialog".into(),
        }
        .into_driver();
        assert!(matches!(err, DriverError::Protocol(_)));
    }

    #[test]
    fn element_id_handles_both_key_shapes() {
        let w3c = json!({ ELEMENT_KEY: "abc" });
        assert_eq!(element_id(&w3c).unwrap(), "abc");
        let legacy = json!({ LEGACY_ELEMENT_KEY: "def" });
        assert_eq!(element_id(&legacy).unwrap(), "def");
        assert!(element_id(&json!({})).is_err());
    }

    #[test]
    fn pattern_locators_are_not_native() {
        let err = wire_locator(&Locator::description_pattern("^tab")).unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedStrategy(_)));
        assert!(supports(&Strategy::Id));
        assert!(!supports(&Strategy::DescriptionPattern));
    }
}
