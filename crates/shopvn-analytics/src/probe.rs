//! Device probing: the signature fed to the fingerprint hash and the
//! human readable device summary attached to sessions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::environment::Environment;

/// Delimiter placed between signature components before hashing.
pub const SIGNATURE_DELIMITER: &str = "|||";

pub const CANVAS_SENTINEL: &str = "canvas_error";
pub const WEBGL_SENTINEL: &str = "webgl_error";
const UNKNOWN: &str = "unknown";

/// Fonts tested for availability, in signature order.
pub const PROBED_FONTS: [&str; 5] = ["Arial", "Verdana", "Times New Roman", "Courier New", "Georgia"];
const FONT_TEST_STRING: &str = "mmmmmmmmmmlli";
const FONT_TEST_SIZE: &str = "72px";

/// Ordered probe outputs. The order of components never changes between
/// calls, so equal environments give equal signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSignature {
    components: Vec<String>,
}

impl DeviceSignature {
    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn joined(&self) -> String {
        self.components.join(SIGNATURE_DELIMITER)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatingSystem {
    Windows,
    #[serde(rename = "MacOS")]
    MacOs,
    Linux,
    Android,
    #[serde(rename = "iOS")]
    Ios,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Browser {
    Chrome,
    Safari,
    Firefox,
    Edge,
    Opera,
    Unknown,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperatingSystem::Windows => "Windows",
            OperatingSystem::MacOs => "MacOS",
            OperatingSystem::Linux => "Linux",
            OperatingSystem::Android => "Android",
            OperatingSystem::Ios => "iOS",
            OperatingSystem::Unknown => "Unknown",
        })
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Summary of the visitor's device, as attached to sessions and visits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub os: OperatingSystem,
    pub browser: Browser,
    pub user_agent: String,
    pub screen_resolution: String,
    pub language: String,
    pub timezone: String,
    pub platform: String,
}

pub struct DeviceProbe;

impl DeviceProbe {
    /// Collect every signature component. Individual probe failures are
    /// replaced with sentinels; this never fails.
    pub fn signature(env: &dyn Environment) -> DeviceSignature {
        let screen = env.screen();
        let mut components = vec![
            env.user_agent(),
            screen.resolution(),
            screen.color_depth.to_string(),
            env.timezone(),
            env.language(),
            env.platform(),
            env.hardware_concurrency()
                .map(|n| n.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            env.device_memory()
                .map(|gb| gb.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string()),
        ];

        match env.render_canvas() {
            Ok(data_url) => components.push(data_url),
            Err(e) => {
                tracing::debug!(error = %e, "canvas probe replaced by sentinel");
                components.push(CANVAS_SENTINEL.to_string());
            }
        }

        match env.webgl_renderer() {
            Ok(Some(gl)) => {
                components.push(gl.vendor);
                components.push(gl.renderer);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "webgl probe replaced by sentinel");
                components.push(WEBGL_SENTINEL.to_string());
            }
        }

        components.push(env.plugins().join(","));
        components.push(available_fonts(env).join(","));
        components.push(if env.touch_support() { "touch" } else { "no-touch" }.to_string());

        DeviceSignature { components }
    }

    pub fn device_info(env: &dyn Environment) -> DeviceInfo {
        let ua = env.user_agent();
        DeviceInfo {
            device_type: classify_device(&ua),
            os: classify_os(&ua),
            browser: classify_browser(&ua),
            screen_resolution: env.screen().resolution(),
            language: env.language(),
            timezone: env.timezone(),
            platform: env.platform(),
            user_agent: ua,
        }
    }
}

fn available_fonts(env: &dyn Environment) -> Vec<&'static str> {
    PROBED_FONTS
        .iter()
        .copied()
        .filter(|font| env.measure_text(&format!("{FONT_TEST_SIZE} {font}"), FONT_TEST_STRING) > 0.0)
        .collect()
}

/// Phone patterns are checked before tablet patterns.
pub fn classify_device(user_agent: &str) -> DeviceType {
    let ua = user_agent.to_ascii_lowercase();
    if ["mobile", "android", "iphone"].iter().any(|p| ua.contains(p)) {
        DeviceType::Mobile
    } else if ["ipad", "tablet"].iter().any(|p| ua.contains(p)) {
        DeviceType::Tablet
    } else {
        DeviceType::Desktop
    }
}

/// First match wins. Android agents also carry `Linux` and iPhone agents
/// carry `Mac OS X`, so those classify as Linux and MacOS respectively.
pub fn classify_os(ua: &str) -> OperatingSystem {
    if ua.contains("Win") {
        OperatingSystem::Windows
    } else if ua.contains("Mac") {
        OperatingSystem::MacOs
    } else if ua.contains("Linux") {
        OperatingSystem::Linux
    } else if ua.contains("Android") {
        OperatingSystem::Android
    } else if ua.contains("iOS") || ua.contains("iPhone") {
        OperatingSystem::Ios
    } else {
        OperatingSystem::Unknown
    }
}

/// Ordered checks with exclusions for agents that name several engines.
pub fn classify_browser(ua: &str) -> Browser {
    if ua.contains("Chrome") && !ua.contains("Edg") {
        Browser::Chrome
    } else if ua.contains("Safari") && !ua.contains("Chrome") {
        Browser::Safari
    } else if ua.contains("Firefox") {
        Browser::Firefox
    } else if ua.contains("Edg") {
        Browser::Edge
    } else if ua.contains("Opera") || ua.contains("OPR") {
        Browser::Opera
    } else {
        Browser::Unknown
    }
}
