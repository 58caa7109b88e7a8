//! The host environment the probes read from.
//!
//! In a browser these values come from `navigator`, `screen`, canvas and
//! WebGL. Here they come from an [`Environment`] implementation supplied by
//! the host: [`StaticEnvironment`] for recorded device profiles and tests,
//! [`HostEnvironment`] for the current OS process.

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// Screen geometry as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
}

impl ScreenInfo {
    /// `WIDTHxHEIGHT`, the form used in signatures and session records.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl Default for ScreenInfo {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            color_depth: 24,
        }
    }
}

/// Unmasked GPU strings exposed by the WebGL debug renderer extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebGlRenderer {
    pub vendor: String,
    pub renderer: String,
}

/// Source of every ambient signal the device probe consumes.
pub trait Environment: Send + Sync {
    fn user_agent(&self) -> String;

    fn screen(&self) -> ScreenInfo;

    /// IANA timezone name, e.g. `Asia/Ho_Chi_Minh`.
    fn timezone(&self) -> String;

    /// BCP 47 language tag, e.g. `vi-VN`.
    fn language(&self) -> String;

    fn platform(&self) -> String;

    fn hardware_concurrency(&self) -> Option<u32>;

    /// Approximate device memory in GiB.
    fn device_memory(&self) -> Option<f64>;

    /// Data URL of a fixed test drawing on a 2D canvas.
    fn render_canvas(&self) -> Result<String, ProbeError>;

    /// `Ok(None)` means WebGL works but the debug renderer extension is
    /// not exposed.
    fn webgl_renderer(&self) -> Result<Option<WebGlRenderer>, ProbeError>;

    fn plugins(&self) -> Vec<String>;

    /// Rendered width of `text` in the given CSS font. Zero means the font
    /// could not be used.
    fn measure_text(&self, font: &str, text: &str) -> f64;

    fn touch_support(&self) -> bool;

    fn page_url(&self) -> String;

    fn referrer(&self) -> Option<String>;
}

/// A fixed device profile, typically loaded from JSON or TOML.
///
/// `canvas_data_url` and `webgl` model probes that may throw: `None` makes
/// the corresponding probe fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticEnvironment {
    pub user_agent: String,
    pub screen: ScreenInfo,
    pub timezone: String,
    pub language: String,
    pub platform: String,
    pub hardware_concurrency: Option<u32>,
    pub device_memory: Option<f64>,
    pub canvas_data_url: Option<String>,
    pub webgl: Option<WebGlProfile>,
    pub plugins: Vec<String>,
    pub fonts: Vec<String>,
    pub touch: bool,
    pub page_url: String,
    pub referrer: Option<String>,
}

/// WebGL behaviour of a [`StaticEnvironment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WebGlProfile {
    /// Debug renderer extension present.
    Exposed { vendor: String, renderer: String },
    /// Context available, extension missing.
    Masked,
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            screen: ScreenInfo::default(),
            timezone: "Asia/Ho_Chi_Minh".to_string(),
            language: "vi-VN".to_string(),
            platform: "Win32".to_string(),
            hardware_concurrency: Some(8),
            device_memory: Some(8.0),
            canvas_data_url: Some("data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAIwAAAAU".to_string()),
            webgl: Some(WebGlProfile::Exposed {
                vendor: "Google Inc. (NVIDIA)".to_string(),
                renderer: "ANGLE (NVIDIA GeForce RTX 3060)".to_string(),
            }),
            plugins: vec!["PDF Viewer".to_string(), "Chrome PDF Viewer".to_string()],
            fonts: vec![
                "Arial".to_string(),
                "Verdana".to_string(),
                "Times New Roman".to_string(),
                "Courier New".to_string(),
                "Georgia".to_string(),
            ],
            touch: false,
            page_url: "http://localhost:3000/".to_string(),
            referrer: None,
        }
    }
}

impl Environment for StaticEnvironment {
    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn screen(&self) -> ScreenInfo {
        self.screen
    }

    fn timezone(&self) -> String {
        self.timezone.clone()
    }

    fn language(&self) -> String {
        self.language.clone()
    }

    fn platform(&self) -> String {
        self.platform.clone()
    }

    fn hardware_concurrency(&self) -> Option<u32> {
        self.hardware_concurrency
    }

    fn device_memory(&self) -> Option<f64> {
        self.device_memory
    }

    fn render_canvas(&self) -> Result<String, ProbeError> {
        self.canvas_data_url
            .clone()
            .ok_or(ProbeError::Unavailable { probe: "canvas" })
    }

    fn webgl_renderer(&self) -> Result<Option<WebGlRenderer>, ProbeError> {
        match &self.webgl {
            Some(WebGlProfile::Exposed { vendor, renderer }) => Ok(Some(WebGlRenderer {
                vendor: vendor.clone(),
                renderer: renderer.clone(),
            })),
            Some(WebGlProfile::Masked) => Ok(None),
            None => Err(ProbeError::Unavailable { probe: "webgl" }),
        }
    }

    fn plugins(&self) -> Vec<String> {
        self.plugins.clone()
    }

    fn measure_text(&self, font: &str, text: &str) -> f64 {
        // `font` is a CSS shorthand such as `72px Arial`.
        let family = font.split_once(' ').map(|(_, f)| f).unwrap_or(font);
        if self.fonts.iter().any(|f| f == family) {
            text.chars().count() as f64 * 40.0
        } else {
            0.0
        }
    }

    fn touch_support(&self) -> bool {
        self.touch
    }

    fn page_url(&self) -> String {
        self.page_url.clone()
    }

    fn referrer(&self) -> Option<String> {
        self.referrer.clone()
    }
}

/// Environment derived from the running process.
///
/// There is no canvas or GPU to query, so those probes fail and the
/// signature falls back to the sentinels.
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    user_agent: String,
    timezone: String,
    language: String,
    cores: Option<u32>,
    page_url: String,
}

impl HostEnvironment {
    pub fn detect(page_url: impl Into<String>) -> Self {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let user_agent = format!(
            "shopvn-storefront/{} ({}; {})",
            env!("CARGO_PKG_VERSION"),
            os_token(os),
            arch
        );
        let timezone = std::env::var("TZ")
            .ok()
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| "UTC".to_string());
        let language = std::env::var("LANG")
            .ok()
            .and_then(|lang| posix_locale_to_tag(&lang))
            .unwrap_or_else(|| "en-US".to_string());
        let cores = std::thread::available_parallelism()
            .ok()
            .map(|n| n.get() as u32);

        Self {
            user_agent,
            timezone,
            language,
            cores,
            page_url: page_url.into(),
        }
    }
}

fn os_token(os: &str) -> &'static str {
    match os {
        "windows" => "Windows NT 10.0",
        "macos" => "Macintosh; Intel Mac OS X",
        "linux" => "X11; Linux",
        "android" => "Linux; Android",
        "ios" => "iPhone; CPU iPhone OS",
        _ => "Unknown",
    }
}

/// `vi_VN.UTF-8` → `vi-VN`. `C` and `POSIX` carry no language.
fn posix_locale_to_tag(locale: &str) -> Option<String> {
    let base = locale.split(['.', '@']).next()?;
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

impl Environment for HostEnvironment {
    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn screen(&self) -> ScreenInfo {
        ScreenInfo::default()
    }

    fn timezone(&self) -> String {
        self.timezone.clone()
    }

    fn language(&self) -> String {
        self.language.clone()
    }

    fn platform(&self) -> String {
        std::env::consts::OS.to_string()
    }

    fn hardware_concurrency(&self) -> Option<u32> {
        self.cores
    }

    fn device_memory(&self) -> Option<f64> {
        None
    }

    fn render_canvas(&self) -> Result<String, ProbeError> {
        Err(ProbeError::Unavailable { probe: "canvas" })
    }

    fn webgl_renderer(&self) -> Result<Option<WebGlRenderer>, ProbeError> {
        Err(ProbeError::Unavailable { probe: "webgl" })
    }

    fn plugins(&self) -> Vec<String> {
        Vec::new()
    }

    fn measure_text(&self, _font: &str, _text: &str) -> f64 {
        0.0
    }

    fn touch_support(&self) -> bool {
        false
    }

    fn page_url(&self) -> String {
        self.page_url.clone()
    }

    fn referrer(&self) -> Option<String> {
        None
    }
}
