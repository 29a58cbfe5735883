use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
    Fast,
    #[default]
    Balanced,
    Quality,
}

impl PerformanceMode {
    pub const ALL: [PerformanceMode; 3] = [
        PerformanceMode::Fast,
        PerformanceMode::Balanced,
        PerformanceMode::Quality,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceMode::Fast => "fast",
            PerformanceMode::Balanced => "balanced",
            PerformanceMode::Quality => "quality",
        }
    }

    /// Lenient parse: anything unrecognised becomes `Balanced` with a warning.
    pub fn from_name(name: Option<&str>) -> PerformanceMode {
        match name {
            None => PerformanceMode::Balanced,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Unknown performance mode '{}', using balanced", raw);
                PerformanceMode::Balanced
            }),
        }
    }
}

impl fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerformanceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(PerformanceMode::Fast),
            "balanced" => Ok(PerformanceMode::Balanced),
            "quality" => Ok(PerformanceMode::Quality),
            other => Err(format!("unknown performance mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreprocessStrategy {
    Crop,
    ExtCrop,
    Resize,
    Full,
    ExtFull,
}

impl PreprocessStrategy {
    pub fn as_arg(self) -> &'static str {
        match self {
            PreprocessStrategy::Crop => "crop",
            PreprocessStrategy::ExtCrop => "extcrop",
            PreprocessStrategy::Resize => "resize",
            PreprocessStrategy::Full => "full",
            PreprocessStrategy::ExtFull => "extfull",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    #[serde(rename = "timeout_seconds", with = "duration_secs")]
    pub timeout: Duration,
    pub preprocess: PreprocessStrategy,
    pub enhancer_enabled: bool,
    pub target_resolution: u32,
    pub expression_scale: f32,
}

impl PerformanceProfile {
    pub fn fast() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            preprocess: PreprocessStrategy::Crop,
            enhancer_enabled: false,
            target_resolution: 256,
            expression_scale: 1.0,
        }
    }

    pub fn balanced() -> Self {
        Self {
            timeout: Duration::from_secs(420),
            preprocess: PreprocessStrategy::Crop,
            enhancer_enabled: true,
            target_resolution: 256,
            expression_scale: 1.0,
        }
    }

    pub fn quality() -> Self {
        Self {
            timeout: Duration::from_secs(900),
            preprocess: PreprocessStrategy::Full,
            enhancer_enabled: true,
            target_resolution: 512,
            expression_scale: 1.0,
        }
    }
}

/// One profile per mode. The default table is the built-in constant set;
/// deployments may override it through the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileTable {
    pub fast: PerformanceProfile,
    pub balanced: PerformanceProfile,
    pub quality: PerformanceProfile,
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self {
            fast: PerformanceProfile::fast(),
            balanced: PerformanceProfile::balanced(),
            quality: PerformanceProfile::quality(),
        }
    }
}

impl ProfileTable {
    pub fn get(&self, mode: PerformanceMode) -> &PerformanceProfile {
        match mode {
            PerformanceMode::Fast => &self.fast,
            PerformanceMode::Balanced => &self.balanced,
            PerformanceMode::Quality => &self.quality,
        }
    }

    /// Resolve a raw mode name. Absent or unknown names map to `balanced`.
    pub fn resolve(&self, name: Option<&str>) -> (PerformanceMode, PerformanceProfile) {
        let mode = PerformanceMode::from_name(name);
        (mode, self.get(mode).clone())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.fast.timeout = timeout;
        self.balanced.timeout = timeout;
        self.quality.timeout = timeout;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(serde::de::Error::custom("timeout_seconds must be positive"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
