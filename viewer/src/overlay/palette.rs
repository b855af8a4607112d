use livewatch_common::LiveEvent;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PalettePreset {
    #[default]
    Status,
    Classic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayStyle {
    pub authorized: String,
    pub unauthorized: String,
    pub anomaly: String,
    pub font: String,
    pub line_width: f64,
}

impl OverlayStyle {
    pub fn preset(preset: PalettePreset, line_width: f64) -> Self {
        let (authorized, unauthorized, anomaly, font) = match preset {
            PalettePreset::Status => ("#00e676", "#ffb300", "#ff7043", "14px Inter, sans-serif"),
            PalettePreset::Classic => ("blue", "red", "orange", "16px Arial"),
        };

        Self {
            authorized: authorized.to_string(),
            unauthorized: unauthorized.to_string(),
            anomaly: anomaly.to_string(),
            font: font.to_string(),
            line_width,
        }
    }

    pub fn color_for(&self, event: &LiveEvent) -> &str {
        match event {
            LiveEvent::Anomaly(_) => &self.anomaly,
            LiveEvent::Detection(d) if d.auth => &self.authorized,
            LiveEvent::Detection(_) => &self.unauthorized,
        }
    }
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self::preset(PalettePreset::default(), 2.0)
    }
}
