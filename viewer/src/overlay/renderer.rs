use livewatch_common::LiveEvent;
use serde::Serialize;

use super::palette::OverlayStyle;
use super::transform::{Rect, ScaleTransform, SurfaceSize};
use crate::config::OverlayConfig;

const LABEL_OFFSET: f64 = 8.0;
const LABEL_MIN_BASELINE: f64 = 16.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawCommand {
    Clear {
        width: f64,
        height: f64,
    },
    StrokeRect {
        rect: Rect,
        color: String,
        line_width: f64,
    },
    FillText {
        text: String,
        x: f64,
        y: f64,
        color: String,
        font: String,
    },
}

/// One frame of overlay output. Always begins with a `Clear`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DrawList {
    pub commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn rects(&self) -> impl Iterator<Item = &Rect> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::StrokeRect { rect, .. } => Some(rect),
            _ => None,
        })
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::FillText { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn box_count(&self) -> usize {
        self.rects().count()
    }
}

pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn from_config(config: &OverlayConfig) -> Self {
        Self::new(OverlayStyle::preset(config.palette, config.line_width))
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Clears the surface, then draws every event that carries a box and a
    /// usable frame size. Later events paint over earlier ones.
    pub fn render(&self, surface: SurfaceSize, events: &[LiveEvent]) -> DrawList {
        let mut commands = vec![DrawCommand::Clear {
            width: surface.width,
            height: surface.height,
        }];
        if surface.is_empty() {
            return DrawList { commands };
        }

        for event in events {
            let (Some(bbox), Some(frame)) = (event.bbox(), event.frame_size()) else {
                continue;
            };
            let Some(transform) = ScaleTransform::between(frame, surface) else {
                continue;
            };

            let rect = transform.apply(&bbox);
            let color = self.style.color_for(event).to_string();
            commands.push(DrawCommand::StrokeRect {
                rect,
                color: color.clone(),
                line_width: self.style.line_width,
            });
            commands.push(DrawCommand::FillText {
                text: label(event),
                x: rect.x,
                y: (rect.y - LABEL_OFFSET).max(LABEL_MIN_BASELINE),
                color,
                font: self.style.font.clone(),
            });
        }

        DrawList { commands }
    }
}

pub fn label(event: &LiveEvent) -> String {
    match event {
        LiveEvent::Detection(d) => format!("{} ({}%)", d.name, percent(d.similarity)),
        LiveEvent::Anomaly(a) => format!("ANOMALY: {} ({}%)", a.category, percent(a.confidence)),
    }
}

fn percent(value: f64) -> i64 {
    value.round() as i64
}
