//! Detection overlay: maps buffered boxes from source-frame pixels onto the
//! display surface and redraws on every tick or buffer change.

mod palette;
mod renderer;
mod transform;

pub use palette::{OverlayStyle, PalettePreset};
pub use renderer::{label, DrawCommand, DrawList, OverlayRenderer};
pub use transform::{Rect, ScaleTransform, SurfaceSize};

use livewatch_common::CameraId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::buffer::EventBuffer;

/// Reports the surface's current displayed size, if it has been laid out.
pub trait SurfaceProbe: Send {
    fn surface_size(&self) -> Option<SurfaceSize>;
}

pub trait DrawTarget: Send {
    fn draw(&mut self, list: &DrawList);
}

/// Surface with a fixed size, for headless use.
#[derive(Debug, Clone, Copy)]
pub struct FixedSurface(pub SurfaceSize);

impl SurfaceProbe for FixedSurface {
    fn surface_size(&self) -> Option<SurfaceSize> {
        Some(self.0)
    }
}

/// Draw target that logs frames instead of painting them.
#[derive(Debug, Default)]
pub struct TracingDrawTarget {
    last_boxes: Option<usize>,
}

impl DrawTarget for TracingDrawTarget {
    fn draw(&mut self, list: &DrawList) {
        let boxes = list.box_count();
        if self.last_boxes != Some(boxes) {
            info!(boxes, labels = ?list.labels().collect::<Vec<_>>(), "Overlay changed");
            self.last_boxes = Some(boxes);
        } else {
            debug!(boxes, "Overlay redrawn");
        }
    }
}

pub struct RenderLoop<P, T> {
    renderer: OverlayRenderer,
    buffer: Arc<EventBuffer>,
    active: watch::Receiver<Option<CameraId>>,
    probe: P,
    target: T,
    frame_interval: Duration,
}

impl<P, T> RenderLoop<P, T>
where
    P: SurfaceProbe + 'static,
    T: DrawTarget + 'static,
{
    pub fn new(
        renderer: OverlayRenderer,
        buffer: Arc<EventBuffer>,
        active: watch::Receiver<Option<CameraId>>,
        probe: P,
        target: T,
        frame_interval: Duration,
    ) -> Self {
        Self {
            renderer,
            buffer,
            active,
            probe,
            target,
            frame_interval,
        }
    }

    /// Draws the active camera's buffer onto the target. Skipped while the
    /// surface has no layout yet.
    pub fn render_once(&mut self) -> Option<DrawList> {
        let surface = self.probe.surface_size()?;
        let active = self.active.borrow().clone();
        let events = match active {
            Some(camera_id) => self.buffer.in_receipt_order(&camera_id),
            None => Vec::new(),
        };

        let list = self.renderer.render(surface, &events);
        self.target.draw(&list);
        Some(list)
    }

    pub fn spawn(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(&mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("Overlay refreshing every {:?}", self.frame_interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = self.active.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.buffer.changed() => {}
                _ = ticker.tick() => {}
            }
            self.render_once();
        }
        debug!("Overlay loop stopped");
    }
}
