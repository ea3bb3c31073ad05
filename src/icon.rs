//! Tray icon rendering.

use image::{Rgba, RgbaImage};
use tray_icon::{BadIcon, Icon};
use voxagent_core::SessionState;

use crate::color::{self, Rgb};

const SIZE: u32 = 32;

/// What the tray shows, coarser than [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayStatus {
    Idle,
    Recording,
    Working,
    Done,
    Error,
}

impl From<&SessionState> for TrayStatus {
    fn from(state: &SessionState) -> Self {
        match state {
            SessionState::Idle => TrayStatus::Idle,
            SessionState::Recording { .. } => TrayStatus::Recording,
            SessionState::Transcribing { .. }
            | SessionState::Thinking { .. }
            | SessionState::Executing { .. } => TrayStatus::Working,
            SessionState::Done { .. } => TrayStatus::Done,
            SessionState::Error { .. } => TrayStatus::Error,
        }
    }
}

impl TrayStatus {
    fn color(&self) -> Rgb {
        match self {
            TrayStatus::Idle => color::GRAY,
            TrayStatus::Recording => color::BLUE,
            TrayStatus::Working => color::ORANGE,
            TrayStatus::Done => color::GREEN,
            TrayStatus::Error => color::RED,
        }
    }

    pub fn icon(&self) -> Result<Icon, BadIcon> {
        let image = render(self.color());
        let (width, height) = image.dimensions();
        Icon::from_rgba(image.into_raw(), width, height)
    }
}

/// Tooltip text for a state, kept short enough for the tray.
pub fn tooltip(state: &SessionState) -> String {
    const MAX_CHARS: usize = 120;

    let text = format!("{} - {}", crate::APP_NAME_PRETTY, state);
    if text.chars().count() <= MAX_CHARS {
        return text;
    }
    let mut text: String = text.chars().take(MAX_CHARS - 3).collect();
    text.push_str("...");
    text
}

/// A filled disc in `fill` with a white microphone capsule on top.
fn render(fill: Rgb) -> RgbaImage {
    let center = (SIZE as f32 - 1.0) / 2.0;
    let radius = SIZE as f32 / 2.0;

    RgbaImage::from_fn(SIZE, SIZE, |x, y| {
        let (fx, fy) = (x as f32, y as f32);
        let dx = fx - center;
        let dy = fy - center;
        if dx * dx + dy * dy > radius * radius {
            return Rgba([0, 0, 0, 0]);
        }

        // Capsule: a vertical bar with rounded ends, plus a short stand.
        let capsule_half_width = 4.0;
        let (top, bottom) = (7.0, 19.0);
        let cy = fy.clamp(top, bottom);
        let in_capsule = dx * dx + (fy - cy) * (fy - cy) <= capsule_half_width * capsule_half_width;
        let in_stand = dx.abs() <= 1.0 && (23.0..=26.0).contains(&fy);

        let (r, g, b) = if in_capsule || in_stand {
            color::WHITE
        } else {
            fill
        };
        Rgba([r, g, b, 255])
    })
}
