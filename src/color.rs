//! A few of the macOS system colors (dark appearance), used to tint the tray
//! icon.
//!
//! https://developer.apple.com/design/human-interface-guidelines/color#macOS-system-colors

pub type Rgb = (u8, u8, u8);

pub const WHITE: Rgb = (255, 255, 255);
pub const GRAY: Rgb = (152, 152, 157);
pub const RED: Rgb = (255, 69, 58);
pub const ORANGE: Rgb = (255, 159, 10);
pub const GREEN: Rgb = (50, 215, 75);
pub const BLUE: Rgb = (10, 132, 255);
