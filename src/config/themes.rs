use std::collections::HashMap;

use ratatui::style::Color;

use super::ThemeName;

/// Colours the terminal UI draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub text: Color,
    pub muted: Color,
    pub accent: Color,
    pub highlight: Color,
    pub selection_bg: Color,
    pub star: Color,
    pub badge_new: Color,
    pub closed: Color,
    pub error: Color,
}

#[derive(Debug, Clone)]
pub struct ThemeRegistry {
    palettes: HashMap<ThemeName, Palette>,
}

impl ThemeRegistry {
    pub fn contains(&self, theme: &ThemeName) -> bool {
        self.palettes.contains_key(theme)
    }

    pub fn palette(&self, theme: ThemeName) -> Palette {
        self.palettes
            .get(&theme)
            .or_else(|| self.palettes.get(&ThemeName::Dark))
            .copied()
            .unwrap_or(DARK)
    }
}

const DARK: Palette = Palette {
    text: Color::White,
    muted: Color::DarkGray,
    accent: Color::Cyan,
    highlight: Color::Yellow,
    selection_bg: Color::Rgb(40, 44, 52),
    star: Color::Yellow,
    badge_new: Color::LightGreen,
    closed: Color::Red,
    error: Color::LightRed,
};

const LIGHT: Palette = Palette {
    text: Color::Black,
    muted: Color::Gray,
    accent: Color::Blue,
    highlight: Color::Magenta,
    selection_bg: Color::Rgb(225, 228, 235),
    star: Color::Rgb(200, 140, 0),
    badge_new: Color::Green,
    closed: Color::Red,
    error: Color::Red,
};

const HIGH_CONTRAST: Palette = Palette {
    text: Color::White,
    muted: Color::Gray,
    accent: Color::LightCyan,
    highlight: Color::LightYellow,
    selection_bg: Color::Blue,
    star: Color::LightYellow,
    badge_new: Color::LightGreen,
    closed: Color::LightRed,
    error: Color::LightRed,
};

impl Default for ThemeRegistry {
    fn default() -> Self {
        let palettes = [
            (ThemeName::Dark, DARK),
            (ThemeName::Light, LIGHT),
            (ThemeName::HighContrast, HIGH_CONTRAST),
        ]
        .into_iter()
        .collect();
        Self { palettes }
    }
}
